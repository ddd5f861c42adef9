use std::fmt::Display;
use std::sync::LazyLock;
use std::time::Instant;

use console::style;
use indicatif::ProgressStyle;

static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed}] {msg}")
        .expect("Error setting progress bar template")
});

/// Spinner shown next to every running task.
pub(crate) fn style_task() -> ProgressStyle {
    STYLE_TASK.clone()
}

/// Time elapsed since `start`, as `after 12ms`.
pub(crate) fn took(start: Instant) -> impl Display {
    style(format!("after {}ms", start.elapsed().as_millis())).blue()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn took_reads_as_a_duration() {
        console::set_colors_enabled(false);
        let text = took(Instant::now()).to_string();

        assert!(text.starts_with("after "));
        assert!(text.ends_with("ms"));
    }
}
