use std::time::Instant;

use camino::Utf8Path;

use crate::error::CleanError;
use crate::utils::took;

/// Delete the entire output directory if it exists.
pub async fn clean(dist: &Utf8Path) -> Result<(), CleanError> {
    let s = Instant::now();

    match tokio::fs::remove_dir_all(dist).await {
        Ok(()) => tracing::debug!("Removed '{dist}' {}", took(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(CleanError(e)),
    }

    Ok(())
}
