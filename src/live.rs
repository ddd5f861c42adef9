//! The seam between tasks and whatever shows their results to a browser.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

/// Receives the files a task has just written.
///
/// Implemented by the dev server. Tasks hold an `Option<Arc<dyn Reload>>`,
/// so a plain build runs without one.
pub trait Reload: Send + Sync {
    /// Pushes the written files (absolute paths) to connected clients.
    fn stream(&self, written: &[Utf8PathBuf]);

    /// Asks every connected client for a full page reload.
    fn reload(&self);
}

/// Message sent to the browser client over the live-reload socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LiveMessage {
    Reload,
    Inject { path: String },
}

/// Decides how a set of written files reaches the clients. Source maps are
/// ignored. When only stylesheets changed they are injected in place, anything
/// else needs a full reload.
pub fn classify(dist: &Utf8Path, written: &[Utf8PathBuf]) -> Vec<LiveMessage> {
    let relevant: Vec<_> = written
        .iter()
        .filter(|path| path.extension() != Some("map"))
        .collect();

    if relevant.is_empty() {
        return vec![];
    }

    if !relevant.iter().all(|path| path.extension() == Some("css")) {
        return vec![LiveMessage::Reload];
    }

    relevant
        .into_iter()
        .map(|path| LiveMessage::Inject {
            path: to_href(dist, path),
        })
        .collect()
}

/// URL path of a file served from `dist`.
fn to_href(dist: &Utf8Path, path: &Utf8Path) -> String {
    let relative = path.strip_prefix(dist).unwrap_or(path);
    let parts: Vec<_> = relative.components().map(|c| c.as_str()).collect();
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<Utf8PathBuf> {
        items.iter().map(Utf8PathBuf::from).collect()
    }

    #[test]
    fn css_is_injected() {
        let written = paths(&["/site/public/css/main.min.css", "/site/public/css/main.min.css.map"]);

        assert_eq!(
            classify(Utf8Path::new("/site/public"), &written),
            vec![LiveMessage::Inject {
                path: "/css/main.min.css".into()
            }]
        );
    }

    #[test]
    fn anything_else_reloads() {
        let written = paths(&["/site/public/css/main.min.css", "/site/public/index.html"]);

        assert_eq!(
            classify(Utf8Path::new("/site/public"), &written),
            vec![LiveMessage::Reload]
        );
    }

    #[test]
    fn maps_alone_are_ignored() {
        let written = paths(&["/site/public/js/main.js.map"]);

        assert!(classify(Utf8Path::new("/site/public"), &written).is_empty());
        assert!(classify(Utf8Path::new("/site/public"), &[]).is_empty());
    }

    #[test]
    fn messages_serialize_with_a_type_tag() {
        let reload = serde_json::to_string(&LiveMessage::Reload).unwrap();
        let inject = serde_json::to_string(&LiveMessage::Inject {
            path: "/css/a.css".into(),
        })
        .unwrap();

        assert_eq!(reload, r#"{"type":"reload"}"#);
        assert_eq!(inject, r#"{"type":"inject","path":"/css/a.css"}"#);
    }
}
