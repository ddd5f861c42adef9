use camino::Utf8PathBuf;

use crate::transform::{Bundle, ImageOptions, PostProcess, Sass, Sprite};

/// Everything the default pipeline needs to know about a project.
#[derive(Debug, Clone)]
pub struct Config {
    /// Project root, all other paths are relative to it.
    pub root: Utf8PathBuf,
    /// Source directory name.
    pub src: String,
    /// Output directory name.
    pub dist: String,
    pub sass: Sass,
    pub postprocess: PostProcess,
    pub scripts: Bundle,
    pub images: ImageOptions,
    pub sprite: Sprite,
    pub server: ServerOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            src: "src".into(),
            dist: "public".into(),
            sass: Sass::default(),
            postprocess: PostProcess::default(),
            scripts: Bundle::default(),
            images: ImageOptions::default(),
            sprite: Sprite::default(),
            server: ServerOptions::default(),
        }
    }
}

impl Config {
    pub fn with_root(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Absolute (or root relative) path of the output directory.
    pub fn dist_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.dist)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// HTTP port, a free one is picked when it is taken.
    pub port: u16,
    /// Live-reload WebSocket port, same fallback.
    pub live_port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: 3000,
            live_port: 35729,
        }
    }
}
