//! Transform collaborators: pure functions from an ordered list of assets to
//! an ordered list of assets.

pub mod font;
pub mod image;
pub mod script;
pub mod sprite;
pub mod styles;

use crate::asset::Asset;

pub use font::{ConvertFont, FontError, FontFormat};
pub use self::image::{ImageError, ImageOptions, Optimize};
pub use script::{Bundle, ScriptError};
pub use sprite::{Sprite, SpriteError};
pub use styles::{OutputStyle, PostProcess, Sass, StyleError};

/// One stage of a pipe.
///
/// Transforms run on the blocking pool, so they are free to do CPU-bound
/// work or to spawn processes.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>>;
}

/// Renames every asset by appending a suffix to its file stem.
#[derive(Debug, Clone)]
pub struct Rename {
    pub suffix: String,
}

impl Rename {
    pub fn suffix(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl Transform for Rename {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn apply(&self, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        Ok(assets
            .into_iter()
            .map(|mut asset| {
                let stem = asset.path.file_stem().unwrap_or_default();
                let name = match asset.path.extension() {
                    Some(ext) => format!("{stem}{}.{ext}", self.suffix),
                    None => format!("{stem}{}", self.suffix),
                };
                asset.path.set_file_name(name);
                asset
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_appends_suffix_to_stem() {
        let assets = vec![Asset::new("main.css", ""), Asset::new("nested/print.css", "")];

        let renamed = Rename::suffix(".min").apply(assets).unwrap();
        let paths: Vec<_> = renamed.iter().map(|a| a.path.as_str()).collect();

        assert_eq!(paths, vec!["main.min.css", "nested/print.min.css"]);
    }
}
