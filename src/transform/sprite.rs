use std::collections::HashSet;
use std::sync::LazyLock;

use camino::Utf8Path;
use regex::Regex;
use thiserror::Error;

use super::Transform;
use crate::asset::Asset;

#[derive(Debug, Error)]
pub enum SpriteError {
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("'{0}' has no <svg> root element")]
    NoRoot(String),

    #[error("'{0}' has neither a viewBox nor a width and height")]
    NoViewBox(String),

    #[error("Icons '{0}' and '{1}' share the id '{2}'")]
    DuplicateId(String, String, String),
}

/// Stacks every input SVG into a single sprite file.
///
/// Each icon becomes a nested `<svg>` with an id derived from its path
/// (`icons/arrow.svg` → `icons--arrow`). Only the icon addressed by the
/// URL fragment is displayed, so `sprite.svg#icons--arrow` works as an image
/// source.
#[derive(Debug, Clone)]
pub struct Sprite {
    pub file: String,
    pub separator: String,
}

impl Default for Sprite {
    fn default() -> Self {
        Self {
            file: "sprite.svg".into(),
            separator: "--".into(),
        }
    }
}

const SPRITE_STYLE: &str = ":root>svg{display:none}:root>svg:target{display:block}";

static PROLOG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<\?xml.*?\?>|<!DOCTYPE[^>]*>|<!--.*?-->").expect("valid regex")
});

static ROOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<svg\b([^>]*?)(?:/>|>(.*)</svg>)").expect("valid regex")
});

static ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_:][-\w:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([0-9]*\.?[0-9]+)").expect("valid regex"));

struct Icon {
    id: String,
    view_box: String,
    preserve: Option<String>,
    inner: String,
}

impl Sprite {
    fn id(&self, path: &Utf8Path) -> String {
        let stem = path.with_extension("");
        stem.components()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(&self.separator)
            .replace(char::is_whitespace, "-")
    }

    fn icon(&self, asset: &Asset) -> Result<Icon, SpriteError> {
        let text = std::str::from_utf8(&asset.contents)?;
        let text = PROLOG.replace_all(text, "");

        let root = ROOT
            .captures(&text)
            .ok_or_else(|| SpriteError::NoRoot(asset.path.to_string()))?;

        let attrs: Vec<(String, String)> = ATTR
            .captures_iter(&root[1])
            .map(|c| {
                let value = c.get(2).or_else(|| c.get(3)).map_or("", |m| m.as_str());
                (c[1].to_string(), value.to_string())
            })
            .collect();

        let attr = |name: &str| {
            attrs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };

        let view_box = match attr("viewBox") {
            Some(view_box) => view_box.to_string(),
            None => {
                let size = |name| attr(name).and_then(|v| NUMBER.captures(v)).map(|c| c[1].to_string());
                match (size("width"), size("height")) {
                    (Some(width), Some(height)) => format!("0 0 {width} {height}"),
                    _ => return Err(SpriteError::NoViewBox(asset.path.to_string())),
                }
            }
        };

        Ok(Icon {
            id: self.id(&asset.path),
            view_box,
            preserve: attr("preserveAspectRatio").map(str::to_string),
            inner: root.get(2).map_or("", |m| m.as_str()).trim().to_string(),
        })
    }

    fn render(&self, icons: &[Icon]) -> String {
        let mut out = String::from(
            r#"<?xml version="1.0" encoding="utf-8"?><svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">"#,
        );
        out.push_str(&format!("<style>{SPRITE_STYLE}</style>"));

        for icon in icons {
            out.push_str(&format!(
                r#"<svg id="{}" viewBox="{}""#,
                escape(&icon.id),
                icon.view_box
            ));
            if let Some(preserve) = &icon.preserve {
                out.push_str(&format!(r#" preserveAspectRatio="{preserve}""#));
            }
            out.push('>');
            out.push_str(&icon.inner);
            out.push_str("</svg>");
        }

        out.push_str("</svg>");
        out
    }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

impl Transform for Sprite {
    fn name(&self) -> &'static str {
        "sprite"
    }

    fn apply(&self, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        if assets.is_empty() {
            return Ok(vec![]);
        }

        let mut icons = Vec::with_capacity(assets.len());
        let mut ids = HashSet::new();

        for asset in &assets {
            let icon = self.icon(asset)?;
            if !ids.insert(icon.id.clone()) {
                let other = assets
                    .iter()
                    .find(|a| self.id(&a.path) == icon.id)
                    .map_or_else(String::new, |a| a.path.to_string());
                return Err(
                    SpriteError::DuplicateId(other, asset.path.to_string(), icon.id).into(),
                );
            }
            icons.push(icon);
        }

        Ok(vec![Asset::new(self.file.as_str(), self.render(&icons))])
    }
}
