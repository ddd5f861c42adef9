use camino::Utf8PathBuf;
use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;
use thiserror::Error;

use super::Transform;
use crate::asset::Asset;

/// Errors that can occur when compiling or post-processing stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// A Sass compilation error occurred.
    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    /// The stylesheet is not valid UTF-8.
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The browser query could not be resolved.
    #[error("Invalid browser query: {0}")]
    Browsers(String),

    /// Parsing, minifying or printing the CSS failed.
    #[error("CSS processing error: {0}")]
    Css(String),

    /// The source map could not be built.
    #[error("Source map error: {0}")]
    SourceMap(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputStyle {
    #[default]
    Expanded,
    Compressed,
}

impl From<OutputStyle> for grass::OutputStyle {
    fn from(style: OutputStyle) -> Self {
        match style {
            OutputStyle::Expanded => grass::OutputStyle::Expanded,
            OutputStyle::Compressed => grass::OutputStyle::Compressed,
        }
    }
}

/// Compiles `.scss` and `.sass` files to CSS with `grass`.
#[derive(Debug, Clone, Default)]
pub struct Sass {
    pub style: OutputStyle,
    /// Extra directories searched by `@use` and `@import`. The directory of
    /// the compiled file is always searched first.
    pub load_paths: Vec<Utf8PathBuf>,
}

impl Sass {
    fn compile(&self, asset: Asset) -> Result<Asset, StyleError> {
        let syntax = match asset.extension().as_deref() {
            Some("sass") => grass::InputSyntax::Sass,
            Some("css") => grass::InputSyntax::Css,
            _ => grass::InputSyntax::Scss,
        };

        let mut options = grass::Options::default()
            .style(self.style.into())
            .input_syntax(syntax);

        if let Some(dir) = asset.source.as_deref().and_then(|source| source.parent()) {
            options = options.load_path(dir);
        }
        for path in &self.load_paths {
            options = options.load_path(path);
        }

        let input = std::str::from_utf8(&asset.contents)?;
        let css = grass::from_string(input, &options)?;

        Ok(Asset {
            path: asset.path.with_extension("css"),
            source: asset.source,
            contents: css.into_bytes(),
        })
    }
}

impl Transform for Sass {
    fn name(&self) -> &'static str {
        "sass"
    }

    fn apply(&self, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        assets
            .into_iter()
            .map(|asset| {
                let path = asset.path.clone();
                self.compile(asset)
                    .map_err(|e| anyhow::Error::new(e).context(format!("couldn't compile '{path}'")))
            })
            .collect()
    }
}

/// Prefixes, minifies and maps CSS with `lightningcss`.
///
/// Every input produces the processed stylesheet and, when enabled, a
/// `<name>.map` sibling referenced by a `sourceMappingURL` comment.
#[derive(Debug, Clone)]
pub struct PostProcess {
    /// Browserslist queries used for vendor prefixing.
    pub browsers: Vec<String>,
    pub minify: bool,
    pub source_map: bool,
}

impl Default for PostProcess {
    fn default() -> Self {
        Self {
            browsers: vec!["last 10 versions".into()],
            minify: true,
            source_map: true,
        }
    }
}

impl PostProcess {
    fn targets(&self) -> Result<Targets, StyleError> {
        if self.browsers.is_empty() {
            return Ok(Targets::default());
        }

        let browsers = Browsers::from_browserslist(&self.browsers)
            .map_err(|e| StyleError::Browsers(e.to_string()))?;

        Ok(browsers.map(Targets::from).unwrap_or_default())
    }

    fn process(&self, asset: Asset) -> Result<Vec<Asset>, StyleError> {
        let code = std::str::from_utf8(&asset.contents)?;
        let file_name = asset.path.file_name().unwrap_or("style.css").to_string();
        let targets = self.targets()?;

        let mut sheet = StyleSheet::parse(
            code,
            ParserOptions {
                filename: file_name.clone(),
                ..ParserOptions::default()
            },
        )
        .map_err(|e| StyleError::Css(e.to_string()))?;

        sheet
            .minify(MinifyOptions {
                targets: targets.clone(),
                ..MinifyOptions::default()
            })
            .map_err(|e| StyleError::Css(e.to_string()))?;

        let mut map = if self.source_map {
            let mut map = SourceMap::new("/");
            let index = map.add_source(asset.path.as_str());
            map.set_source_content(index as usize, code)
                .map_err(|e| StyleError::SourceMap(format!("{e:?}")))?;
            Some(map)
        } else {
            None
        };

        let result = sheet
            .to_css(PrinterOptions {
                minify: self.minify,
                source_map: map.as_mut(),
                targets,
                ..PrinterOptions::default()
            })
            .map_err(|e| StyleError::Css(e.to_string()))?;

        let mut css = result.code;
        let mut output = Vec::with_capacity(2);

        let map_asset = match map.as_mut() {
            Some(map) => {
                let json = map
                    .to_json(None)
                    .map_err(|e| StyleError::SourceMap(format!("{e:?}")))?;
                css.push_str(&format!("\n/*# sourceMappingURL={file_name}.map */\n"));
                Some(Asset::new(asset.sibling(".map"), json))
            }
            None => None,
        };

        output.push(Asset {
            path: asset.path.clone(),
            source: asset.source.clone(),
            contents: css.into_bytes(),
        });
        output.extend(map_asset);

        Ok(output)
    }
}

impl Transform for PostProcess {
    fn name(&self) -> &'static str {
        "postprocess"
    }

    fn apply(&self, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let mut output = Vec::with_capacity(assets.len() * 2);

        for asset in assets {
            let path = asset.path.clone();
            let processed = self
                .process(asset)
                .map_err(|e| anyhow::Error::new(e).context(format!("couldn't process '{path}'")))?;
            output.extend(processed);
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Rename;

    #[test]
    fn sass_compiles_nested_rules() {
        let assets = vec![Asset::new("main.scss", "$c: red;\nbody { a { color: $c; } }\n")];

        let output = Sass::default().apply(assets).unwrap();

        assert_eq!(output.len(), 1);
        assert_eq!(output[0].path, "main.css");
        let css = String::from_utf8(output[0].contents.clone()).unwrap();
        assert!(css.contains("body a {\n  color: red;\n}"));
    }

    #[test]
    fn sass_reports_the_file() {
        let assets = vec![Asset::new("broken.scss", "body { color: ")];

        let err = Sass::default().apply(assets).unwrap_err();

        assert!(format!("{err:#}").contains("broken.scss"));
    }

    #[test]
    fn postprocess_minifies_and_maps() {
        let assets = vec![Asset::new("main.css", "body {\n  color: red;\n}\n")];
        let assets = Rename::suffix(".min").apply(assets).unwrap();

        let output = PostProcess::default().apply(assets).unwrap();
        let paths: Vec<_> = output.iter().map(|a| a.path.as_str()).collect();

        assert_eq!(paths, vec!["main.min.css", "main.min.css.map"]);

        let css = String::from_utf8(output[0].contents.clone()).unwrap();
        assert!(css.starts_with("body{color:red}"));
        assert!(css.contains("sourceMappingURL=main.min.css.map"));

        let map: serde_json::Value = serde_json::from_slice(&output[1].contents).unwrap();
        assert_eq!(map["version"], 3);
    }

    #[test]
    fn postprocess_without_map() {
        let process = PostProcess {
            source_map: false,
            ..PostProcess::default()
        };

        let output = process
            .apply(vec![Asset::new("a.css", "a { color: blue }")])
            .unwrap();

        assert_eq!(output.len(), 1);
        assert!(!String::from_utf8_lossy(&output[0].contents).contains("sourceMappingURL"));
    }
}
