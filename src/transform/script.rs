use std::io::ErrorKind;
use std::process::{Command, Stdio};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use thiserror::Error;

use super::Transform;
use crate::asset::Asset;

/// Errors that can occur when bundling JavaScript files.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// An I/O error occurred during process execution.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The bundler executable could not be found.
    #[error("Couldn't find '{0}' on PATH")]
    Missing(String),

    /// The Esbuild process returned a non-zero exit code.
    #[error("Esbuild execution failed: {0}")]
    Esbuild(String),

    /// The temporary directory has a non UTF-8 path.
    #[error("Temporary path is not valid UTF-8")]
    PathFormat,

    /// The source map written by the bundler couldn't be parsed.
    #[error("Invalid source map: {0}")]
    SourceMap(#[from] serde_json::Error),
}

/// Bundles all inputs into a single file with `esbuild`.
///
/// With a single input read from disk the file itself is the entry point.
/// Otherwise a synthetic entry importing every input in order is bundled.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Name of the produced bundle.
    pub file: String,
    pub minify: bool,
    pub source_map: bool,
    pub target: String,
    pub program: String,
}

impl Default for Bundle {
    fn default() -> Self {
        Self {
            file: "main.js".into(),
            minify: true,
            source_map: true,
            target: "es2015".into(),
            program: "esbuild".into(),
        }
    }
}

impl Bundle {
    fn bundle(&self, assets: &[Asset]) -> Result<Vec<Asset>, ScriptError> {
        let dir = tempfile::tempdir()?;
        let tmp = Utf8Path::from_path(dir.path()).ok_or(ScriptError::PathFormat)?;

        let entry = match assets {
            [Asset {
                source: Some(source),
                ..
            }] => source.canonicalize_utf8()?,
            _ => synthetic_entry(tmp, assets)?,
        };

        let outfile = tmp.join(&self.file);

        let mut command = Command::new(&self.program);
        command
            .arg(entry.as_str())
            .arg("--bundle")
            .arg(format!("--target={}", self.target))
            .arg(format!("--outfile={outfile}"))
            .arg("--log-level=warning")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if self.minify {
            command.arg("--minify");
        }
        if self.source_map {
            command.arg("--sourcemap");
        }

        let output = command.output().map_err(|e| match e.kind() {
            ErrorKind::NotFound => ScriptError::Missing(self.program.clone()),
            _ => ScriptError::Io(e),
        })?;

        if !output.status.success() {
            return Err(ScriptError::Esbuild(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        let mut bundled = vec![Asset::new(self.file.as_str(), std::fs::read(&outfile)?)];

        let map = tmp.join(format!("{}.map", self.file));
        if self.source_map && map.exists() {
            let map = rebase_sources(&std::fs::read(&map)?, tmp)?;
            bundled.push(Asset::new(format!("{}.map", self.file), map));
        }

        Ok(bundled)
    }
}

/// Writes an entry module importing every input in order. Inputs without a
/// file on disk are written next to it first.
///
/// The entry lives in the temporary directory, so every import is absolute.
fn synthetic_entry(tmp: &Utf8Path, assets: &[Asset]) -> Result<Utf8PathBuf, ScriptError> {
    let mut entry = String::new();

    for (i, asset) in assets.iter().enumerate() {
        let path = match &asset.source {
            Some(source) => source.canonicalize_utf8()?,
            None => {
                let path = tmp.join(format!("input-{i}.js"));
                std::fs::write(&path, &asset.contents)?;
                path
            }
        };

        entry.push_str(&format!("import {};\n", quote(path.as_str())));
    }

    let path = tmp.join("__entry.js");
    std::fs::write(&path, entry)?;
    Ok(path)
}

/// The bundler writes `sources` relative to the bundle, which sits in the
/// temporary directory. Rewrites them to absolute paths.
fn rebase_sources(map: &[u8], out_dir: &Utf8Path) -> Result<Vec<u8>, ScriptError> {
    let mut map: serde_json::Value = serde_json::from_slice(map)?;

    if let Some(sources) = map.get_mut("sources").and_then(|s| s.as_array_mut()) {
        for source in sources {
            if let Some(path) = source.as_str() {
                *source = normalize(&out_dir.join(path)).into_string().into();
            }
        }
    }

    Ok(serde_json::to_vec(&map)?)
}

/// Resolves `.` and `..` without touching the file system.
fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn quote(path: &str) -> String {
    serde_json::to_string(path).unwrap_or_else(|_| format!("\"{path}\""))
}

impl Transform for Bundle {
    fn name(&self) -> &'static str {
        "bundle"
    }

    fn apply(&self, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        if assets.is_empty() {
            return Ok(vec![]);
        }

        let bundled = self.bundle(&assets)?;
        tracing::debug!("Bundled {} script(s) into '{}'", assets.len(), self.file);
        Ok(bundled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_to_bundle() {
        let bundle = Bundle {
            program: "kumade-no-such-bundler".into(),
            ..Bundle::default()
        };

        assert!(bundle.apply(vec![]).unwrap().is_empty());
    }

    #[test]
    fn missing_bundler_is_reported() {
        let bundle = Bundle {
            program: "kumade-no-such-bundler".into(),
            ..Bundle::default()
        };

        let err = bundle
            .apply(vec![Asset::new("a.js", "console.log(1)")])
            .unwrap_err();

        assert!(err.to_string().contains("kumade-no-such-bundler"));
    }

    #[test]
    fn synthetic_entry_imports_in_order() {
        let site = tempfile::tempdir().unwrap();
        let site = Utf8Path::from_path(site.path()).unwrap().canonicalize_utf8().unwrap();
        std::fs::write(site.join("b.js"), "").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let tmp = Utf8Path::from_path(dir.path()).unwrap();
        let assets = vec![
            Asset::new("b.js", "").with_source(site.join("b.js")),
            Asset::new("a.js", "export const a = 1;"),
        ];

        let entry = synthetic_entry(tmp, &assets).unwrap();
        let text = std::fs::read_to_string(entry).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], format!("import \"{}\";", site.join("b.js")));
        assert_eq!(lines[1], format!("import \"{}\";", tmp.join("input-1.js")));
        assert!(tmp.join("input-1.js").exists());
    }

    #[test]
    fn synthetic_entry_imports_relative_sources_absolutely() {
        // sources relative to the working directory, as a pipe rooted at `.`
        // produces them
        let site = tempfile::tempdir_in(".").unwrap();
        let site = Utf8Path::from_path(site.path()).unwrap();
        assert!(site.is_relative());
        std::fs::create_dir_all(site.join("src/js")).unwrap();
        std::fs::write(site.join("src/js/a.js"), "").unwrap();
        std::fs::write(site.join("src/js/b.js"), "").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let tmp = Utf8Path::from_path(dir.path()).unwrap();
        let assets = vec![
            Asset::new("a.js", "").with_source(site.join("src/js/a.js")),
            Asset::new("b.js", "").with_source(site.join("src/js/b.js")),
        ];

        let entry = synthetic_entry(tmp, &assets).unwrap();
        let text = std::fs::read_to_string(entry).unwrap();

        for (line, name) in text.lines().zip(["a.js", "b.js"]) {
            let import: String = serde_json::from_str(
                line.strip_prefix("import ").unwrap().strip_suffix(';').unwrap(),
            )
            .unwrap();
            let import = Utf8PathBuf::from(import);

            assert!(import.is_absolute());
            assert_eq!(import, site.join("src/js").join(name).canonicalize_utf8().unwrap());
        }
    }

    #[test]
    fn source_map_paths_leave_the_temporary_directory() {
        let map = br#"{"version":3,"sources":["../../site/src/js/a.js","./__entry.js"],"mappings":""}"#;

        let map = rebase_sources(map, Utf8Path::new("/tmp/.tmpA1b2")).unwrap();
        let map: serde_json::Value = serde_json::from_slice(&map).unwrap();

        assert_eq!(
            map["sources"],
            serde_json::json!(["/site/src/js/a.js", "/tmp/.tmpA1b2/__entry.js"])
        );
        assert_eq!(map["version"], 3);
    }
}
