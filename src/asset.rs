use camino::{Utf8Path, Utf8PathBuf};

/// A file travelling through a pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Path relative to the glob base, and later to the destination directory.
    pub path: Utf8PathBuf,
    /// Location of the file on disk, if the asset was read from one.
    pub source: Option<Utf8PathBuf>,
    pub contents: Vec<u8>,
}

impl Asset {
    pub fn new(path: impl Into<Utf8PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            source: None,
            contents: contents.into(),
        }
    }

    pub fn with_source(mut self, source: impl Into<Utf8PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn extension(&self) -> Option<String> {
        self.path.extension().map(str::to_ascii_lowercase)
    }

    /// Sibling path with `suffix` appended to the full file name, as in
    /// `main.min.css` → `main.min.css.map`.
    pub fn sibling(&self, suffix: &str) -> Utf8PathBuf {
        let name = format!("{}{suffix}", self.path.file_name().unwrap_or_default());
        match self.path.parent() {
            Some(parent) => parent.join(name),
            None => Utf8Path::new(&name).to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling() {
        let asset = Asset::new("css/main.min.css", "");
        assert_eq!(asset.sibling(".map"), "css/main.min.css.map");

        let asset = Asset::new("main.js", "");
        assert_eq!(asset.sibling(".map"), "main.js.map");
    }
}
