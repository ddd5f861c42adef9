//! A pipe selects files by glob, runs them through a linear chain of
//! transforms and writes the result to a destination directory.

use std::sync::Arc;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};

use crate::asset::Asset;
use crate::globs::Globs;
use crate::live::Reload;
use crate::task::Task;
use crate::transform::Transform;

#[derive(Clone)]
pub struct Pipe {
    name: &'static str,
    root: Utf8PathBuf,
    source: Globs,
    transforms: Vec<Arc<dyn Transform>>,
    dest: Utf8PathBuf,
    reload: Option<Arc<dyn Reload>>,
}

impl Pipe {
    /// `dest` is relative to `root`, like the globs.
    pub fn new(
        name: &'static str,
        root: impl Into<Utf8PathBuf>,
        source: Globs,
        dest: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            name,
            root: root.into(),
            source,
            transforms: Vec::new(),
            dest: dest.into(),
            reload: None,
        }
    }

    pub fn pipe(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    pub fn notify(mut self, reload: Option<Arc<dyn Reload>>) -> Self {
        self.reload = reload;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs the pipe once and returns the absolute paths of the written files.
    pub async fn run(&self) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let selected = self.source.select(&self.root)?;
        if selected.is_empty() {
            tracing::debug!("'{}' matched no files", self.name);
            return Ok(vec![]);
        }

        let mut assets = Vec::with_capacity(selected.len());
        for file in selected {
            let source = self.root.join(&file.path);
            let contents = tokio::fs::read(&source)
                .await
                .with_context(|| format!("couldn't read '{source}'"))?;

            assets.push(Asset::new(file.relative(), contents).with_source(source));
        }

        let transforms = self.transforms.clone();
        let assets = tokio::task::spawn_blocking(move || apply(&transforms, assets)).await??;

        let written = write(&self.root.join(&self.dest), assets).await?;

        if let Some(reload) = &self.reload {
            reload.stream(&written);
        }

        Ok(written)
    }

    pub fn into_task(self) -> Task {
        let pipe = Arc::new(self);
        Task::new(pipe.name, move || {
            let pipe = pipe.clone();
            async move { pipe.run().await.map(|_| ()) }
        })
    }
}

fn apply(transforms: &[Arc<dyn Transform>], mut assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
    for transform in transforms {
        assets = transform
            .apply(assets)
            .with_context(|| format!("'{}' failed", transform.name()))?;
    }
    Ok(assets)
}

async fn write(dest: &Utf8Path, assets: Vec<Asset>) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let mut written = Vec::with_capacity(assets.len());

    for asset in assets {
        let path = dest.join(&asset.path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("couldn't create '{parent}'"))?;
        }

        tokio::fs::write(&path, &asset.contents)
            .await
            .with_context(|| format!("couldn't write '{path}'"))?;

        written.push(path);
    }

    Ok(written)
}
