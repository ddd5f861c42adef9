use std::sync::Arc;

use camino::Utf8PathBuf;
use futures::future::join_all;

use crate::config::Config;
use crate::error::{GlobsError, KumadeError};
use crate::globs::Globs;
use crate::io;
use crate::live::Reload;
use crate::pipe::Pipe;
use crate::task::Task;
use crate::transform::{ConvertFont, FontFormat, Optimize, Rename};
#[cfg(feature = "live")]
use crate::watch::{Target, Watcher};

const FONTS: &str = "fonts/*.ttf";

/// The default asset pipeline of a project: its tasks, the order they run
/// in, and the watch bindings which re-run them.
#[derive(Clone)]
pub struct Website {
    config: Config,
    reload: Option<Arc<dyn Reload>>,
}

impl Website {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            reload: None,
        }
    }

    /// Every task built from now on notifies `reload` of the files it wrote.
    pub fn notify(mut self, reload: Option<Arc<dyn Reload>>) -> Self {
        self.reload = reload;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn src(&self, pattern: &str) -> String {
        format!("{}/{pattern}", self.config.src)
    }

    fn dest(&self, dir: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.config.dist).join(dir)
    }

    fn pipe(&self, name: &'static str, source: Globs, dest: Utf8PathBuf) -> Pipe {
        Pipe::new(name, &self.config.root, source, dest).notify(self.reload.clone())
    }

    pub fn clean(&self) -> Task {
        let dist = self.config.dist_dir();
        Task::new("clean", move || {
            let dist = dist.clone();
            async move {
                io::clean(&dist).await?;
                anyhow::Ok(())
            }
        })
    }

    pub fn html(&self) -> Result<Task, GlobsError> {
        let source = Globs::new([self.src("**/*.html")])?;
        Ok(self.pipe("html", source, self.dest("")).into_task())
    }

    pub fn styles(&self) -> Result<Task, GlobsError> {
        let source = Globs::new([self.src("sass/main.{sass,scss}")])?;
        Ok(self
            .pipe("styles", source, self.dest("css"))
            .pipe(self.config.sass.clone())
            .pipe(Rename::suffix(".min"))
            .pipe(self.config.postprocess.clone())
            .into_task())
    }

    pub fn scripts(&self) -> Result<Task, GlobsError> {
        let source = Globs::new([self.src("js/**/*.js")])?;
        Ok(self
            .pipe("scripts", source, self.dest("js"))
            .pipe(self.config.scripts.clone())
            .into_task())
    }

    pub fn sprites(&self) -> Result<Task, GlobsError> {
        let source = Globs::new([self.src("images/**/*.svg")])?;
        Ok(self
            .pipe("svgSprites", source, self.dest("images"))
            .pipe(self.config.sprite.clone())
            .into_task())
    }

    pub fn images(&self) -> Result<Task, GlobsError> {
        let source = Globs::new([self.src("images/**/*.{jpg,png,svg,ico,webp}")])?;
        Ok(self
            .pipe("images", source, self.dest("images"))
            .pipe(Optimize::new(self.config.images))
            .into_task())
    }

    /// Three passes over the same fonts: WOFF, WOFF2 and a verbatim copy.
    /// The task completes once all of them did, and the clients hear about
    /// the written files once.
    pub fn fonts(&self) -> Result<Task, GlobsError> {
        let source = Globs::new([self.src(FONTS)])?;
        let dest = self.dest("fonts");
        let pass = |name, source| self.pipe(name, source, dest.clone()).notify(None);

        let passes = Arc::new([
            pass("ttf2woff", source.clone()).pipe(ConvertFont(FontFormat::Woff)),
            pass("ttf2woff2", source.clone()).pipe(ConvertFont(FontFormat::Woff2)),
            pass("ttf", source),
        ]);
        let reload = self.reload.clone();

        Ok(Task::new("fonts", move || {
            let passes = passes.clone();
            let reload = reload.clone();
            async move {
                let mut written = Vec::new();
                for result in join_all(passes.iter().map(|pass| pass.run())).await {
                    written.extend(result?);
                }
                if let Some(reload) = &reload {
                    reload.stream(&written);
                }
                anyhow::Ok(())
            }
        }))
    }

    /// `clean → (scripts ∥ fonts ∥ images ∥ svgSprites) → html → styles`
    pub fn build_tree(&self) -> Result<Task, GlobsError> {
        Ok(Task::series([
            self.clean(),
            Task::parallel([
                self.scripts()?,
                self.fonts()?,
                self.images()?,
                self.sprites()?,
            ]),
            self.html()?,
            self.styles()?,
        ]))
    }

    /// The build tree followed by watch mode.
    #[cfg(feature = "live")]
    pub fn tree(&self) -> Result<Task, GlobsError> {
        let site = self.clone();
        let watch = Task::new("watch", move || {
            let site = site.clone();
            async move {
                site.watcher()?.run().await?;
                anyhow::Ok(())
            }
        });

        Ok(Task::series([self.build_tree()?, watch]))
    }

    /// Cleans the output directory and builds everything once.
    pub async fn build(&self) -> Result<(), KumadeError> {
        self.build_tree()?.run().await?;
        Ok(())
    }

    /// Watch bindings of the default pipeline.
    #[cfg(feature = "live")]
    pub fn watcher(&self) -> Result<Watcher, GlobsError> {
        let mut watcher = Watcher::new(&self.config.root).notify(self.reload.clone());

        watcher
            .watch(Globs::new([self.src("**/*.html")])?, Target::Task(self.html()?))
            .watch(
                Globs::new([self.src("sass/**/*.{scss,sass}")])?,
                Target::Task(self.styles()?),
            )
            .watch(Globs::new([self.src("js/**/*.js")])?, Target::Task(self.scripts()?))
            .watch(
                Globs::new([self.src("images/**/*.svg")])?,
                Target::Task(self.sprites()?),
            )
            .watch(
                Globs::new([self.src("images/**/*.{jpg,png,svg,ico,webp}")])?,
                Target::Task(self.images()?),
            )
            .watch(Globs::new([self.src(FONTS)])?, Target::Task(self.fonts()?));

        Ok(watcher)
    }
}
