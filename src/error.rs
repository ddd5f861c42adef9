use thiserror::Error;

/// Top-level failure of a build or a watch session.
#[derive(Debug, Error)]
pub enum KumadeError {
    #[error("Failed to build runtime")]
    RuntimeBuild(#[from] std::io::Error),

    #[error(transparent)]
    Globs(#[from] GlobsError),

    #[error("Error while building the assets.\n{0}")]
    Task(#[from] TaskError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[cfg(feature = "live")]
    #[error("Error while starting the dev server:\n{0}")]
    Serve(#[from] ServeError),
}

/// Failure of a task or a group of tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task '{0}':\n{1:#}")]
    Failed(String, anyhow::Error),

    #[error("{} parallel task(s) failed:\n{}", .0.len(), ParallelErrors(.0))]
    Parallel(Vec<TaskError>),
}

impl TaskError {
    /// Names of the leaf tasks that failed.
    pub fn failed_tasks(&self) -> Vec<&str> {
        match self {
            TaskError::Failed(name, _) => vec![name.as_str()],
            TaskError::Parallel(errors) => errors.iter().flat_map(Self::failed_tasks).collect(),
        }
    }
}

struct ParallelErrors<'a>(&'a [TaskError]);

impl std::fmt::Display for ParallelErrors<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for error in self.0 {
            writeln!(f, "{error}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum GlobsError {
    #[error("Couldn't compile glob pattern '{0}'.\n{1}")]
    Pattern(String, glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Unbalanced braces in glob pattern '{0}'")]
    Braces(String),
}

#[derive(Debug, Error)]
#[error("Error while cleaning the output directory:\n{0}")]
pub struct CleanError(#[from] pub std::io::Error);

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("Event channel closed")]
    Closed,
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Couldn't bind listener.\n{0}")]
    Bind(#[from] std::io::Error),
}
