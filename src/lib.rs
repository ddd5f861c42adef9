#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod asset;
mod config;
mod error;
mod globs;
mod io;
mod live;
mod pipe;
pub mod task;
pub mod transform;
mod utils;
mod website;

#[cfg(feature = "live")]
mod server;
#[cfg(feature = "live")]
mod watch;

pub use crate::asset::Asset;
pub use crate::config::{Config, ServerOptions};
pub use crate::error::*;
pub use crate::globs::{Globs, Selected};
pub use crate::io::clean;
pub use crate::live::{LiveMessage, Reload, classify};
pub use crate::pipe::Pipe;
pub use crate::task::{Action, Mermaid, Order, Task};
pub use crate::website::Website;

#[cfg(feature = "live")]
pub use crate::server::DevServer;
#[cfg(feature = "live")]
pub use crate::watch::{Binding, Target, Watcher};
