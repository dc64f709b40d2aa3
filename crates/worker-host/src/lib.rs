//! Worker Host - isolated worker processes with a message channel each
//!
//! The host side (`WorkerHost`) resolves a script reference to a built
//! artifact, runs a private copy of it as a child process, and fans out the
//! worker's messages and exit as `WorkerEvent`s. The worker side
//! (`WorkerChannel`) is what a worker program uses to talk back.

mod channel;
mod error;
mod host;
mod process;
mod registry;
mod runtime;

pub use channel::{ChannelHello, CHANNEL_ADDR_ENV, CHANNEL_TOKEN_ENV};
pub use error::{HostError, Result};
pub use host::{HostConfig, WorkerHost};
pub use process::{RunnerConfig, APP_ROOT_ENV, WORKER_ID_ENV};
pub use registry::WorkerSummary;
pub use runtime::WorkerChannel;
