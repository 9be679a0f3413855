pub mod config;
pub mod pipeline;
pub mod receiver;
pub mod shutdown;
pub mod tls;
pub mod trace;

pub use pipeline::Pipeline;
pub use receiver::{Factory, Receiver, ReceiverContext, Scraper, ScraperController};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};

#[macro_use]
extern crate tracing;

/// The basic error type, dynamically dispatched and safe to send across threads
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The basic result type, defined in terms of [`Error`] and generic over `T`
pub type Result<T> = std::result::Result<T, Error>;
