//! Stream objects from a bucket into a single zip archive written back to
//! the same bucket.

pub mod archive;
pub mod config;
pub mod engine;
pub mod http;
pub mod store;
pub mod telemetry;
pub mod ui;

pub use config::Settings;
pub use engine::{ErrorKind, OutputId, ZipError, ZipService};
