//! # durafsm-tasks
//!
//! [`TaskInvoker`](durafsm_core::TaskInvoker) implementations:
//! - [`LocalInvoker`] runs registered async handlers on the tokio runtime
//! - [`HttpInvoker`] posts task payloads to a remote task service
//! - [`RecordingInvoker`] only records what it was asked to run

pub mod http;
pub mod local;
pub mod recording;

pub use http::HttpInvoker;
pub use local::{LocalInvoker, LoggingHandler, TaskHandler};
pub use recording::RecordingInvoker;
