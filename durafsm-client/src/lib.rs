//! # durafsm-client
//!
//! Async client for the durafsm HTTP API.

pub mod client;
pub mod error;

pub use client::{Client, ClientConfig, Created};
pub use error::ClientError;
