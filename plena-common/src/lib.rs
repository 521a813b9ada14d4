//! Shared building blocks for the Vida Plena server.
//!
//! This crate holds the pieces every binary needs before a single request
//! is served: environment-derived configuration, the error taxonomy that
//! maps to HTTP status codes, and structured logging setup.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::Config;
pub use error::{Error, Result};
