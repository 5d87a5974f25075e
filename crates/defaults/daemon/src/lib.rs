//! defaultsd library
//!
//! Process bootstrap for the default resource controller:
//! - Layered configuration
//! - Health and status endpoint
//! - Server lifecycle around the reconciliation engine

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use config::DaemonConfig;
pub use error::{DaemonError, DaemonResult};
pub use server::Server;
