//! Core application layer
//!
//! Ambient services shared by the extension subsystem:
//! - Configuration management
//! - Structured logging
//! - Error handling and type system
//! - HTTP and preference collaborators

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod preferences;

pub use config::Config;
pub use error::{BridgeError, ErrorContext, Result};
pub use http::{HttpClient, HttpResponse, ReqwestHttpClient};
pub use logging::Logger;
pub use preferences::{JsonFileStore, KeyValueStore, MemoryStore};
