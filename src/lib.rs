//! tachi-bridge
//!
//! Loads Tachiyomi/Mihon extension packages on managed and desktop runtimes and
//! exposes their sources through a single typed catalogue interface.

pub mod core;
pub mod extension;

pub use crate::core::{BridgeError, Config, Result};
pub use extension::{CatalogueSource, LifecycleManager, Platform, SourceHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
