//! Extension subsystem
//!
//! Everything between an APK on disk and a registered catalogue source:
//! - Manifest decoding, metadata and validation
//! - Runtime loaders for managed and desktop hosts
//! - Source adapters and the id-keyed registry
//! - Repository indexes, installation and the lifecycle manager

pub mod adapter;
pub mod archive;
pub mod catalogue;
pub mod convert;
pub mod converter;
pub mod desktop;
pub mod factory;
pub mod foreign;
pub mod managed;
pub mod manager;
pub mod manifest;
pub mod metadata;
pub mod registry;
pub mod repository;
pub mod runtime;
pub mod types;
pub mod validator;

#[cfg(test)]
pub mod testing;

pub use adapter::{SourceAdapter, SourceHandle};
pub use catalogue::{CatalogueSource, Chapter, Filter, FilterList, Manga, MangasPage, Page};
pub use converter::{BytecodeConverter, Dex2JarCommand};
pub use foreign::{ClassLoaderHost, ForeignError, ForeignValue, LoaderScope};
pub use manager::LifecycleManager;
pub use registry::SourceRegistry;
pub use repository::{ExtensionListing, ExtensionUpdate, RepositoryDescriptor, RepositoryStore};
pub use runtime::{create_runtime_loader, LoaderContext, Platform, RuntimeLoader};
pub use types::{ExtensionInfo, ExtensionMetadata, ExtensionState, LoadedExtension, ValidationOutcome};
pub use validator::PackageValidator;
