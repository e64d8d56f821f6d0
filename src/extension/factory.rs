//! Source factory resolution
//!
//! An entry class is either a source itself or a factory producing several sources.
//! Factories are recognised structurally, by the simple name of an implemented
//! interface, since the interface type lives in the extension's own class space.

use super::foreign::{ForeignError, ForeignRef, ForeignValue};

const FACTORY_INTERFACE: &str = "SourceFactory";
const CREATE_SOURCES: &str = "createSources";

fn simple_name(fqcn: &str) -> &str {
    fqcn.rsplit(['.', '$']).next().unwrap_or(fqcn)
}

pub fn is_source_factory(instance: &ForeignRef) -> bool {
    instance
        .interfaces()
        .iter()
        .any(|iface| simple_name(iface) == FACTORY_INTERFACE)
}

/// Expand an instantiated entry class into its foreign source objects
///
/// A factory may legitimately produce no sources. Non-object items in the produced list
/// are skipped.
pub fn resolve(instance: ForeignRef) -> Result<Vec<ForeignRef>, ForeignError> {
    if !is_source_factory(&instance) {
        return Ok(vec![instance]);
    }

    let produced = instance.invoke(CREATE_SOURCES, &[])?;
    let items = match produced {
        ForeignValue::List(items) => items,
        ForeignValue::Null => Vec::new(),
        other => {
            return Err(ForeignError::TypeMismatch {
                expected: "List".to_string(),
                found: other.type_name().to_string(),
            })
        }
    };

    let mut sources = Vec::with_capacity(items.len());
    for item in items {
        match item {
            ForeignValue::Object(source) => sources.push(source),
            other => tracing::warn!(
                factory = %instance.class_name(),
                found = other.type_name(),
                "Skipping non-object entry produced by source factory"
            ),
        }
    }

    tracing::debug!(
        factory = %instance.class_name(),
        count = sources.len(),
        "Source factory resolved"
    );

    Ok(sources)
}
