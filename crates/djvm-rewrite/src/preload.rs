//! Eager rewriting of archives that request it.
//!
//! An archive carrying the `META-INF/DJVM-preload` resource asks for every
//! class it contains to be rewritten at configuration time. The preloader
//! walks the archive's `.class` entries through the loader and then chases
//! referenced classes until the transitive closure is cached.

use std::sync::Arc;

use crate::loader::{SandboxClassLoader, SandboxLoadError};

/// What a preload pass accomplished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PreloadSummary {
    /// Archives that carried the preload manifest.
    pub archives: usize,
    /// Classes rewritten or found cached directly from archive entries.
    pub classes: usize,
    /// Additional classes defined while chasing references.
    pub chased: usize,
}

/// Eagerly rewrite every class of every preload-flagged archive reachable
/// from `loader`'s configuration, then resolve references to closure.
pub fn preload(loader: &Arc<SandboxClassLoader>) -> Result<PreloadSummary, SandboxLoadError> {
    let config = loader.configuration();
    let resolver = config.resolver();
    let mut summary = PreloadSummary::default();

    for archive in config.source().preload_archives() {
        summary.archives += 1;
        tracing::info!(archive = %archive.display(), "preloading archive");
        for host_name in config.source().archive_class_names(&archive)? {
            let sandbox_name = resolver.resolve_type(&host_name);
            let class = loader.load_sandbox_class(&sandbox_name)?;
            summary.classes += 1;
            if let Some(references) = class.references() {
                summary.chased += loader.resolve_references(references)?;
            }
        }
    }
    Ok(summary)
}
