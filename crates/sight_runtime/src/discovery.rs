//! Module discovery
//!
//! Scans search paths for module directories, i.e. immediate subdirectories
//! holding a `module.toml`.
//!
//! ```text
//! modules/
//! ├── sight.io/
//! │   └── module.toml   <- Found
//! └── sight.viz/
//!     └── module.toml   <- Found
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::descriptor::{ModuleDescriptor, DESCRIPTOR_FILE};
use crate::error::DiscoveryError;

/// Outcome of a scan: usable descriptors plus the ones that were skipped
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub modules: Vec<ModuleDescriptor>,
    pub errors: Vec<DiscoveryError>,
}

/// Scan `search_paths` for module descriptors.
///
/// A malformed descriptor is logged and skipped; it never aborts the scan.
/// A missing search path yields nothing. When two descriptors share an id,
/// the first one found wins.
pub async fn discover(search_paths: &[PathBuf]) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();
    let mut seen = HashSet::new();

    for search_path in search_paths {
        let mut found = match scan_directory(search_path, &mut report.errors).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(path = %search_path.display(), error = %e, "Failed to scan module path");
                report.errors.push(e);
                continue;
            }
        };
        // Directory iteration order is platform dependent
        found.sort_by(|a, b| a.location.cmp(&b.location));

        for descriptor in found {
            if !seen.insert(descriptor.id.clone()) {
                tracing::warn!(module = %descriptor.id, "Duplicate module id, keeping the first one");
                continue;
            }
            tracing::debug!(module = %descriptor.id, version = %descriptor.version, "Discovered module");
            report.modules.push(descriptor);
        }
    }

    report
}

async fn scan_directory(
    dir: &Path,
    errors: &mut Vec<DiscoveryError>,
) -> Result<Vec<ModuleDescriptor>, DiscoveryError> {
    let mut found = Vec::new();

    if !dir.exists() {
        tracing::debug!(path = %dir.display(), "Module path does not exist");
        return Ok(found);
    }

    let io_error = |source| DiscoveryError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error)?;

    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let descriptor_path = path.join(DESCRIPTOR_FILE);
        if !descriptor_path.exists() {
            continue;
        }

        match load_descriptor(&descriptor_path).await {
            Ok(descriptor) => found.push(descriptor),
            Err(e) => {
                tracing::warn!("Skipping module descriptor: {}", e);
                errors.push(e);
            }
        }
    }

    Ok(found)
}

/// Read and parse one descriptor file
pub async fn load_descriptor(path: &Path) -> Result<ModuleDescriptor, DiscoveryError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DiscoveryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    ModuleDescriptor::parse(&content, path)
}
