//! Decode/encode boundary for container files.
//!
//! The merge engine and batch driver only ever see [`Container`] values;
//! the physical encodings stay behind the [`ContainerStore`] trait. The
//! crate ships a JSON tree store used by the driver and the test suite.
//! Decoding either yields a fully populated container or fails with a
//! `Format` error; there is no partially populated result.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{RepackError, Result};
use crate::model::{verify_unique_identities, Container, IdentityManager};

/// Export knobs. This system always exports full copies of the data
/// payloads; link-style exports that share storage with the source file
/// are not produced here.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub copy_data: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { copy_data: true }
    }
}

/// One physical encoding of the container format.
pub trait ContainerStore {
    fn decode(&self, path: &Path) -> Result<Container>;
    fn encode(&self, container: &Container, path: &Path, options: &ExportOptions) -> Result<()>;
}

/// JSON tree encoding of a container.
#[derive(Debug, Default)]
pub struct JsonStore;

impl ContainerStore for JsonStore {
    fn decode(&self, path: &Path) -> Result<Container> {
        let bytes = fs::read(path)?;
        let container: Container = serde_json::from_slice(&bytes).map_err(|e| {
            RepackError::Format(format!("'{}' is not a valid container file: {e}", path.display()))
        })?;
        check_electrode_columns(&container, path)?;
        debug!(path = %path.display(), identifier = %container.identifier, "decoded container");
        Ok(container)
    }

    fn encode(&self, container: &Container, path: &Path, options: &ExportOptions) -> Result<()> {
        // Last integrity gate before anything hits disk.
        verify_unique_identities(container)?;
        if !options.copy_data {
            return Err(RepackError::Precondition(
                "link-style export is not supported; data must be copied".to_string(),
            ));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(container)?;
        fs::write(path, bytes)?;
        debug!(path = %path.display(), identifier = %container.identifier, "encoded container");
        Ok(())
    }
}

/// A columnar electrode table is only well formed when every column has
/// one entry per row. A ragged table has no usable row indices, so it is
/// rejected at decode time like any other malformed file.
fn check_electrode_columns(container: &Container, path: &Path) -> Result<()> {
    let table = &container.electrodes;
    let rows = table.ids.len();
    let columns = [
        ("group_name", table.group_names.len()),
        ("location", table.locations.len()),
        ("filtering", table.filtering.len()),
    ];
    for (column, len) in columns {
        if len != rows {
            return Err(RepackError::Format(format!(
                "'{}' has a ragged electrode table: {rows} ids but {len} {column} entries",
                path.display()
            )));
        }
    }
    Ok(())
}

/// Decode several containers for one merge, registering every object of
/// every tree with a single identity manager. An identity collision
/// across the set is a fatal precondition failure.
pub fn open_shared(
    store: &dyn ContainerStore,
    paths: &[PathBuf],
    manager: &mut IdentityManager,
) -> Result<Vec<Container>> {
    let mut containers = Vec::with_capacity(paths.len());
    for path in paths {
        let container = store.decode(path)?;
        manager.register_tree(&container)?;
        containers.push(container);
    }
    Ok(containers)
}

/// Output path for a converted container: the source file name with the
/// target encoding's suffix added.
pub fn output_path(output_dir: &Path, source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{name}.zarr"))
}
