//! Reference resolver: index remapping between two enumerations of the
//! same logical identity space.
//!
//! An [`ElectrodeTableRegion`](crate::model::ElectrodeTableRegion) stores
//! row indices, not IDs, so a series moved to a container with a different
//! (superset) electrode table must have every index rewritten. The
//! resolver computes that rewrite: for each source ID, the position of the
//! same ID in the target table. Zero matches or more than one match is
//! fatal, because it means the auxiliary container is not compatible with
//! the base recording and a partial remap would silently corrupt
//! references.

use std::collections::HashMap;

use crate::error::{RepackError, Result};

/// For each `source_ids[i]`, find the unique `j` with
/// `target_ids[j] == source_ids[i]` and return the mapping `i -> j`.
///
/// A reverse index over `target_ids` keeps this O(|source| + |target|).
pub fn resolve_indices(source_ids: &[i64], target_ids: &[i64]) -> Result<Vec<usize>> {
    let mut positions: HashMap<i64, Vec<usize>> = HashMap::with_capacity(target_ids.len());
    for (j, id) in target_ids.iter().enumerate() {
        positions.entry(*id).or_default().push(j);
    }

    let mut mapping = Vec::with_capacity(source_ids.len());
    for id in source_ids {
        let matches = positions.get(id).map_or(&[][..], Vec::as_slice);
        if matches.len() != 1 {
            return Err(RepackError::ReferenceIntegrity {
                id: *id,
                matches: matches.len(),
            });
        }
        mapping.push(matches[0]);
    }
    Ok(mapping)
}

/// Rewrite a region's index list through a mapping produced by
/// [`resolve_indices`]. Indices out of range of the source table are a
/// corrupt reference in the input file.
pub fn remap_region_indices(indices: &[usize], mapping: &[usize]) -> Result<Vec<usize>> {
    indices
        .iter()
        .map(|&old| {
            mapping.get(old).copied().ok_or_else(|| {
                RepackError::Precondition(format!(
                    "region index {old} out of range for a table of {} rows",
                    mapping.len()
                ))
            })
        })
        .collect()
}
