//! Merge engine: combine a base container with auxiliary containers.
//!
//! Two auxiliary shapes exist. Probe satellites contribute one probe's
//! derived signals (an LFP holder plus a current-source-density result)
//! whose electrode references must be rewritten against the base
//! container's session-wide electrode table. Plane satellites each
//! contribute one whole imaging plane with its own processing results, to
//! be combined into one multi-plane recording sharing a single device.
//!
//! The engine is stateless between invocations. A failure aborts the
//! whole merge for that session; there is no partial-merge resumption,
//! because a partially merged probe is worse than no merge at all.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::{RepackError, Result};
use crate::model::{
    insert_unique, Acquisition, Container, DataInterface, Device, ElectrodeTableRegion,
    ImagingPlane, ProcessingModule,
};
use crate::resolve::{remap_region_indices, resolve_indices};

/// Name of the processing module shared by all probes merged into one
/// base container. Created once, on the first auxiliary.
pub const ECEPHYS_MODULE: &str = "ecephys";

const ECEPHYS_MODULE_DESCRIPTION: &str =
    "Processed electrophysiology data: LFP and current source density";

pub fn plane_name(index: usize) -> String {
    format!("imaging_plane_{index}")
}

pub fn plane_module_name(index: usize) -> String {
    format!("ophys_plane_{index}")
}

pub fn plane_metadata_name(index: usize) -> String {
    format!("metadata_plane_{index}")
}

/// Merge one probe satellite into the base session container.
///
/// The probe's LFP electrical series get a fresh electrode region built
/// against the base table, its CSD result is renamed to embed the probe's
/// own identifier, and both land in the shared `ecephys` processing
/// module. Any electrode that does not resolve to exactly one base row
/// aborts the merge before the base is touched.
pub fn merge_probe(base: &mut Container, mut probe: Container) -> Result<()> {
    check_compatible(base, &probe)?;

    let mapping = resolve_indices(&probe.electrodes.ids, &base.electrodes.ids)?;
    debug!(
        probe = %probe.identifier,
        electrodes = probe.electrodes.len(),
        "resolved probe electrodes against base table"
    );

    let lfp_key = single_lfp_key(&probe)?;
    let lfp = match probe.acquisition.remove(&lfp_key) {
        Some(Acquisition::Lfp(lfp)) => lfp,
        _ => {
            return Err(RepackError::Precondition(format!(
                "acquisition '{lfp_key}' vanished from '{}'",
                probe.identifier
            )))
        }
    };

    let mut remapped = lfp;
    let series: Vec<String> = remapped.electrical_series.keys().cloned().collect();
    for name in series {
        if let Some(es) = remapped.electrical_series.remove(&name) {
            let indices = remap_region_indices(&es.electrodes.indices, &mapping)?;
            let region = ElectrodeTableRegion::new(&es.electrodes.description, indices);
            remapped.electrical_series.insert(name, es.with_region(region));
        }
    }

    let csd = take_single_csd(&mut probe)?;
    let csd = csd.renamed(&format!("probe_{}_ecephys_csd", probe.identifier));

    let module = base
        .processing
        .entry(ECEPHYS_MODULE.to_string())
        .or_insert_with(|| ProcessingModule::new(ECEPHYS_MODULE, ECEPHYS_MODULE_DESCRIPTION));
    insert_unique(&mut module.interfaces, DataInterface::Lfp(remapped), ECEPHYS_MODULE)?;
    insert_unique(&mut module.interfaces, DataInterface::Csd(csd), ECEPHYS_MODULE)?;

    info!(probe = %probe.identifier, base = %base.identifier, "merged probe into base");
    Ok(())
}

/// Merge an ordered list of per-plane containers into one multi-plane
/// container. The first entry is the base; its identifier names the
/// output and becomes the merged container's session ID. Every input
/// must carry exactly one device, one imaging plane, one processing
/// module and one per-plane lab-metadata object.
pub fn merge_planes(containers: Vec<Container>) -> Result<Container> {
    let mut inputs = containers.into_iter();
    let mut base = inputs.next().ok_or_else(|| {
        RepackError::Precondition("plane merge requires at least one container".to_string())
    })?;

    check_plane_cardinality(&base)?;

    // The base keeps its own single device; every subsequent plane is
    // retargeted at it.
    let shared_device: Device = base
        .devices
        .values()
        .next()
        .cloned()
        .ok_or_else(|| cardinality_error(&base.identifier, "device", 0))?;

    // Slot 1 is always the base; its own plane, module and metadata get
    // the canonical first-slot names.
    let plane = take_single(&mut base.imaging_planes, "imaging plane", &base.identifier)?;
    let plane = plane.renamed(&plane_name(1));
    let mut module = take_single(&mut base.processing, "processing module", &base.identifier)?;
    module = module.renamed(&plane_module_name(1));
    rewrite_plane_references(&mut module, &plane);
    let metadata = take_single(&mut base.lab_meta_data, "lab metadata object", &base.identifier)?;
    let metadata = metadata.renamed(&plane_metadata_name(1));

    insert_unique(&mut base.imaging_planes, plane, "imaging planes")?;
    insert_unique(&mut base.processing, module, "processing modules")?;
    insert_unique(&mut base.lab_meta_data, metadata, "lab metadata")?;

    for (offset, mut satellite) in inputs.enumerate() {
        let index = offset + 2;
        check_plane_cardinality(&satellite)?;
        debug!(
            satellite = %satellite.identifier,
            index,
            "attaching plane satellite"
        );

        let plane = take_single(
            &mut satellite.imaging_planes,
            "imaging plane",
            &satellite.identifier,
        )?;
        let plane = plane.renamed(&plane_name(index)).with_device(&shared_device);

        let mut module = take_single(
            &mut satellite.processing,
            "processing module",
            &satellite.identifier,
        )?;
        module = module.renamed(&plane_module_name(index));
        rewrite_plane_references(&mut module, &plane);

        let metadata = take_single(
            &mut satellite.lab_meta_data,
            "lab metadata object",
            &satellite.identifier,
        )?;
        let metadata = metadata.renamed(&plane_metadata_name(index));

        insert_unique(&mut base.imaging_planes, plane, "imaging planes")?;
        insert_unique(&mut base.processing, module, "processing modules")?;
        insert_unique(&mut base.lab_meta_data, metadata, "lab metadata")?;
    }

    // The combined file is named by its identifier downstream.
    base.session_id = Some(base.identifier.clone());

    info!(
        base = %base.identifier,
        planes = base.imaging_planes.len(),
        "plane merge complete"
    );
    Ok(base)
}

/// A probe satellite must describe the same recording session as the
/// base: same session start, same timestamps reference, and the same
/// subject when both carry one.
fn check_compatible(base: &Container, probe: &Container) -> Result<()> {
    if probe.session_start_time != base.session_start_time {
        return Err(RepackError::Precondition(format!(
            "session start of '{}' ({}) does not match base '{}' ({})",
            probe.identifier, probe.session_start_time, base.identifier, base.session_start_time
        )));
    }
    if probe.timestamps_reference_time != base.timestamps_reference_time {
        return Err(RepackError::Precondition(format!(
            "timestamps reference of '{}' ({}) does not match base '{}' ({})",
            probe.identifier,
            probe.timestamps_reference_time,
            base.identifier,
            base.timestamps_reference_time
        )));
    }
    if let (Some(base_subject), Some(probe_subject)) = (&base.subject, &probe.subject) {
        if base_subject.subject_id != probe_subject.subject_id {
            return Err(RepackError::Precondition(format!(
                "subject '{}' of '{}' does not match base subject '{}'",
                probe_subject.subject_id, probe.identifier, base_subject.subject_id
            )));
        }
    }
    Ok(())
}

fn single_lfp_key(probe: &Container) -> Result<String> {
    let keys: Vec<&String> = probe
        .acquisition
        .iter()
        .filter(|(_, a)| matches!(a, Acquisition::Lfp(_)))
        .map(|(k, _)| k)
        .collect();
    if keys.len() != 1 {
        return Err(cardinality_error(
            &probe.identifier,
            "LFP acquisition",
            keys.len(),
        ));
    }
    Ok(keys[0].clone())
}

fn take_single_csd(probe: &mut Container) -> Result<crate::model::CurrentSourceDensity> {
    let mut found: Vec<(String, String)> = Vec::new();
    for (module_name, module) in &probe.processing {
        for (iface_name, iface) in &module.interfaces {
            if matches!(iface, DataInterface::Csd(_)) {
                found.push((module_name.clone(), iface_name.clone()));
            }
        }
    }
    if found.len() != 1 {
        return Err(cardinality_error(
            &probe.identifier,
            "current-source-density object",
            found.len(),
        ));
    }
    let (module_name, iface_name) = found.remove(0);
    let module = probe.processing.get_mut(&module_name).ok_or_else(|| {
        cardinality_error(&probe.identifier, "current-source-density object", 0)
    })?;
    match module.interfaces.remove(&iface_name) {
        Some(DataInterface::Csd(csd)) => Ok(csd),
        _ => Err(cardinality_error(
            &probe.identifier,
            "current-source-density object",
            0,
        )),
    }
}

fn check_plane_cardinality(container: &Container) -> Result<()> {
    expect_one(&container.identifier, "device", container.devices.len())?;
    expect_one(
        &container.identifier,
        "imaging plane",
        container.imaging_planes.len(),
    )?;
    expect_one(
        &container.identifier,
        "processing module",
        container.processing.len(),
    )?;
    expect_one(
        &container.identifier,
        "lab metadata object",
        container.lab_meta_data.len(),
    )
}

fn expect_one(file: &str, what: &str, found: usize) -> Result<()> {
    if found == 1 {
        Ok(())
    } else {
        Err(cardinality_error(file, what, found))
    }
}

fn cardinality_error(file: &str, what: &str, found: usize) -> RepackError {
    RepackError::Precondition(format!(
        "expected exactly one {what} in '{file}', found {found}"
    ))
}

fn take_single<T>(map: &mut BTreeMap<String, T>, what: &str, file: &str) -> Result<T> {
    if map.len() != 1 {
        return Err(cardinality_error(file, what, map.len()));
    }
    std::mem::take(map)
        .into_iter()
        .next()
        .map(|(_, value)| value)
        .ok_or_else(|| cardinality_error(file, what, 0))
}

/// Repoint every plane-segmentation table inside a processing module at
/// a freshly reattached plane. A dangling reference to the orphaned
/// original plane is a correctness bug, not a recoverable condition.
fn rewrite_plane_references(module: &mut ProcessingModule, plane: &ImagingPlane) {
    for iface in module.interfaces.values_mut() {
        if let DataInterface::ImageSegmentation(seg) = iface {
            let names: Vec<String> = seg.plane_segmentations.keys().cloned().collect();
            for name in names {
                if let Some(table) = seg.plane_segmentations.remove(&name) {
                    seg.plane_segmentations
                        .insert(name, table.with_imaging_plane(plane));
                }
            }
        }
    }
}
