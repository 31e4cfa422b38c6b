//! End-to-end merge and re-encode scenarios.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, TimeZone};
use tempfile::tempdir;
use uuid::Uuid;

use nwb_repack::codec::{ContainerStore, ExportOptions, JsonStore};
use nwb_repack::compare::{compare_containers, CompareOptions};
use nwb_repack::merge::{merge_planes, merge_probe, plane_name, ECEPHYS_MODULE};
use nwb_repack::model::{
    verify_unique_identities, Acquisition, ArrayData, Container, CurrentSourceDensity,
    DataInterface, Device, ElectricalSeries, ElectrodeTableRegion, ImageSegmentation,
    ImagingPlane, LabMetadata, Lfp, PlaneSegmentation, ProcessingModule, TimeSeries,
};

fn start_time() -> DateTime<FixedOffset> {
    FixedOffset::west_opt(8 * 3600)
        .unwrap()
        .with_ymd_and_hms(2019, 1, 8, 14, 30, 0)
        .unwrap()
}

fn ephys_base() -> Container {
    let mut base = Container::new("session_715093703", start_time());
    for id in [100, 101, 102] {
        base.electrodes.push_row(id, "probeA", "VISp", "high pass");
    }
    base
}

fn probe(name: &str, ids: &[i64], values: &[f64]) -> Container {
    let mut probe = Container::new(name, start_time());
    for &id in ids {
        probe.electrodes.push_row(id, name, "VISl", "high pass");
    }

    let mut lfp = Lfp::new(&format!("probe_{name}_lfp"));
    lfp.electrical_series.insert(
        format!("probe_{name}_lfp_data"),
        ElectricalSeries {
            object_id: Uuid::new_v4(),
            name: format!("probe_{name}_lfp_data"),
            description: None,
            data: ArrayData::F64(values.to_vec()),
            timestamps: Some(vec![0.0, 0.5]),
            starting_time: None,
            rate: None,
            electrodes: ElectrodeTableRegion::new("probe electrodes", (0..ids.len()).collect()),
        },
    );
    probe
        .acquisition
        .insert(lfp.name.clone(), Acquisition::Lfp(lfp));

    let mut module = ProcessingModule::new("current_source_density", "CSD");
    module.interfaces.insert(
        "ecephys_csd".into(),
        DataInterface::Csd(CurrentSourceDensity {
            object_id: Uuid::new_v4(),
            name: "ecephys_csd".into(),
            description: None,
            time_series: TimeSeries {
                object_id: Uuid::new_v4(),
                name: "ecephys_csd".into(),
                description: None,
                unit: Some("V/m^2".into()),
                data: ArrayData::F64(values.to_vec()),
                timestamps: Some(vec![0.0, 0.5]),
                starting_time: None,
                rate: None,
            },
        }),
    );
    probe.processing.insert(module.name.clone(), module);
    probe
}

#[test]
fn two_probe_merge_survives_a_re_encode_round_trip() {
    let mut base = ephys_base();
    merge_probe(&mut base, probe("probeA", &[100, 101], &[1.0, 2.0])).unwrap();
    merge_probe(&mut base, probe("probeB", &[101, 102], &[3.0, 4.0])).unwrap();

    let module = &base.processing[ECEPHYS_MODULE];
    assert_eq!(module.interfaces.len(), 4);
    assert!(module.interfaces.contains_key("probe_probeA_ecephys_csd"));
    assert!(module.interfaces.contains_key("probe_probeB_ecephys_csd"));

    let regions: BTreeMap<&str, Vec<usize>> = module
        .interfaces
        .iter()
        .filter_map(|(k, v)| match v {
            DataInterface::Lfp(lfp) => {
                let series = lfp.electrical_series.values().next().unwrap();
                Some((k.as_str(), series.electrodes.indices.clone()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(regions["probe_probeA_lfp"], vec![0, 1]);
    assert_eq!(regions["probe_probeB_lfp"], vec![1, 2]);

    verify_unique_identities(&base).unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("session_715093703.nwb.json.zarr");
    let store = JsonStore;
    store.encode(&base, &path, &ExportOptions::default()).unwrap();
    let decoded = store.decode(&path).unwrap();

    let found = compare_containers(&base, &decoded, &CompareOptions::default());
    assert!(found.is_empty(), "round trip discrepancies: {found:?}");
}

fn plane_file(name: &str, device_name: &str, depth: u32) -> Container {
    let mut container = Container::new(name, start_time());
    let device = Device::new(device_name);
    let plane = ImagingPlane {
        object_id: Uuid::new_v4(),
        name: format!("{name}_plane"),
        description: format!("(512, 512) field of view in VISp at depth {depth} um"),
        indicator: "GCaMP6f".into(),
        excitation_lambda: 910.0,
        imaging_rate: 11.0,
        location: "VISp".into(),
        device_name: device.name.clone(),
        device_id: device.object_id,
    };
    let mut seg = ImageSegmentation {
        object_id: Uuid::new_v4(),
        name: "image_segmentation".into(),
        plane_segmentations: BTreeMap::new(),
    };
    seg.plane_segmentations.insert(
        "cell_specimen_table".into(),
        PlaneSegmentation {
            object_id: Uuid::new_v4(),
            name: "cell_specimen_table".into(),
            description: "segmented cells".into(),
            imaging_plane_name: plane.name.clone(),
            imaging_plane_id: plane.object_id,
            roi_ids: vec![1, 2],
        },
    );
    let mut module = ProcessingModule::new("ophys", "optical physiology results");
    module
        .interfaces
        .insert(seg.name.clone(), DataInterface::ImageSegmentation(seg));

    container.devices.insert(device.name.clone(), device);
    container.imaging_planes.insert(plane.name.clone(), plane);
    container.processing.insert(module.name.clone(), module);
    container.lab_meta_data.insert(
        "plane_metadata".into(),
        LabMetadata {
            object_id: Uuid::new_v4(),
            name: "plane_metadata".into(),
            attrs: BTreeMap::new(),
        },
    );
    container
}

#[test]
fn four_plane_merge_round_trips_with_shared_device() {
    let merged = merge_planes(vec![
        plane_file("ophys_experiment_1", "MESO.1", 75),
        plane_file("ophys_experiment_2", "MESO.1", 175),
        plane_file("ophys_experiment_3", "MESO.1", 275),
        plane_file("ophys_experiment_4", "MESO.1", 375),
    ])
    .unwrap();

    assert_eq!(merged.imaging_planes.len(), 4);
    assert_eq!(merged.devices.len(), 1);
    let device_id = merged.devices["MESO.1"].object_id;
    for i in 1..=4 {
        assert_eq!(merged.imaging_planes[&plane_name(i)].device_id, device_id);
    }

    verify_unique_identities(&merged).unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("behavior_ophys_session_1.nwb.json.zarr");
    let store = JsonStore;
    store
        .encode(&merged, &path, &ExportOptions::default())
        .unwrap();
    let decoded = store.decode(&path).unwrap();

    let found = compare_containers(&merged, &decoded, &CompareOptions::default());
    assert!(found.is_empty(), "round trip discrepancies: {found:?}");
}
