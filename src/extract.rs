//! Metadata extraction from container contents.
//!
//! These helpers pull schema-record inputs out of a decoded container,
//! cross-checked against the external session catalog where a pairing
//! mistake would corrupt every downstream record. Identity mismatches
//! (subject ID, instrument ID) are fatal; data-quality oddities (catalog
//! timestamp drift, multiple reward volumes, unmapped anatomical
//! locations) are warnings that prefer the container's own values.

use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::catalog::SessionRow;
use crate::error::{RepackError, Result};
use crate::model::{Acquisition, ArrayData, Container, DataInterface, DynamicTable};
use crate::records::Modality;

#[allow(clippy::expect_used)]
static AGE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^P(\d+)D$").expect("pattern is valid"));

#[allow(clippy::expect_used)]
static PLANE_DESCRIPTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\((\d+),\s*(\d+)\) field of view in (\w+) at depth (\d+) um$")
        .expect("pattern is valid")
});

/// One atlas structure: standard acronym plus full name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Structure {
    pub acronym: &'static str,
    pub name: &'static str,
}

/// Reference atlas structures reachable by the probes in these datasets.
/// Lookup is by case-insensitive acronym.
static ATLAS: Lazy<HashMap<String, Structure>> = Lazy::new(|| {
    const STRUCTURES: &[Structure] = &[
        Structure { acronym: "VIS", name: "Visual areas" },
        Structure { acronym: "VISp", name: "Primary visual area" },
        Structure { acronym: "VISl", name: "Lateral visual area" },
        Structure { acronym: "VISal", name: "Anterolateral visual area" },
        Structure { acronym: "VISam", name: "Anteromedial visual area" },
        Structure { acronym: "VISpm", name: "Posteromedial visual area" },
        Structure { acronym: "VISrl", name: "Rostrolateral visual area" },
        Structure { acronym: "VISpl", name: "Posterolateral visual area" },
        Structure { acronym: "CA1", name: "Field CA1" },
        Structure { acronym: "CA2", name: "Field CA2" },
        Structure { acronym: "CA3", name: "Field CA3" },
        Structure { acronym: "DG", name: "Dentate gyrus" },
        Structure { acronym: "SUB", name: "Subiculum" },
        Structure { acronym: "ProS", name: "Prosubiculum" },
        Structure { acronym: "HPF", name: "Hippocampal formation" },
        Structure { acronym: "LGd", name: "Dorsal part of the lateral geniculate complex" },
        Structure { acronym: "LGv", name: "Ventral part of the lateral geniculate complex" },
        Structure { acronym: "LP", name: "Lateral posterior nucleus of the thalamus" },
        Structure { acronym: "PO", name: "Posterior complex of the thalamus" },
        Structure { acronym: "TH", name: "Thalamus" },
        Structure { acronym: "APN", name: "Anterior pretectal nucleus" },
        Structure { acronym: "MB", name: "Midbrain" },
        Structure { acronym: "SCig", name: "Superior colliculus, intermediate gray layer" },
        Structure { acronym: "MGm", name: "Medial geniculate complex, medial part" },
        Structure { acronym: "MGv", name: "Medial geniculate complex, ventral part" },
        Structure { acronym: "Eth", name: "Ethmoid nucleus of the thalamus" },
        Structure { acronym: "POL", name: "Posterior limiting nucleus of the thalamus" },
    ];
    STRUCTURES
        .iter()
        .map(|s| (s.acronym.to_uppercase(), *s))
        .collect()
});

/// Case-insensitive atlas lookup by acronym.
pub fn atlas_structure(acronym: &str) -> Option<Structure> {
    ATLAS.get(&acronym.to_uppercase()).copied()
}

/// Subject ID from the container, cross-checked against the catalog row.
/// A mismatch means the wrong file was paired with the wrong row; nothing
/// downstream can be trusted after that, so it is fatal.
pub fn subject_id(container: &Container, row: Option<&SessionRow>) -> Result<String> {
    let subject = container.subject.as_ref().ok_or_else(|| {
        RepackError::Precondition(format!("'{}' carries no subject", container.identifier))
    })?;
    if let Some(row) = row {
        if row.mouse_id != subject.subject_id {
            return Err(RepackError::Precondition(format!(
                "subject_id mismatch: container '{}' has '{}', catalog row has '{}'",
                container.identifier, subject.subject_id, row.mouse_id
            )));
        }
    }
    Ok(subject.subject_id.clone())
}

/// Birth date computed from the subject's age-duration string and the
/// session start, truncated to a date.
pub fn subject_date_of_birth(container: &Container) -> Result<NaiveDate> {
    let subject = container.subject.as_ref().ok_or_else(|| {
        RepackError::Precondition(format!("'{}' carries no subject", container.identifier))
    })?;
    let captures = AGE_PATTERN.captures(&subject.age).ok_or_else(|| {
        RepackError::Parse(format!(
            "unable to parse age: expected 'P<days>D', got '{}'",
            subject.age
        ))
    })?;
    let days: i64 = captures[1]
        .parse()
        .map_err(|_| RepackError::Parse(format!("age day count out of range: '{}'", subject.age)))?;
    Ok((container.session_start_time - Duration::days(days)).date_naive())
}

/// Session start time, cross-checked against the catalog's recorded
/// acquisition date to whole-second granularity in UTC. On mismatch,
/// warn and keep the container's own value: the container is ground
/// truth, the catalog a secondary index.
pub fn session_start_time(
    container: &Container,
    row: &SessionRow,
) -> Result<DateTime<FixedOffset>> {
    let catalog_time = DateTime::parse_from_rfc3339(&row.date_of_acquisition).map_err(|e| {
        RepackError::Parse(format!(
            "catalog date_of_acquisition '{}' is not a valid timestamp: {e}",
            row.date_of_acquisition
        ))
    })?;
    let catalog_utc = whole_second_utc(catalog_time);
    let container_utc = whole_second_utc(container.session_start_time);
    if catalog_utc != container_utc {
        warn!(
            catalog = %catalog_utc,
            container = %container_utc,
            "session_start_time mismatch, using container value"
        );
    }
    Ok(container.session_start_time)
}

fn whole_second_utc(time: DateTime<FixedOffset>) -> DateTime<Utc> {
    let utc = time.with_timezone(&Utc);
    utc.with_nanosecond(0).unwrap_or(utc)
}

/// Instrument ID: the container's first device name, cross-checked
/// against the catalog's equipment name. Mismatch is fatal, same policy
/// as the subject-ID check.
pub fn instrument_id(container: &Container, row: &SessionRow) -> Result<String> {
    let instrument = container.devices.keys().next().cloned().ok_or_else(|| {
        RepackError::Precondition(format!("'{}' carries no devices", container.identifier))
    })?;
    if row.equipment_name != instrument {
        return Err(RepackError::Precondition(format!(
            "instrument_id mismatch: container '{}' has '{}', catalog row has '{}'",
            container.identifier, instrument, row.equipment_name
        )));
    }
    Ok(instrument)
}

fn reward_column(container: &Container) -> Option<&[f64]> {
    container
        .trials()
        .and_then(|t| t.column("reward_volume"))
        .and_then(ArrayData::as_f64)
}

/// Total reward dispensed across all trials. A table with no reward
/// column (or no trials table at all) has no reward field, represented
/// as absent rather than zero.
pub fn total_reward_volume(container: &Container) -> Option<f64> {
    let column = reward_column(container)?;
    if column.is_empty() {
        return None;
    }
    Some(column.iter().sum())
}

/// The per-event reward volume: the unique positive value in the reward
/// column. Multiple distinct positive values reflect trial-type
/// variability the schema cannot represent yet; warn and pick the first.
pub fn individual_reward_volume(container: &Container) -> Option<f64> {
    let column = reward_column(container)?;
    let mut volumes: Vec<f64> = Vec::new();
    for &v in column {
        if v > 0.0 && !volumes.contains(&v) {
            volumes.push(v);
        }
    }
    if volumes.len() > 1 {
        warn!(?volumes, "multiple non-zero reward volumes found, using the first one");
    }
    volumes.first().copied()
}

/// Atlas structures for the electrode locations recorded under one
/// device. Unmapped location strings are dropped with a warning.
pub fn brain_locations(container: &Container, device_name: &str) -> Vec<Structure> {
    let mut locations: Vec<&str> = Vec::new();
    let table = &container.electrodes;
    for (group, location) in table.group_names.iter().zip(&table.locations) {
        let location = location.as_str();
        if group == device_name && !location.is_empty() && !locations.contains(&location) {
            locations.push(location);
        }
    }

    let structures: Vec<Structure> = locations
        .iter()
        .filter_map(|l| atlas_structure(l))
        .collect();
    if structures.len() != locations.len() {
        warn!(
            device = device_name,
            ?locations,
            "not all probe locations found in the atlas"
        );
    }
    structures
}

/// The visual-cortex structure a probe targets: the structures whose
/// acronym carries the visual-area prefix. More than one entry means
/// the probe crossed functional subdivisions finer than the atlas
/// represents; warn and pick the first after sorting.
pub fn targeted_structure(structures: &[Structure]) -> Option<Structure> {
    let mut targeted: Vec<Structure> = structures
        .iter()
        .filter(|s| s.acronym.starts_with("VIS"))
        .copied()
        .collect();
    targeted.sort();
    if targeted.len() > 1 {
        warn!(?targeted, "more than one visual area found, using the first after sorting");
    }
    targeted.first().copied()
}

/// Detect which modalities the container carries: spiking or electrical
/// series data, a trials table, imaging planes.
pub fn modalities(container: &Container) -> Vec<Modality> {
    let mut found = Vec::new();
    let has_units = container.units.as_ref().is_some_and(|u| !u.is_empty());
    // LFP can sit at acquisition level (probe satellites) or inside a
    // processing module (merged sessions).
    let has_electrical = container
        .acquisition
        .values()
        .any(|a| matches!(a, Acquisition::Lfp(_)))
        || container.processing.values().any(|m| {
            m.interfaces
                .values()
                .any(|i| matches!(i, DataInterface::Lfp(_)))
        });
    if has_units || has_electrical {
        found.push(Modality::Ecephys);
    }
    if container.trials().is_some_and(|t| !t.is_empty()) {
        found.push(Modality::Behavior);
    }
    if !container.imaging_planes.is_empty() {
        found.push(Modality::Pophys);
    }
    found
}

fn table_last_time(table: &DynamicTable) -> Option<f64> {
    if let Some(stops) = table.column("stop_time").and_then(ArrayData::as_f64) {
        return stops.last().copied();
    }
    table
        .column("spike_times")
        .and_then(ArrayData::as_f64)
        .and_then(|ts| ts.iter().copied().reduce(f64::max))
}

fn table_first_time(table: &DynamicTable) -> Option<f64> {
    if let Some(starts) = table.column("start_time").and_then(ArrayData::as_f64) {
        return starts.first().copied();
    }
    table
        .column("spike_times")
        .and_then(ArrayData::as_f64)
        .and_then(|ts| ts.iter().copied().reduce(f64::min))
}

fn time_bounds(container: &Container) -> Vec<(Option<f64>, Option<f64>)> {
    let mut bounds = Vec::new();
    for acq in container.acquisition.values() {
        match acq {
            Acquisition::TimeSeries(s) => bounds.push((s.first_time(), s.last_time())),
            Acquisition::Lfp(lfp) => {
                for es in lfp.electrical_series.values() {
                    bounds.push((es.first_time(), es.last_time()));
                }
            }
        }
    }
    for module in container.processing.values() {
        for iface in module.interfaces.values() {
            match iface {
                DataInterface::Series(s) => bounds.push((s.first_time(), s.last_time())),
                DataInterface::Csd(c) => {
                    bounds.push((c.time_series.first_time(), c.time_series.last_time()))
                }
                DataInterface::Lfp(lfp) => {
                    for es in lfp.electrical_series.values() {
                        bounds.push((es.first_time(), es.last_time()));
                    }
                }
                DataInterface::Table(t) => bounds.push((table_first_time(t), table_last_time(t))),
                DataInterface::ImageSegmentation(_) => {}
            }
        }
    }
    for table in container.intervals.values() {
        bounds.push((table_first_time(table), table_last_time(table)));
    }
    if let Some(units) = &container.units {
        bounds.push((table_first_time(units), table_last_time(units)));
    }
    bounds
}

/// Latest timestamp across all time series and time-bearing tables, in
/// seconds from the session start.
pub fn latest_time(container: &Container) -> Option<f64> {
    time_bounds(container)
        .into_iter()
        .filter_map(|(_, last)| last)
        .reduce(f64::max)
}

/// Earliest timestamp across all time series and time-bearing tables.
pub fn earliest_time(container: &Container) -> Option<f64> {
    time_bounds(container)
        .into_iter()
        .filter_map(|(first, _)| first)
        .reduce(f64::min)
}

pub fn data_stream_end_time(container: &Container) -> Option<DateTime<FixedOffset>> {
    latest_time(container).map(|t| container.session_start_time + seconds(t))
}

pub fn data_stream_start_time(container: &Container) -> Option<DateTime<FixedOffset>> {
    earliest_time(container).map(|t| container.session_start_time + seconds(t))
}

fn seconds(t: f64) -> Duration {
    Duration::milliseconds((t * 1000.0) as i64)
}

/// Field-of-view facts embedded in an imaging plane's description.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneFieldOfView {
    pub width: u32,
    pub height: u32,
    pub targeted_structure: String,
    pub depth_um: u32,
}

/// Parse a plane description of the fixed form
/// `"(W, H) field of view in STRUCT at depth D um"`.
pub fn parse_plane_description(description: &str) -> Result<PlaneFieldOfView> {
    let captures = PLANE_DESCRIPTION_PATTERN.captures(description).ok_or_else(|| {
        RepackError::Parse(format!(
            "imaging plane description does not match the expected pattern: '{description}'"
        ))
    })?;
    let number = |i: usize| -> Result<u32> {
        captures[i]
            .parse()
            .map_err(|_| RepackError::Parse(format!("value out of range in '{description}'")))
    };
    Ok(PlaneFieldOfView {
        width: number(1)?,
        height: number(2)?,
        targeted_structure: captures[3].to_string(),
        depth_um: number(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn start_time() -> DateTime<FixedOffset> {
        FixedOffset::west_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2019, 1, 8, 14, 30, 0)
            .unwrap()
    }

    fn subject() -> SubjectInfo {
        SubjectInfo {
            object_id: Uuid::new_v4(),
            subject_id: "457841".into(),
            species: "Mus musculus".into(),
            sex: "F".into(),
            age: "P160D".into(),
            genotype: "wt/wt".into(),
            strain: None,
            description: None,
        }
    }

    fn row() -> SessionRow {
        SessionRow {
            id: "715093703".into(),
            mouse_id: "457841".into(),
            date_of_acquisition: "2019-01-08T22:30:00+00:00".into(),
            equipment_name: "NP.1".into(),
            session_type: None,
            project_code: None,
            behavior_session_id: None,
            ophys_experiment_ids: Vec::new(),
        }
    }

    #[test]
    fn subject_id_cross_check_is_fatal_on_mismatch() {
        let mut container = Container::new("session_715093703", start_time());
        container.subject = Some(subject());
        assert_eq!(subject_id(&container, Some(&row())).unwrap(), "457841");

        let mut bad = row();
        bad.mouse_id = "999999".into();
        assert!(matches!(
            subject_id(&container, Some(&bad)),
            Err(RepackError::Precondition(_))
        ));
    }

    #[test]
    fn date_of_birth_subtracts_age_days() {
        let mut container = Container::new("session_715093703", start_time());
        container.subject = Some(subject());
        let dob = subject_date_of_birth(&container).unwrap();
        assert_eq!(dob, NaiveDate::from_ymd_opt(2018, 8, 1).unwrap());
    }

    #[test]
    fn malformed_age_is_a_parse_error() {
        let mut container = Container::new("session_715093703", start_time());
        let mut s = subject();
        s.age = "160 days".into();
        container.subject = Some(s);
        assert!(matches!(
            subject_date_of_birth(&container),
            Err(RepackError::Parse(_))
        ));
    }

    #[test]
    fn session_start_prefers_container_on_catalog_drift() {
        let mut container = Container::new("session_715093703", start_time());
        container.subject = Some(subject());
        let mut drifted = row();
        drifted.date_of_acquisition = "2019-01-08T22:31:07+00:00".into();
        let chosen = session_start_time(&container, &drifted).unwrap();
        assert_eq!(chosen, container.session_start_time);
    }

    #[test]
    fn instrument_id_cross_check() {
        let mut container = Container::new("session_715093703", start_time());
        container.devices.insert("NP.1".into(), Device::new("NP.1"));
        assert_eq!(instrument_id(&container, &row()).unwrap(), "NP.1");

        let mut bad = row();
        bad.equipment_name = "NP.0".into();
        assert!(instrument_id(&container, &bad).is_err());
    }

    fn with_rewards(volumes: &[f64]) -> Container {
        let mut container = Container::new("behavior_session_1", start_time());
        let mut trials = DynamicTable::new("trials");
        trials.columns.insert(
            "reward_volume".into(),
            VectorColumn {
                description: None,
                data: ArrayData::F64(volumes.to_vec()),
            },
        );
        container.intervals.insert("trials".into(), trials);
        container
    }

    #[test]
    fn reward_volume_aggregation() {
        let container = with_rewards(&[0.007, 0.0, 0.007, 0.005]);
        let total = total_reward_volume(&container).unwrap();
        assert!((total - 0.019).abs() < 1e-12);
        // Multiple distinct positives: first wins.
        assert_eq!(individual_reward_volume(&container), Some(0.007));

        let empty = with_rewards(&[]);
        assert_eq!(total_reward_volume(&empty), None);
        assert_eq!(individual_reward_volume(&empty), None);
    }

    #[test]
    fn atlas_lookup_is_case_insensitive() {
        assert_eq!(atlas_structure("visp").map(|s| s.acronym), Some("VISp"));
        assert_eq!(atlas_structure("VISP").map(|s| s.acronym), Some("VISp"));
        assert!(atlas_structure("nonsense").is_none());
    }

    #[test]
    fn targeted_structure_sorts_and_picks_first() {
        let structures = [
            atlas_structure("VISrl").unwrap(),
            atlas_structure("VISal").unwrap(),
            atlas_structure("CA1").unwrap(),
        ];
        let target = targeted_structure(&structures).unwrap();
        assert_eq!(target.acronym, "VISal");
    }

    #[test]
    fn modality_detection() {
        let mut container = with_rewards(&[0.007]);
        let mut units = DynamicTable::new("units");
        units.columns.insert(
            "spike_times".into(),
            VectorColumn {
                description: None,
                data: ArrayData::F64(vec![0.1, 0.2]),
            },
        );
        container.units = Some(units);
        container.imaging_planes.insert(
            "imaging_plane_1".into(),
            ImagingPlane {
                object_id: Uuid::new_v4(),
                name: "imaging_plane_1".into(),
                description: "(512, 512) field of view in VISp at depth 175 um".into(),
                indicator: "GCaMP6f".into(),
                excitation_lambda: 910.0,
                imaging_rate: 11.0,
                location: "VISp".into(),
                device_name: "MESO.1".into(),
                device_id: Uuid::new_v4(),
            },
        );
        let found = modalities(&container);
        assert_eq!(found, vec![Modality::Ecephys, Modality::Behavior, Modality::Pophys]);

        let empty = Container::new("empty", start_time());
        assert!(modalities(&empty).is_empty());
    }

    #[test]
    fn acquisition_level_lfp_counts_as_ecephys() {
        let mut container = Container::new("probe_760640083_lfp", start_time());
        let lfp = Lfp::new("probe_760640083_lfp");
        container
            .acquisition
            .insert(lfp.name.clone(), Acquisition::Lfp(lfp));
        assert_eq!(modalities(&container), vec![Modality::Ecephys]);
    }

    #[test]
    fn brain_locations_stops_at_the_shortest_electrode_column() {
        let mut container = Container::new("session_715093703", start_time());
        container.electrodes.push_row(0, "probeA", "VISp", "high pass");
        // Row 1 is missing its location entry.
        container.electrodes.ids.push(1);
        container.electrodes.group_names.push("probeA".into());
        container.electrodes.filtering.push("high pass".into());

        let found = brain_locations(&container, "probeA");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].acronym, "VISp");
    }

    #[test]
    fn data_stream_end_covers_tables_and_series() {
        let mut container = Container::new("session_715093703", start_time());
        container.acquisition.insert(
            "running_speed".into(),
            Acquisition::TimeSeries(TimeSeries {
                object_id: Uuid::new_v4(),
                name: "running_speed".into(),
                description: None,
                unit: Some("cm/s".into()),
                data: ArrayData::F64(vec![0.0; 4]),
                timestamps: Some(vec![1.0, 2.0, 3.0, 4.0]),
                starting_time: None,
                rate: None,
            }),
        );
        let mut trials = DynamicTable::new("trials");
        trials.columns.insert(
            "start_time".into(),
            VectorColumn {
                description: None,
                data: ArrayData::F64(vec![0.5, 5.0]),
            },
        );
        trials.columns.insert(
            "stop_time".into(),
            VectorColumn {
                description: None,
                data: ArrayData::F64(vec![4.5, 9.25]),
            },
        );
        container.intervals.insert("trials".into(), trials);

        assert_eq!(latest_time(&container), Some(9.25));
        assert_eq!(earliest_time(&container), Some(0.5));
        assert_eq!(
            data_stream_end_time(&container),
            Some(container.session_start_time + Duration::milliseconds(9250))
        );
    }

    #[test]
    fn plane_description_parses_fixed_pattern() {
        let fov =
            parse_plane_description("(512, 512) field of view in VISp at depth 175 um").unwrap();
        assert_eq!(
            fov,
            PlaneFieldOfView {
                width: 512,
                height: 512,
                targeted_structure: "VISp".into(),
                depth_um: 175,
            }
        );
        assert!(parse_plane_description("a 512x512 view").is_err());
    }
}
