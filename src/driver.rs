//! Batch conversion driver.
//!
//! Walks the session catalog for one dataset, enumerates each session's
//! source files by the dataset's fixed naming convention, merges
//! satellites into the base container, re-encodes, and emits the
//! per-session metadata records. Sessions whose expected source files
//! are absent land in a `missing_files.txt` side-channel report; a
//! per-session failure is logged and the batch moves on.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::catalog::{SessionCatalog, SessionRow, SessionShape};
use crate::codec::{output_path, ContainerStore, ExportOptions, JsonStore};
use crate::compare::{compare_containers, CompareOptions, Discrepancy};
use crate::error::{RepackError, Result};
use crate::extract;
use crate::merge::{merge_planes, merge_probe};
use crate::model::{Container, IdentityManager};
use crate::records::{AcquisitionRecord, DataDescription};
use crate::service::{fetch_procedures_record, fetch_subject_record, MetadataService};
use crate::settings::Settings;

/// Container file extension used by the JSON tree store.
const CONTAINER_EXT: &str = ".nwb.json";

/// Which dataset's naming conventions and merge shape to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Dataset {
    /// Neuropixels sessions: one base file plus per-probe LFP satellites.
    VisualCodingEphys,
    /// Behavior/ophys sessions: behavior-only, single-plane or multiplane.
    VisualBehaviorOphys,
}

impl Dataset {
    fn project_name(self) -> &'static str {
        match self {
            Dataset::VisualCodingEphys => "Visual Coding Neuropixels",
            Dataset::VisualBehaviorOphys => "Visual Behavior Ophys",
        }
    }

    fn data_summary(self) -> &'static str {
        match self {
            Dataset::VisualCodingEphys => {
                "in vivo Neuropixels recordings characterizing neural coding \
                 in the visual cortex across a diverse range of visual stimuli"
            }
            Dataset::VisualBehaviorOphys => {
                "in vivo two-photon calcium imaging during a visual \
                 change-detection behavior task"
            }
        }
    }
}

/// What one batch run did.
#[derive(Debug, Default)]
pub struct ConvertReport {
    pub converted: Vec<String>,
    pub failed: Vec<String>,
    pub missing: Vec<PathBuf>,
}

/// Convert every session in the catalog for one dataset.
pub fn run_convert(
    settings: &Settings,
    dataset: Dataset,
    service: &dyn MetadataService,
) -> Result<ConvertReport> {
    let catalog = SessionCatalog::load(&settings.catalog_path)?;
    let store = JsonStore;
    let mut report = ConvertReport::default();

    for row in catalog.rows() {
        match convert_session(settings, dataset, &store, service, row, &mut report.missing) {
            Ok(true) => report.converted.push(row.id.clone()),
            Ok(false) => {} // sources missing, already recorded
            Err(e) => {
                error!(session = %row.id, error = %e, "session conversion failed");
                report.failed.push(row.id.clone());
            }
        }
    }

    write_missing_report(&settings.output_dir, &report.missing)?;
    info!(
        converted = report.converted.len(),
        failed = report.failed.len(),
        missing = report.missing.len(),
        "batch run complete"
    );
    Ok(report)
}

/// Convert one catalog row. `Ok(false)` means the session's source files
/// were absent and were recorded in the missing list.
fn convert_session(
    settings: &Settings,
    dataset: Dataset,
    store: &JsonStore,
    service: &dyn MetadataService,
    row: &SessionRow,
    missing: &mut Vec<PathBuf>,
) -> Result<bool> {
    let (sources, out) = match dataset {
        Dataset::VisualCodingEphys => ephys_sources(&settings.input_dir, row)?,
        Dataset::VisualBehaviorOphys => ophys_sources(&settings.input_dir, row)?,
    };
    let absent: Vec<PathBuf> = sources.iter().filter(|p| !p.exists()).cloned().collect();
    if !absent.is_empty() {
        warn!(session = %row.id, files = absent.len(), "expected source files are missing");
        missing.extend(absent);
        return Ok(false);
    }

    // All containers of one merge share one identity manager.
    let mut manager = IdentityManager::new();
    let mut containers = crate::codec::open_shared(store, &sources, &mut manager)?;

    let merged = match dataset {
        Dataset::VisualCodingEphys => {
            let mut base = containers.remove(0);
            for probe in containers {
                merge_probe(&mut base, probe)?;
            }
            base
        }
        Dataset::VisualBehaviorOphys => match row.shape()? {
            SessionShape::Multiplane { .. } => merge_planes(containers)?,
            _ => containers.remove(0),
        },
    };

    let target = output_path(&settings.output_dir, &out);
    store.encode(&merged, &target, &ExportOptions::default())?;
    emit_metadata(settings, dataset, service, &merged, row)?;
    info!(session = %row.id, output = %target.display(), "session converted");
    Ok(true)
}

/// Base session file plus every probe LFP satellite, sorted by name.
fn ephys_sources(input_dir: &Path, row: &SessionRow) -> Result<(Vec<PathBuf>, PathBuf)> {
    let session_dir = input_dir.join(format!("session_{}", row.id));
    let base = session_dir.join(format!("session_{}{CONTAINER_EXT}", row.id));
    let mut sources = vec![base.clone()];

    if session_dir.is_dir() {
        let mut probes: Vec<PathBuf> = fs::read_dir(&session_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| {
                        n.starts_with("probe_") && n.ends_with(&format!("_lfp{CONTAINER_EXT}"))
                    })
            })
            .collect();
        probes.sort();
        sources.extend(probes);
    }
    Ok((sources, base))
}

/// Source files for one behavior/ophys session, decided by its shape.
fn ophys_sources(input_dir: &Path, row: &SessionRow) -> Result<(Vec<PathBuf>, PathBuf)> {
    let behavior_id = row.behavior_session_id.as_deref().unwrap_or(&row.id);
    match row.shape()? {
        SessionShape::Behavior => {
            let file = input_dir.join(format!("behavior_session_{behavior_id}{CONTAINER_EXT}"));
            Ok((vec![file.clone()], file))
        }
        SessionShape::SinglePlane { experiment_id } => {
            let file = input_dir.join(format!(
                "behavior_ophys_experiment_{experiment_id}{CONTAINER_EXT}"
            ));
            let out = input_dir.join(format!(
                "behavior_ophys_session_{behavior_id}{CONTAINER_EXT}"
            ));
            Ok((vec![file], out))
        }
        SessionShape::Multiplane { experiment_ids } => {
            let files: Vec<PathBuf> = experiment_ids
                .iter()
                .map(|id| {
                    input_dir.join(format!("behavior_ophys_experiment_{id}{CONTAINER_EXT}"))
                })
                .collect();
            let out = input_dir.join(format!(
                "behavior_ophys_session_{behavior_id}{CONTAINER_EXT}"
            ));
            Ok((files, out))
        }
    }
}

/// Emit the per-session schema records next to the converted container.
fn emit_metadata(
    settings: &Settings,
    dataset: Dataset,
    service: &dyn MetadataService,
    container: &Container,
    row: &SessionRow,
) -> Result<()> {
    // The container's recorded session type must match the catalog row.
    if let (Some(notes), Some(session_type)) = (&container.stimulus_notes, &row.session_type) {
        if notes != session_type {
            return Err(RepackError::Precondition(format!(
                "session type mismatch: container has '{notes}', catalog row has '{session_type}'"
            )));
        }
    }

    let subject_id = extract::subject_id(container, Some(row))?;
    extract::session_start_time(container, row)?;
    let modalities = extract::modalities(container);
    let creation_time =
        extract::data_stream_end_time(container).unwrap_or(container.session_start_time);

    let description = DataDescription::new(
        &subject_id,
        creation_time,
        dataset.project_name(),
        modalities.clone(),
        dataset.data_summary(),
    );
    let record_dir = settings.output_dir.join(&description.name);
    crate::records::write_standard_file(&description, "data_description", &record_dir)?;

    if let Some(subject) = fetch_subject_record(service, container, &subject_id)? {
        crate::records::write_standard_file(&subject, "subject", &record_dir)?;
    }

    if let Some(procedures) = fetch_procedures_record(service, &subject_id)? {
        crate::records::write_standard_file(&procedures, "procedures", &record_dir)?;
    }

    let acquisition = AcquisitionRecord {
        subject_id,
        acquisition_start_time: extract::data_stream_start_time(container),
        acquisition_end_time: extract::data_stream_end_time(container),
        instrument_id: extract::instrument_id(container, row)?,
        session_type: row.session_type.clone(),
        total_reward_volume: extract::total_reward_volume(container),
        individual_reward_volume: extract::individual_reward_volume(container),
        modalities,
    };
    crate::records::write_standard_file(&acquisition, "acquisition", &record_dir)?;
    Ok(())
}

fn write_missing_report(output_dir: &Path, missing: &[PathBuf]) -> Result<()> {
    fs::create_dir_all(output_dir)?;
    let mut lines: Vec<String> = missing
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    lines.sort();
    fs::write(output_dir.join("missing_files.txt"), lines.join("\n"))?;
    Ok(())
}

/// Decode two container files and report every structural discrepancy.
pub fn run_compare(a: &Path, b: &Path, options: &CompareOptions) -> Result<Vec<Discrepancy>> {
    let store = JsonStore;
    let left = store.decode(a)?;
    let right = store.decode(b)?;
    Ok(compare_containers(&left, &right, options))
}
