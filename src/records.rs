//! Schema metadata records emitted alongside each converted session.
//!
//! Every record passes a serialize/deserialize round-trip gate before it
//! touches disk: a record whose serialization is lossy is a `Validation`
//! error, not a file. Records for one session land together in a
//! directory named by the data description's derived name.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{RepackError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Ecephys,
    Behavior,
    Pophys,
}

/// Subject sex decoded from the container's single-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Female,
    Male,
}

impl Sex {
    /// Fixed two-entry code table used by the container format.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "F" => Some(Sex::Female),
            "M" => Some(Sex::Male),
            _ => None,
        }
    }
}

/// Top-level description of one converted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDescription {
    pub name: String,
    pub subject_id: String,
    pub creation_time: DateTime<FixedOffset>,
    pub institution: String,
    pub data_level: String,
    pub project_name: String,
    pub modalities: Vec<Modality>,
    pub data_summary: String,
}

impl DataDescription {
    /// Build a description with its derived name, which doubles as the
    /// per-session output directory name.
    pub fn new(
        subject_id: &str,
        creation_time: DateTime<FixedOffset>,
        project_name: &str,
        modalities: Vec<Modality>,
        data_summary: &str,
    ) -> Self {
        let name = format!(
            "{}_{}_{}",
            project_slug(project_name),
            subject_id,
            creation_time.format("%Y-%m-%d_%H-%M-%S")
        );
        Self {
            name,
            subject_id: subject_id.to_string(),
            creation_time,
            institution: "Allen Institute for Brain Science".to_string(),
            data_level: "raw".to_string(),
            project_name: project_name.to_string(),
            modalities,
            data_summary: data_summary.to_string(),
        }
    }
}

fn project_slug(project_name: &str) -> String {
    project_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreedingInfo {
    pub maternal_genotype: String,
    pub paternal_genotype: String,
}

/// Subject facts assembled from the container and the metadata service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub subject_id: String,
    pub species: String,
    pub sex: Sex,
    pub date_of_birth: NaiveDate,
    pub genotype: String,
    pub alleles: Vec<String>,
    pub breeding_info: Option<BreedingInfo>,
}

/// Anaesthesia administered during a surgery. The duration is the field
/// the service historically omits; everything else passes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anaesthesia {
    pub duration: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One step performed within a surgery, such as a craniotomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurgeryStep {
    pub object_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One procedure performed on the subject, passed through from the
/// metadata service once it parses cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectProcedure {
    pub object_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anaesthesia: Option<Anaesthesia>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub procedures: Vec<SurgeryStep>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Procedures history for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProceduresRecord {
    pub subject_id: String,
    pub subject_procedures: Vec<SubjectProcedure>,
}

/// Facts about the recording itself: when it ran, on what, and what the
/// subject received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionRecord {
    pub subject_id: String,
    pub acquisition_start_time: Option<DateTime<FixedOffset>>,
    pub acquisition_end_time: Option<DateTime<FixedOffset>>,
    pub instrument_id: String,
    pub session_type: Option<String>,
    pub total_reward_volume: Option<f64>,
    pub individual_reward_volume: Option<f64>,
    pub modalities: Vec<Modality>,
}

/// Serialize a record, prove the round trip is lossless, and write it to
/// `{directory}/{kind}.json`. A round-trip mismatch is fatal for the
/// session.
pub fn write_standard_file<T>(record: &T, kind: &str, directory: &Path) -> Result<PathBuf>
where
    T: Serialize + DeserializeOwned + PartialEq,
{
    let serialized = serde_json::to_string_pretty(record)?;
    let deserialized: T = serde_json::from_str(&serialized)?;
    if &deserialized != record {
        return Err(RepackError::Validation(format!(
            "record '{kind}' does not survive a serialization round trip"
        )));
    }

    fs::create_dir_all(directory)?;
    let path = directory.join(format!("{kind}.json"));
    fs::write(&path, serialized)?;
    debug!(path = %path.display(), "wrote metadata record");
    Ok(path)
}
