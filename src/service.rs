//! Remote metadata-service boundary.
//!
//! Subject and procedures lookups go typed-first: the service response
//! is parsed straight into its payload type. The service's historical
//! data has known, enumerable defects that fail that parse, so the raw
//! response is kept and repaired with a fixed per-endpoint patch list,
//! then parsed again. That is the only retry in the pipeline; transport
//! failures never retry and never raise past this boundary, they become
//! "no record" plus a warning.
//!
//! After a subject payload is obtained (typed or repaired) it is
//! cross-validated against the container's own subject fields. Species,
//! sex and genotype mismatches are fatal; a date-of-birth mismatch only
//! warns, due to a known historical discrepancy source. The asymmetry is
//! intentional. Procedures have no container-side counterpart and pass
//! through unvalidated.

use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::{RepackError, Result};
use crate::extract::subject_date_of_birth;
use crate::model::Container;
use crate::records::{BreedingInfo, ProceduresRecord, Sex, SubjectProcedure, SubjectRecord};

/// Species field as the service sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesField {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreedingDetails {
    pub maternal_genotype: String,
    pub paternal_genotype: String,
}

/// Subject details as the service sends them. Every field is required;
/// responses with the known historical defects fail to parse into this
/// and go through the raw-repair path instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectDetails {
    pub species: SpeciesField,
    /// "Female" or "Male".
    pub sex: String,
    pub date_of_birth: NaiveDate,
    pub genotype: String,
    pub alleles: Vec<String>,
    /// Housing duration in days.
    pub duration: f64,
    pub breeding_info: BreedingDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectPayload {
    pub subject_details: SubjectDetails,
}

/// Procedures history as the service sends it. The nested procedure
/// types carry the fields the repair list touches and pass everything
/// else through; a surgery whose anaesthesia lacks a duration, or a
/// craniotomy with a bare-string position, fails this parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProceduresPayload {
    pub subject_procedures: Vec<SubjectProcedure>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of one service fetch: either the typed payload, or the raw
/// response when the typed parse failed schema validation.
#[derive(Debug, Clone)]
pub enum FetchOutcome<T> {
    Typed(T),
    ValidationFailure(Value),
}

/// The remote metadata lookups, one method per endpoint.
pub trait MetadataService {
    fn fetch_subject(&self, subject_id: &str) -> Result<FetchOutcome<SubjectPayload>>;
    fn fetch_procedures(&self, subject_id: &str) -> Result<FetchOutcome<ProceduresPayload>>;
}

/// HTTP client for the metadata service.
pub struct HttpMetadataService {
    host: String,
    client: reqwest::blocking::Client,
}

impl HttpMetadataService {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn fetch_raw(&self, route: &str, subject_id: &str) -> Result<Value> {
        let url = format!("{}/api/v2/{route}/{subject_id}", self.host);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| RepackError::Transport(format!("GET {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(RepackError::Transport(format!(
                "GET {url}: status {}",
                response.status()
            )));
        }
        response
            .json()
            .map_err(|e| RepackError::Transport(format!("GET {url}: invalid body: {e}")))
    }
}

impl MetadataService for HttpMetadataService {
    fn fetch_subject(&self, subject_id: &str) -> Result<FetchOutcome<SubjectPayload>> {
        Ok(typed_or_raw(
            self.fetch_raw("subject", subject_id)?,
            subject_id,
            "subject",
        ))
    }

    fn fetch_procedures(&self, subject_id: &str) -> Result<FetchOutcome<ProceduresPayload>> {
        Ok(typed_or_raw(
            self.fetch_raw("procedures", subject_id)?,
            subject_id,
            "procedures",
        ))
    }
}

fn typed_or_raw<T: DeserializeOwned>(raw: Value, subject_id: &str, endpoint: &str) -> FetchOutcome<T> {
    match serde_json::from_value::<T>(raw.clone()) {
        Ok(payload) => FetchOutcome::Typed(payload),
        Err(e) => {
            warn!(subject_id, endpoint, error = %e, "typed parse failed, keeping raw response");
            FetchOutcome::ValidationFailure(raw)
        }
    }
}

/// Fixed repair list for the subject endpoint's known historical
/// defects: a missing or null housing duration becomes zero, a
/// bare-string alleles field becomes a single-element list, and null
/// breeding genotypes become empty strings.
pub fn repair_raw_subject(mut raw: Value) -> Value {
    if let Some(details) = raw
        .get_mut("subject_details")
        .and_then(Value::as_object_mut)
    {
        let duration = details.entry("duration").or_insert(Value::Null);
        if duration.is_null() {
            warn!("patched missing housing duration with zero");
            *duration = json!(0.0);
        }

        if let Some(alleles) = details.get_mut("alleles") {
            if let Value::String(single) = alleles {
                warn!(allele = %single, "normalized bare allele string into a list");
                *alleles = json!([single.clone()]);
            }
        }

        if let Some(breeding) = details
            .get_mut("breeding_info")
            .and_then(Value::as_object_mut)
        {
            for key in ["maternal_genotype", "paternal_genotype"] {
                if breeding.get(key).map_or(false, Value::is_null) {
                    warn!(field = key, "patched null breeding genotype with empty string");
                    breeding.insert(key.to_string(), json!(""));
                }
            }
        }
    }
    raw
}

/// Fixed repair list for the procedures endpoint's known historical
/// defects: a surgery's anaesthesia block missing its duration gets
/// zero, and a craniotomy position sent as a bare string becomes a
/// single-element list.
pub fn repair_raw_procedures(mut raw: Value) -> Value {
    if let Some(procedures) = raw
        .get_mut("subject_procedures")
        .and_then(Value::as_array_mut)
    {
        for procedure in procedures {
            if procedure.get("object_type").and_then(Value::as_str) != Some("Surgery") {
                continue;
            }
            if let Some(anaesthesia) = procedure
                .get_mut("anaesthesia")
                .and_then(Value::as_object_mut)
            {
                if !anaesthesia.contains_key("duration") {
                    warn!("patched missing anaesthesia duration with zero");
                    anaesthesia.insert("duration".to_string(), json!(0.0));
                }
            }
            if let Some(steps) = procedure
                .get_mut("procedures")
                .and_then(Value::as_array_mut)
            {
                for step in steps {
                    if step.get("object_type").and_then(Value::as_str) != Some("Craniotomy") {
                        continue;
                    }
                    if let Some(position) = step.get_mut("position") {
                        if let Value::String(single) = position {
                            warn!(position = %single, "normalized bare craniotomy position into a list");
                            *position = json!([single.clone()]);
                        }
                    }
                }
            }
        }
    }
    raw
}

/// Fetch the subject record for a session, handling every service
/// failure mode. Transport failures yield no record; a payload that is
/// still unusable after the repair pass is a `Validation` error.
pub fn fetch_subject_record(
    service: &dyn MetadataService,
    container: &Container,
    subject_id: &str,
) -> Result<Option<SubjectRecord>> {
    let outcome = match service.fetch_subject(subject_id) {
        Ok(outcome) => outcome,
        Err(RepackError::Transport(message)) => {
            warn!(subject_id, %message, "metadata service unreachable, continuing without a subject record");
            return Ok(None);
        }
        Err(other) => return Err(other),
    };

    let payload = match outcome {
        FetchOutcome::Typed(payload) => payload,
        FetchOutcome::ValidationFailure(raw) => {
            let repaired = repair_raw_subject(raw);
            serde_json::from_value::<SubjectPayload>(repaired).map_err(|e| {
                RepackError::Validation(format!(
                    "subject {subject_id} payload unusable even after repair: {e}"
                ))
            })?
        }
    };

    cross_validate(container, &payload)?;
    build_record(subject_id, &payload)
}

/// Fetch the procedures record for a subject, same failure policy as
/// the subject fetch. There is nothing in the container to
/// cross-validate procedures against, so a usable payload passes
/// straight through.
pub fn fetch_procedures_record(
    service: &dyn MetadataService,
    subject_id: &str,
) -> Result<Option<ProceduresRecord>> {
    let outcome = match service.fetch_procedures(subject_id) {
        Ok(outcome) => outcome,
        Err(RepackError::Transport(message)) => {
            warn!(subject_id, %message, "metadata service unreachable, continuing without a procedures record");
            return Ok(None);
        }
        Err(other) => return Err(other),
    };

    let payload = match outcome {
        FetchOutcome::Typed(payload) => payload,
        FetchOutcome::ValidationFailure(raw) => {
            let repaired = repair_raw_procedures(raw);
            serde_json::from_value::<ProceduresPayload>(repaired).map_err(|e| {
                RepackError::Validation(format!(
                    "procedures for subject {subject_id} unusable even after repair: {e}"
                ))
            })?
        }
    };

    Ok(Some(ProceduresRecord {
        subject_id: subject_id.to_string(),
        subject_procedures: payload.subject_procedures,
    }))
}

/// Assert that the service payload agrees with the container's own
/// subject fields. Species, sex and genotype disagreement is fatal;
/// date of birth only warns.
fn cross_validate(container: &Container, payload: &SubjectPayload) -> Result<()> {
    let subject = container.subject.as_ref().ok_or_else(|| {
        RepackError::Precondition(format!("'{}' carries no subject", container.identifier))
    })?;
    let details = &payload.subject_details;

    if subject.species != details.species.name {
        return Err(RepackError::Validation(format!(
            "species mismatch: container has '{}', service has '{}'",
            subject.species, details.species.name
        )));
    }

    let expected_sex = match Sex::from_code(&subject.sex) {
        Some(Sex::Female) => "Female",
        Some(Sex::Male) => "Male",
        None => {
            return Err(RepackError::Validation(format!(
                "container sex code '{}' is not in the code table",
                subject.sex
            )))
        }
    };
    if details.sex != expected_sex {
        return Err(RepackError::Validation(format!(
            "sex mismatch: container has '{}', service has '{}'",
            expected_sex, details.sex
        )));
    }

    let container_dob = subject_date_of_birth(container)?;
    if container_dob != details.date_of_birth {
        warn!(
            container = %container_dob,
            service = %details.date_of_birth,
            "date of birth mismatch between container and metadata service"
        );
    }

    if subject.genotype != details.genotype {
        return Err(RepackError::Validation(format!(
            "genotype mismatch: container has '{}', service has '{}'",
            subject.genotype, details.genotype
        )));
    }
    Ok(())
}

fn build_record(subject_id: &str, payload: &SubjectPayload) -> Result<Option<SubjectRecord>> {
    let details = &payload.subject_details;
    let sex = match details.sex.as_str() {
        "Female" => Sex::Female,
        "Male" => Sex::Male,
        other => {
            return Err(RepackError::Validation(format!(
                "service sex '{other}' is not in the code table"
            )))
        }
    };
    Ok(Some(SubjectRecord {
        subject_id: subject_id.to_string(),
        species: details.species.name.clone(),
        sex,
        date_of_birth: details.date_of_birth,
        genotype: details.genotype.clone(),
        alleles: details.alleles.clone(),
        breeding_info: Some(BreedingInfo {
            maternal_genotype: details.breeding_info.maternal_genotype.clone(),
            paternal_genotype: details.breeding_info.paternal_genotype.clone(),
        }),
    }))
}
