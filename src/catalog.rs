//! External session catalog: CSV tables pairing each session with its
//! subject, equipment and constituent experiment files.

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::Deserialize;
use tracing::debug;

use crate::error::{RepackError, Result};

/// Project codes whose sessions record several imaging planes at once
/// and therefore need a plane merge.
static MULTIPLANE_PROJECT_CODES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from(["VisualBehaviorMultiscope", "VisualBehaviorMultiscope4areasx2d"])
});

/// One catalog row.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionRow {
    pub id: String,
    pub mouse_id: String,
    pub date_of_acquisition: String,
    pub equipment_name: String,
    #[serde(default)]
    pub session_type: Option<String>,
    #[serde(default)]
    pub project_code: Option<String>,
    #[serde(default)]
    pub behavior_session_id: Option<String>,
    /// Raw list of experiment IDs in the catalog's `"[123, 456]"` form;
    /// empty for behavior-only sessions.
    #[serde(default, rename = "ophys_experiment_id", deserialize_with = "id_list")]
    pub ophys_experiment_ids: Vec<String>,
}

/// The shape of one session's source files, decided from its catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionShape {
    /// Behavior-only session, no imaging planes.
    Behavior,
    /// One imaging plane, one experiment file.
    SinglePlane { experiment_id: String },
    /// Several per-plane experiment files to merge into one container.
    Multiplane { experiment_ids: Vec<String> },
}

impl SessionRow {
    pub fn shape(&self) -> Result<SessionShape> {
        if self.ophys_experiment_ids.is_empty() {
            return Ok(SessionShape::Behavior);
        }
        let multiplane = self
            .project_code
            .as_deref()
            .is_some_and(|code| MULTIPLANE_PROJECT_CODES.contains(code));
        if multiplane {
            Ok(SessionShape::Multiplane {
                experiment_ids: self.ophys_experiment_ids.clone(),
            })
        } else {
            if self.ophys_experiment_ids.len() != 1 {
                return Err(RepackError::Precondition(format!(
                    "session '{}' is single-plane but lists {} experiments",
                    self.id,
                    self.ophys_experiment_ids.len()
                )));
            }
            Ok(SessionShape::SinglePlane {
                experiment_id: self.ophys_experiment_ids[0].clone(),
            })
        }
    }
}

fn id_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(parse_id_list(raw.as_deref().unwrap_or_default()))
}

/// Parse the catalog's `"[123, 456]"` experiment-list form. An empty
/// cell means a behavior-only session.
fn parse_id_list(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The loaded catalog, indexed by session ID.
#[derive(Debug, Default)]
pub struct SessionCatalog {
    rows: Vec<SessionRow>,
}

impl SessionCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut rows = Vec::new();
        for record in reader.deserialize::<SessionRow>() {
            rows.push(record?);
        }
        debug!(path = %path.display(), sessions = rows.len(), "loaded session catalog");
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[SessionRow] {
        &self.rows
    }

    pub fn find(&self, session_id: &str) -> Result<&SessionRow> {
        self.rows
            .iter()
            .find(|row| row.id == session_id)
            .ok_or_else(|| {
                RepackError::Precondition(format!("session '{session_id}' not found in catalog"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CSV: &str = "\
id,mouse_id,date_of_acquisition,equipment_name,session_type,project_code,behavior_session_id,ophys_experiment_id
715093703,457841,2019-01-08T22:30:00+00:00,NP.1,brain_observatory_1.1,,,
1048363441,524925,2020-09-03T17:01:03+00:00,MESO.1,OPHYS_4_images_B,VisualBehaviorMultiscope,1048126931,\"[1048363441, 1048363443, 1048363447, 1048363449]\"
951410079,457841,2019-09-20T16:54:23+00:00,CAM2P.4,OPHYS_1_images_A,VisualBehavior,951520319,[951980471]
";

    fn write_catalog() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(CSV.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_rows_and_finds_by_id() {
        let file = write_catalog();
        let catalog = SessionCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.rows().len(), 3);
        let row = catalog.find("715093703").unwrap();
        assert_eq!(row.mouse_id, "457841");
        assert_eq!(row.equipment_name, "NP.1");
        assert!(catalog.find("0").is_err());
    }

    #[test]
    fn behavior_sessions_have_no_experiments() {
        let file = write_catalog();
        let catalog = SessionCatalog::load(file.path()).unwrap();
        let row = catalog.find("715093703").unwrap();
        assert_eq!(row.shape().unwrap(), SessionShape::Behavior);
    }

    #[test]
    fn multiplane_project_codes_select_the_plane_merge() {
        let file = write_catalog();
        let catalog = SessionCatalog::load(file.path()).unwrap();
        let row = catalog.find("1048363441").unwrap();
        match row.shape().unwrap() {
            SessionShape::Multiplane { experiment_ids } => {
                assert_eq!(experiment_ids.len(), 4);
                assert_eq!(experiment_ids[0], "1048363441");
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn single_plane_sessions_carry_one_experiment() {
        let file = write_catalog();
        let catalog = SessionCatalog::load(file.path()).unwrap();
        let row = catalog.find("951410079").unwrap();
        assert_eq!(
            row.shape().unwrap(),
            SessionShape::SinglePlane {
                experiment_id: "951980471".into()
            }
        );
    }

    #[test]
    fn id_list_parsing_handles_brackets_and_spaces() {
        assert_eq!(parse_id_list("[1, 2, 3]"), vec!["1", "2", "3"]);
        assert_eq!(parse_id_list(""), Vec::<String>::new());
        assert_eq!(parse_id_list("[42]"), vec!["42"]);
    }
}
