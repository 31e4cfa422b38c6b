//! Configuration loading with Figment.
//!
//! Settings come from two layers: an optional `nwb-repack.toml` file and
//! environment variables prefixed with `NWB_REPACK_`. Every field has a
//! default, so a missing file is fine.
//!
//! # Example
//! ```no_run
//! use nwb_repack::settings::Settings;
//!
//! # fn main() -> Result<(), figment::Error> {
//! let settings = Settings::load()?;
//! println!("input dir: {}", settings.input_dir.display());
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Directory holding the source container files.
    pub input_dir: PathBuf,
    /// Directory converted containers and metadata records are written to.
    pub output_dir: PathBuf,
    /// Session catalog CSV.
    pub catalog_path: PathBuf,
    /// Base URL of the subject metadata service.
    pub metadata_service_host: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            input_dir: PathBuf::from("data/input"),
            output_dir: PathBuf::from("data/output"),
            catalog_path: PathBuf::from("data/sessions.csv"),
            metadata_service_host: "http://aind-metadata-service".to_string(),
        }
    }
}

impl Settings {
    /// Load from `nwb-repack.toml` plus `NWB_REPACK_`-prefixed
    /// environment variables.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("nwb-repack.toml")
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("NWB_REPACK_"))
            .extract()
    }

    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_apply_without_a_file() {
        let settings = Settings::load_from("/nonexistent/nwb-repack.toml").unwrap();
        assert_eq!(settings.log_level, "info");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "log_level = \"debug\"").unwrap();
        writeln!(file, "metadata_service_host = \"http://localhost:8080\"").unwrap();
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.metadata_service_host, "http://localhost:8080");
        assert_eq!(settings.catalog_path, PathBuf::from("data/sessions.csv"));
    }

    #[test]
    fn bogus_log_level_fails_validation() {
        let settings = Settings {
            log_level: "verbose".into(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
