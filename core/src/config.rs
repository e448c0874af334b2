//! Top-level configuration file: search-path resolution, loading, and parsing.
//!
//! Generalizes the teacher's config-file conventions (`hab`/`sup` look for a config file
//! in a small fixed set of locations before giving up) to the search order from spec.md §6.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::spec::{ProgramSpec, RawProgramSpec};

/// Directly `Deserialize`-able mirror of the whole configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub programs: HashMap<String, RawProgramSpec>,
}

/// The validated configuration: one `ProgramSpec` per configured program, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub programs: HashMap<String, ProgramSpec>,
}

impl Config {
    fn from_raw(raw: RawConfig) -> Result<Config, ConfigError> {
        let mut programs = HashMap::with_capacity(raw.programs.len());
        for (name, raw_spec) in raw.programs {
            let spec = ProgramSpec::from_raw(&name, raw_spec)?;
            programs.insert(name, spec);
        }
        Ok(Config { programs })
    }
}

/// Search order when no explicit `-c`/`--config` path is given, per spec.md §6:
/// `./taskmaster.yaml`, `/etc/taskmaster.yaml`, `/etc/taskmaster/taskmaster.yaml`, and the
/// `.yml` variant of each.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let bases = ["taskmaster", "/etc/taskmaster", "/etc/taskmaster/taskmaster"];
    let candidates: Vec<PathBuf> = bases
        .iter()
        .flat_map(|base| [PathBuf::from(format!("{base}.yaml")), PathBuf::from(format!("{base}.yml"))])
        .collect();

    for candidate in &candidates {
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }

    Err(ConfigError::NotFound(candidates))
}

/// Read, parse, and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawConfig = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_raw(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_well_formed_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "programs:\n  alpha:\n    command: [\"sleep\", \"60\"]\n    numprocs: 2\n"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.programs.len(), 1);
        let alpha = &config.programs["alpha"];
        assert_eq!(alpha.numprocs, 2);
        assert_eq!(alpha.command, vec!["sleep".to_string(), "60".to_string()]);
    }

    #[test]
    fn surfaces_parse_errors_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "programs: [not, a, mapping]").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn surfaces_validation_errors_from_nested_programs() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "programs:\n  alpha:\n    command: []\n").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCommand { .. }));
    }

    #[test]
    fn missing_file_reports_read_error() {
        let err = load_config(Path::new("/no/such/taskmaster.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn explicit_path_bypasses_search() {
        let path = PathBuf::from("/some/explicit/taskmaster.yaml");
        assert_eq!(resolve_config_path(Some(&path)).unwrap(), path);
    }
}
