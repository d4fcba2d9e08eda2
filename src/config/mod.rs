//! Loads chaos-fault configuration from disk.

use std::path::Path;

use crate::chaos::ChaosConfig;
use crate::errors::{TraceError, TraceResult};

/// Loads a [`ChaosConfig`] from a TOML or JSON file, chosen by extension
/// (`.json` for JSON, anything else for TOML). A malformed file is
/// reported as `ConfigError`, never a panic, so nothing is created in the
/// Journal for a run that never gets to start.
pub fn load_chaos_config(path: &Path) -> TraceResult<ChaosConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| TraceError::ConfigError(format!("reading {}: {e}", path.display())))?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(&contents)
            .map_err(|e| TraceError::ConfigError(format!("parsing {}: {e}", path.display())))
    } else {
        toml::from_str(&contents)
            .map_err(|e| TraceError::ConfigError(format!("parsing {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_toml_config() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "seed = 1\n[global]\nfailRate = 0.5").unwrap();
        let config = load_chaos_config(file.path()).unwrap();
        assert_eq!(config.seed, 1);
        assert_eq!(config.global.unwrap().fail_rate, Some(0.5));
    }

    #[test]
    fn loads_json_config() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(
            file,
            r#"{{"seed": 1, "tools": {{"read_file": {{"delayMs": {{"p": 1.0, "value": 500}}}}}}}}"#
        )
        .unwrap();
        let config = load_chaos_config(file.path()).unwrap();
        assert_eq!(config.seed, 1);
        assert!(config.tools.contains_key("read_file"));
    }

    #[test]
    fn malformed_config_is_reported_not_panicked() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "not valid toml {{{{").unwrap();
        let err = load_chaos_config(file.path()).unwrap_err();
        assert!(matches!(err, TraceError::ConfigError(_)));
    }
}
