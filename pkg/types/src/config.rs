use serde::{Deserialize, Serialize};

/// Suite configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// cluster-name: downstream-1
/// poll:
///   interval-secs: 5
///   timeout-secs: 600
///   immediate: true
/// exclude:
///   - helm
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteConfigFile {
    #[serde(default, alias = "cluster-name")]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub poll: PollConfig,
    /// Pod-name substrings skipped by the cluster pod check.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default, alias = "interval-secs")]
    pub interval_secs: Option<u64>,
    #[serde(default, alias = "timeout-secs")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub immediate: Option<bool>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
