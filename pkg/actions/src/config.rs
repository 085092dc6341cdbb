use std::time::Duration;

use pkg_classifier::{ExclusionRules, StateClassifier};
use pkg_poll::PollSpec;
use pkg_types::config::SuiteConfigFile;

/// Resolved suite settings: config file values over built-in defaults.
/// Callers apply CLI overrides on top.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    pub cluster_name: Option<String>,
    /// Poll settings for cluster-wide readiness checks.
    pub poll: PollSpec,
    pub exclusions: ExclusionRules,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            cluster_name: None,
            poll: PollSpec::cluster_pods(),
            exclusions: ExclusionRules::default(),
        }
    }
}

impl SuiteConfig {
    pub fn from_file(file: &SuiteConfigFile) -> Self {
        let mut config = Self {
            cluster_name: file.cluster_name.clone(),
            ..Default::default()
        };
        if let Some(secs) = file.poll.interval_secs {
            config.poll.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.poll.timeout_secs {
            config.poll.timeout = Duration::from_secs(secs);
        }
        if let Some(immediate) = file.poll.immediate {
            config.poll.immediate = immediate;
        }
        if !file.exclude.is_empty() {
            config.exclusions = ExclusionRules::new(file.exclude.iter().cloned());
        }
        config
    }

    pub fn classifier(&self) -> StateClassifier {
        StateClassifier::new(self.exclusions.clone())
    }
}
