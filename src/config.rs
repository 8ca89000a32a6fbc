//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Task scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of retries per task.
    pub max_retries: u32,
    /// How often the dispatch loop looks for pending work.
    pub dispatch_interval: Duration,
    /// Priority given to tasks submitted by workflow process nodes.
    pub workflow_task_priority: i32,
    /// Whether the binary starts the background dispatch loop.
    pub dispatch_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            dispatch_interval: Duration::from_secs(1),
            workflow_task_priority: 5,
            dispatch_enabled: true,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    /// Number of agents in the in-memory pool.
    pub agent_count: usize,
    /// Directory for the JSON store. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            agent_count: 3,
            data_dir: None,
        }
    }
}

impl EngineConfig {
    /// Build a config from `AGENT_FLOW_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "AGENT_FLOW_MAX_RETRIES")? {
            config.scheduler.max_retries = v;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "AGENT_FLOW_DISPATCH_INTERVAL_MS")? {
            if ms == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "AGENT_FLOW_DISPATCH_INTERVAL_MS".to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
            config.scheduler.dispatch_interval = Duration::from_millis(ms);
        }
        if let Some(v) = parse_var(&lookup, "AGENT_FLOW_WORKFLOW_TASK_PRIORITY")? {
            config.scheduler.workflow_task_priority = v;
        }
        if let Some(v) = parse_var(&lookup, "AGENT_FLOW_DISPATCH_ENABLED")? {
            config.scheduler.dispatch_enabled = v;
        }
        if let Some(v) = parse_var(&lookup, "AGENT_FLOW_AGENT_COUNT")? {
            config.agent_count = v;
        }
        if let Some(dir) = lookup("AGENT_FLOW_DATA_DIR").filter(|s| !s.trim().is_empty()) {
            config.data_dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.scheduler.dispatch_interval, Duration::from_secs(1));
        assert!(config.scheduler.dispatch_enabled);
        assert_eq!(config.agent_count, 3);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("AGENT_FLOW_MAX_RETRIES", "5"),
            ("AGENT_FLOW_DISPATCH_INTERVAL_MS", "250"),
            ("AGENT_FLOW_DISPATCH_ENABLED", "false"),
            ("AGENT_FLOW_AGENT_COUNT", "8"),
            ("AGENT_FLOW_DATA_DIR", "/tmp/flows"),
        ]))
        .unwrap();
        assert_eq!(config.scheduler.max_retries, 5);
        assert_eq!(config.scheduler.dispatch_interval, Duration::from_millis(250));
        assert!(!config.scheduler.dispatch_enabled);
        assert_eq!(config.agent_count, 8);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/flows")));
    }

    #[test]
    fn rejects_garbage() {
        let err = EngineConfig::from_lookup(lookup_from(&[("AGENT_FLOW_AGENT_COUNT", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "AGENT_FLOW_AGENT_COUNT"));
    }

    #[test]
    fn rejects_zero_interval() {
        assert!(
            EngineConfig::from_lookup(lookup_from(&[("AGENT_FLOW_DISPATCH_INTERVAL_MS", "0")]))
                .is_err()
        );
    }
}
