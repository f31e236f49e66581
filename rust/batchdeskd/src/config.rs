//! Process configuration, read from the environment (and `.env` when present).

use std::path::PathBuf;

use crate::clock::Clock;

/// Workspace directory opened at start-up.
pub const ENV_WORKSPACE: &str = "BATCHDESK_WORKSPACE";

/// Pins the clock to an RFC 3339 instant.
pub const ENV_NOW: &str = "BATCHDESK_NOW";

#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub clock: Clock,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let workspace = lookup(ENV_WORKSPACE)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let clock = Clock::parse_override(lookup(ENV_NOW).as_deref())?;
        Ok(Self { workspace, clock })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_system_clock() {
        let cfg = Config::from_lookup(lookup(&[])).expect("config");
        assert!(cfg.workspace.is_none());
        assert!(matches!(cfg.clock, Clock::System));
    }

    #[test]
    fn reads_workspace_and_pinned_clock() {
        let cfg = Config::from_lookup(lookup(&[
            (ENV_WORKSPACE, "/tmp/desk"),
            (ENV_NOW, "2024-03-04T09:00:00+05:30"),
        ]))
        .expect("config");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/desk")));
        assert!(matches!(cfg.clock, Clock::Fixed(_)));
    }

    #[test]
    fn bad_clock_override_is_an_error() {
        assert!(Config::from_lookup(lookup(&[(ENV_NOW, "noon")])).is_err());
    }
}
