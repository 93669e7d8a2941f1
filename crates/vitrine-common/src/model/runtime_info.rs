use serde::{Deserialize, Serialize};

/// Lifecycle status of an exhibit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhibitStatus {
    #[default]
    NotCreated,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl ExhibitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExhibitStatus::NotCreated => "not_created",
            ExhibitStatus::Starting => "starting",
            ExhibitStatus::Running => "running",
            ExhibitStatus::Stopping => "stopping",
            ExhibitStatus::Stopped => "stopped",
        }
    }

    /// Whether a request in this status may trigger provisioning
    pub fn can_start(self) -> bool {
        matches!(self, ExhibitStatus::NotCreated | ExhibitStatus::Stopped)
    }
}

impl std::fmt::Display for ExhibitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Frequently mutated per-exhibit state, stored apart from the definition
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub status: ExhibitStatus,
    /// Unix seconds of the last proxied request or provisioning completion
    #[serde(default)]
    pub last_accessed: i64,
    /// Runtime-assigned host name of the exposed object
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub related_containers: Vec<String>,
}

impl RuntimeInfo {
    pub fn with_status(status: ExhibitStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let values = [
            (ExhibitStatus::Starting, "\"starting\""),
            (ExhibitStatus::Running, "\"running\""),
            (ExhibitStatus::Stopping, "\"stopping\""),
            (ExhibitStatus::Stopped, "\"stopped\""),
            (ExhibitStatus::NotCreated, "\"not_created\""),
        ];
        for (status, expected) in values {
            assert_eq!(serde_json::to_string(&status).unwrap(), expected);
            assert_eq!(status.to_string(), expected.trim_matches('"'));
        }
    }

    #[test]
    fn test_can_start() {
        assert!(ExhibitStatus::NotCreated.can_start());
        assert!(ExhibitStatus::Stopped.can_start());
        assert!(!ExhibitStatus::Starting.can_start());
        assert!(!ExhibitStatus::Running.can_start());
        assert!(!ExhibitStatus::Stopping.can_start());
    }

    #[test]
    fn test_runtime_info_defaults_missing_fields() {
        let info: RuntimeInfo = serde_json::from_str(r#"{"status":"stopped"}"#).unwrap();
        assert_eq!(info.status, ExhibitStatus::Stopped);
        assert!(info.related_containers.is_empty());
        assert_eq!(info.last_accessed, 0);
    }
}
