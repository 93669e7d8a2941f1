//! Exhibit definitions
//!
//! An exhibit is a bundle of containerized objects started and stopped as a unit.
//! Definitions are immutable once created; only the runtime info changes.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{Result, VitrineError};
use crate::model::runtime_info::RuntimeInfo;
use crate::DEFAULT_OBJECT_PORT;

/// Readiness probe variant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivecheckKind {
    Http,
    Exec,
}

impl std::fmt::Display for LivecheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LivecheckKind::Http => write!(f, "http"),
            LivecheckKind::Exec => write!(f, "exec"),
        }
    }
}

/// Livecheck declaration: variant plus free-form per-variant config
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Livecheck {
    #[serde(rename = "type")]
    pub kind: LivecheckKind,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl Livecheck {
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDriver {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    #[serde(default)]
    pub driver: VolumeDriver,
}

/// One container specification within an exhibit
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    pub name: String,
    pub image: String,
    /// Image tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub livecheck: Option<Livecheck>,
    /// Environment variables, values may contain placeholders
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Volume name to mount point inside the container
    #[serde(default)]
    pub mounts: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

impl Object {
    /// Image reference including the tag when one is set
    pub fn image_reference(&self) -> String {
        match self.label.as_deref().filter(|l| !l.is_empty()) {
            Some(tag) => format!("{}:{}", self.image, tag),
            None => self.image.clone(),
        }
    }

    pub fn port_or_default(&self) -> &str {
        self.port
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_OBJECT_PORT)
    }

    pub fn volume(&self, name: &str) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.name == name)
    }
}

/// Exhibit metadata as persisted in the coordination store.
///
/// `runtime_info` is stored under its own key and only attached when hydrated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exhibit {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Object whose address represents the exhibit to proxied traffic
    pub expose: String,
    pub objects: Vec<Object>,
    pub lease: String,
    /// Optional explicit start order by object name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<String>,
    #[serde(skip)]
    pub runtime_info: RuntimeInfo,
}

impl Exhibit {
    pub fn object(&self, name: &str) -> Option<&Object> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn expose_object(&self) -> Result<&Object> {
        self.object(&self.expose).ok_or_else(|| {
            VitrineError::NotFound(format!(
                "exposed object '{}' of exhibit '{}'",
                self.expose, self.id
            ))
        })
    }

    pub fn lease_duration(&self) -> Result<Duration> {
        parse_duration(&self.lease).map_err(VitrineError::Fatal)
    }

    /// Objects in provisioning order: `order` when given, declaration order otherwise
    pub fn ordered_objects(&self) -> Result<Vec<&Object>> {
        if self.order.is_empty() {
            return Ok(self.objects.iter().collect());
        }

        self.order
            .iter()
            .map(|name| {
                self.object(name).ok_or_else(|| {
                    VitrineError::Fatal(format!(
                        "order references unknown object '{}' in exhibit '{}'",
                        name, self.id
                    ))
                })
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectView {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Exhibit as presented by the management API
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExhibitView {
    pub id: String,
    pub name: String,
    pub expose: String,
    pub lease: String,
    pub objects: Vec<ObjectView>,
    pub runtime_info: RuntimeInfo,
}

impl From<&Exhibit> for ExhibitView {
    fn from(exhibit: &Exhibit) -> Self {
        Self {
            id: exhibit.id.clone(),
            name: exhibit.name.clone(),
            expose: exhibit.expose.clone(),
            lease: exhibit.lease.clone(),
            objects: exhibit
                .objects
                .iter()
                .map(|o| ObjectView {
                    name: o.name.clone(),
                    image: o.image.clone(),
                    label: o.label.clone(),
                })
                .collect(),
            runtime_info: exhibit.runtime_info.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Exhibit {
        Exhibit {
            id: "e1".to_string(),
            name: "blog".to_string(),
            expose: "web".to_string(),
            objects: vec![
                Object {
                    name: "web".to_string(),
                    image: "nginx".to_string(),
                    ..Default::default()
                },
                Object {
                    name: "db".to_string(),
                    image: "postgres".to_string(),
                    port: Some("5432".to_string()),
                    ..Default::default()
                },
            ],
            lease: "30m".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_deserialize_definition() {
        let json = r#"{
            "name": "blog",
            "expose": "web",
            "lease": "10m",
            "objects": [
                {"name": "web", "image": "nginx", "port": "8080",
                 "livecheck": {"type": "http", "config": {"path": "/health"}},
                 "environment": {"DB": "{{ @db }}"}},
                {"name": "db", "image": "postgres"}
            ]
        }"#;

        let exhibit: Exhibit = serde_json::from_str(json).unwrap();
        assert_eq!(exhibit.objects.len(), 2);
        let web = exhibit.object("web").unwrap();
        assert_eq!(web.livecheck.as_ref().unwrap().kind, LivecheckKind::Http);
        assert_eq!(
            web.livecheck.as_ref().unwrap().config_value("path"),
            Some("/health")
        );
        assert_eq!(web.port_or_default(), "8080");
        assert_eq!(exhibit.object("db").unwrap().port_or_default(), "80");
    }

    #[test]
    fn test_image_reference() {
        let mut object = Object {
            name: "web".to_string(),
            image: "nginx".to_string(),
            ..Default::default()
        };
        assert_eq!(object.image_reference(), "nginx");
        object.label = Some("1.27-alpine".to_string());
        assert_eq!(object.image_reference(), "nginx:1.27-alpine");
    }

    #[test]
    fn test_unknown_livecheck_type_rejected() {
        let json = r#"{"type": "grpc", "config": {}}"#;
        assert!(serde_json::from_str::<Livecheck>(json).is_err());
    }

    #[test]
    fn test_runtime_info_not_persisted_with_metadata() {
        let mut exhibit = sample();
        exhibit.runtime_info.hostname = "blog_web".to_string();
        let json = serde_json::to_value(&exhibit).unwrap();
        assert!(json.get("runtime_info").is_none());
    }

    #[test]
    fn test_ordered_objects() {
        let mut exhibit = sample();
        let names: Vec<_> = exhibit
            .ordered_objects()
            .unwrap()
            .iter()
            .map(|o| o.name.clone())
            .collect();
        assert_eq!(names, vec!["web", "db"]);

        exhibit.order = vec!["db".to_string(), "web".to_string()];
        let names: Vec<_> = exhibit
            .ordered_objects()
            .unwrap()
            .iter()
            .map(|o| o.name.clone())
            .collect();
        assert_eq!(names, vec!["db", "web"]);

        exhibit.order = vec!["cache".to_string()];
        assert!(exhibit.ordered_objects().is_err());
    }

    #[test]
    fn test_expose_object_and_lease() {
        let exhibit = sample();
        assert_eq!(exhibit.expose_object().unwrap().name, "web");
        assert_eq!(exhibit.lease_duration().unwrap(), Duration::from_secs(1800));
    }

    #[test]
    fn test_view() {
        let view = ExhibitView::from(&sample());
        assert_eq!(view.objects.len(), 2);
        assert_eq!(view.objects[1].image, "postgres");
    }
}
