//! Environment templating for object containers
//!
//! `{{ @peer }}` becomes the peer object's container name and `{{ host }}`
//! the exhibit's externally visible base path. Empty values are dropped.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use vitrine_common::model::{Exhibit, Object};
use vitrine_common::{Result, VitrineError, container_name};

static PEER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{ *@([\w+.-]+) *\}\}").expect("valid peer pattern")
});

static HOST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{ *host *\}\}").expect("valid host pattern")
});

#[derive(Clone, Debug)]
pub struct EnvironmentTemplate {
    hostname: String,
    public_port: u16,
}

impl EnvironmentTemplate {
    pub fn new(hostname: impl Into<String>, public_port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            public_port,
        }
    }

    /// Base path of an exhibit as seen from outside
    pub fn exhibit_base(&self, exhibit_id: &str) -> String {
        format!("{}:{}/exhibit/{}", self.hostname, self.public_port, exhibit_id)
    }

    /// Rendered `KEY=value` pairs for `object`
    pub fn fill(&self, exhibit: &Exhibit, object: &Object) -> Result<Vec<String>> {
        object
            .environment
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| Ok(format!("{}={}", key, self.render(exhibit, value)?)))
            .collect()
    }

    pub fn render(&self, exhibit: &Exhibit, value: &str) -> Result<String> {
        if let Some(unknown) = PEER_PATTERN
            .captures_iter(value)
            .map(|c| c[1].to_string())
            .find(|peer| exhibit.object(peer).is_none())
        {
            return Err(VitrineError::Fatal(format!(
                "environment references unknown object '{}' in exhibit '{}'",
                unknown, exhibit.id
            )));
        }

        let value = PEER_PATTERN.replace_all(value, |c: &Captures<'_>| {
            container_name(&exhibit.name, &c[1])
        });
        let base = self.exhibit_base(&exhibit.id);
        Ok(HOST_PATTERN.replace_all(&value, base.as_str()).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exhibit() -> Exhibit {
        let object = |name: &str| Object {
            name: name.to_string(),
            image: "img".to_string(),
            ..Default::default()
        };
        Exhibit {
            id: "abc".to_string(),
            name: "blog".to_string(),
            expose: "web".to_string(),
            objects: vec![object("web"), object("db"), object("cache.v2")],
            lease: "10m".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_peer_and_host_placeholders() {
        let template = EnvironmentTemplate::new("museum.local", 8080);
        let exhibit = exhibit();

        assert_eq!(
            template.render(&exhibit, "postgres://{{ @db }}:5432/app").unwrap(),
            "postgres://blog_db:5432/app"
        );
        assert_eq!(
            template.render(&exhibit, "{{@cache.v2}}").unwrap(),
            "blog_cache.v2"
        );
        assert_eq!(
            template.render(&exhibit, "http://{{ host }}/").unwrap(),
            "http://museum.local:8080/exhibit/abc/"
        );
        assert_eq!(template.render(&exhibit, "plain").unwrap(), "plain");
    }

    #[test]
    fn test_unknown_peer_is_fatal() {
        let template = EnvironmentTemplate::new("localhost", 80);
        assert!(matches!(
            template.render(&exhibit(), "{{ @queue }}"),
            Err(VitrineError::Fatal(_))
        ));
    }

    #[test]
    fn test_fill_skips_empty_values() {
        let template = EnvironmentTemplate::new("localhost", 80);
        let mut exhibit = exhibit();
        exhibit.objects[0].environment = [
            ("DB_HOST".to_string(), "{{ @db }}".to_string()),
            ("EMPTY".to_string(), String::new()),
        ]
        .into();

        let env = template.fill(&exhibit, &exhibit.objects[0]).unwrap();
        assert_eq!(env, vec!["DB_HOST=blog_db".to_string()]);
    }
}
