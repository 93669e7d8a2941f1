//! Coordination store key layout
//!
//! ```text
//! /{base}/{id}/meta            exhibit definition (JSON)
//! /{base}/{id}/runtime_info    runtime info (JSON)
//! /{base}/{id}/last_accessed   unix seconds (decimal text)
//! /{base}/{id}/lock/{name}/..  distributed lock contenders
//! ```

const META: &str = "meta";
const RUNTIME_INFO: &str = "runtime_info";
const LAST_ACCESSED: &str = "last_accessed";
const LOCK: &str = "lock";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    Meta,
    RuntimeInfo,
    LastAccessed,
    Lock,
}

#[derive(Clone, Debug)]
pub struct KeySpace {
    root: String,
}

impl KeySpace {
    pub fn new(base: &str) -> Self {
        Self {
            root: format!("/{}/", base.trim_matches('/')),
        }
    }

    /// Prefix covering every exhibit
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn exhibit_prefix(&self, id: &str) -> String {
        format!("{}{}/", self.root, id)
    }

    pub fn meta(&self, id: &str) -> String {
        format!("{}{}/{}", self.root, id, META)
    }

    pub fn runtime_info(&self, id: &str) -> String {
        format!("{}{}/{}", self.root, id, RUNTIME_INFO)
    }

    pub fn last_accessed(&self, id: &str) -> String {
        format!("{}{}/{}", self.root, id, LAST_ACCESSED)
    }

    pub fn lock(&self, id: &str, name: &str) -> String {
        format!("{}{}/{}/{}", self.root, id, LOCK, name)
    }

    /// Split a key into exhibit id and kind; `None` for foreign keys
    pub fn parse<'a>(&self, key: &'a str) -> Option<(&'a str, KeyKind)> {
        let rest = key.strip_prefix(self.root.as_str())?;
        let (id, tail) = rest.split_once('/')?;
        if id.is_empty() {
            return None;
        }

        let kind = match tail {
            META => KeyKind::Meta,
            RUNTIME_INFO => KeyKind::RuntimeInfo,
            LAST_ACCESSED => KeyKind::LastAccessed,
            t if t == LOCK || t.starts_with("lock/") => KeyKind::Lock,
            _ => return None,
        };
        Some((id, kind))
    }
}
