//! Response body rewriting
//!
//! Upstream applications render links against the public authority
//! (`host:port`). Those links are redirected into the exhibit's sub-path
//! (`host:port/exhibit/{id}`) without touching links that already point there.

use std::borrow::Cow;
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use regex::bytes::{NoExpand, Regex};
use tracing::debug;
use vitrine_common::{Result, VitrineError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Encoding {
    Identity,
    Gzip,
}

impl Encoding {
    fn parse(content_encoding: Option<&str>) -> Option<Self> {
        match content_encoding.map(|e| e.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("identity") => Some(Encoding::Identity),
            Some("gzip") | Some("x-gzip") => Some(Encoding::Gzip),
            _ => None,
        }
    }
}

fn replace_all(haystack: &[u8], needle: &str, replacement: &[u8]) -> Result<Vec<u8>> {
    let pattern = Regex::new(&regex::escape(needle))
        .map_err(|e| VitrineError::Fatal(format!("rewrite pattern: {}", e)))?;
    Ok(match pattern.replace_all(haystack, NoExpand(replacement)) {
        Cow::Borrowed(unchanged) => unchanged.to_vec(),
        Cow::Owned(replaced) => replaced,
    })
}

/// Replace every `search` not already part of `target` with `target`.
///
/// Occurrences of `target` are parked behind a random placeholder first so
/// the second pass cannot match inside them.
pub fn replace_authority(body: &[u8], search: &str, target: &str) -> Result<Vec<u8>> {
    if search.is_empty() {
        return Ok(body.to_vec());
    }
    let placeholder = uuid::Uuid::new_v4().to_string();

    let parked = replace_all(body, target, placeholder.as_bytes())?;
    let rewritten = replace_all(&parked, search, target.as_bytes())?;
    replace_all(&rewritten, &placeholder, target.as_bytes())
}

fn decode(body: &[u8], encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Identity => Ok(body.to_vec()),
        Encoding::Gzip => {
            let mut decoded = Vec::new();
            GzDecoder::new(body)
                .read_to_end(&mut decoded)
                .map_err(|e| VitrineError::Fatal(format!("failed to decode gzip body: {}", e)))?;
            Ok(decoded)
        }
    }
}

fn encode(body: &[u8], encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Identity => Ok(body.to_vec()),
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(body)
                .and_then(|_| encoder.finish())
                .map_err(|e| VitrineError::Fatal(format!("failed to encode gzip body: {}", e)))
        }
    }
}

/// Rewrites bodies from the public authority into exhibit sub-paths
#[derive(Clone, Debug)]
pub struct Rewriter {
    authority: String,
}

impl Rewriter {
    pub fn new(hostname: &str, public_port: u16) -> Self {
        Self {
            authority: format!("{}:{}", hostname, public_port),
        }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn target(&self, exhibit_id: &str) -> String {
        format!("{}/exhibit/{}", self.authority, exhibit_id)
    }

    /// Rewrite a body encoded with `content_encoding`.
    ///
    /// Encodings other than gzip and identity are passed through untouched.
    pub fn rewrite_body(
        &self,
        exhibit_id: &str,
        body: &[u8],
        content_encoding: Option<&str>,
    ) -> Result<Vec<u8>> {
        let Some(encoding) = Encoding::parse(content_encoding) else {
            debug!(exhibit_id = %exhibit_id, encoding = ?content_encoding, "unsupported encoding, body not rewritten");
            return Ok(body.to_vec());
        };

        let decoded = decode(body, encoding)?;
        let rewritten = replace_authority(&decoded, &self.authority, &self.target(exhibit_id))?;
        encode(&rewritten, encoding)
    }

    /// Rewrite a `Location` header value
    pub fn rewrite_location(&self, exhibit_id: &str, location: &str) -> Result<String> {
        let prefix = format!("/exhibit/{}", exhibit_id);
        if location.starts_with('/') && !location.starts_with("//") {
            if location == prefix || location.starts_with(&format!("{}/", prefix)) {
                return Ok(location.to_string());
            }
            return Ok(format!("{}{}", prefix, location));
        }

        let rewritten =
            replace_authority(location.as_bytes(), &self.authority, &self.target(exhibit_id))?;
        String::from_utf8(rewritten)
            .map_err(|e| VitrineError::Fatal(format!("rewritten location is not utf-8: {}", e)))
    }
}
