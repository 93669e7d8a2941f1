//! Volume drivers
//!
//! Only the `local` driver exists: a host directory named by `config.path`
//! bind-mounted into the container.

use std::collections::BTreeMap;
use std::path::Path;

use vitrine_common::model::VolumeDriver;
use vitrine_common::{Result, VitrineError};

pub const LOCAL_DRIVER: &str = "local";

const PROBE_FILE: &str = ".vitrine";

/// Check a volume declaration when an exhibit is created
pub fn check_validity(driver: &VolumeDriver) -> Result<()> {
    match driver.kind.as_str() {
        LOCAL_DRIVER => local_path(&driver.config).map(|_| ()),
        other => Err(VitrineError::Validation(format!(
            "unsupported volume driver '{}'",
            other
        ))),
    }
}

/// Host path backing a volume, verified writable
pub fn provision_storage(driver: &VolumeDriver) -> Result<String> {
    check_validity(driver)?;
    let path = local_path(&driver.config)?;

    let probe = Path::new(path).join(PROBE_FILE);
    std::fs::write(&probe, b"vitrine")
        .and_then(|_| std::fs::remove_file(&probe))
        .map_err(|e| VitrineError::Fatal(format!("volume path '{}' is not writable: {}", path, e)))?;

    Ok(path.to_string())
}

fn local_path(config: &BTreeMap<String, String>) -> Result<&str> {
    let path = config
        .get("path")
        .map(String::as_str)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| VitrineError::Validation("local volume requires a path".to_string()))?;

    if !Path::new(path).exists() {
        return Err(VitrineError::Validation(format!(
            "volume path '{}' does not exist",
            path
        )));
    }
    Ok(path)
}
