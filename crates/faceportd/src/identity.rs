//! Stable kiosk identity reported to the recognition service.

use std::path::Path;

const DEVICE_ID_FILE: &str = "device_id";

/// Resolve the kiosk's device id.
///
/// An explicitly configured id wins. Otherwise the id persisted under
/// `data_dir` is reused, or a new `kiosk-<uuid>` is generated and stored.
pub fn resolve_device_id(configured: Option<&str>, data_dir: &Path) -> std::io::Result<String> {
    if let Some(id) = configured.map(str::trim).filter(|id| !id.is_empty()) {
        return Ok(id.to_string());
    }

    let path = data_dir.join(DEVICE_ID_FILE);
    match std::fs::read_to_string(&path) {
        Ok(stored) if !stored.trim().is_empty() => return Ok(stored.trim().to_string()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let id = format!("kiosk-{}", uuid::Uuid::new_v4());
    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&path, format!("{id}\n"))?;
    tracing::info!(device_id = %id, path = %path.display(), "generated kiosk device id");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_id_wins() {
        let dir = tempfile::tempdir().unwrap();
        let id = resolve_device_id(Some(" lobby-1 "), dir.path()).unwrap();
        assert_eq!(id, "lobby-1");
        assert!(!dir.path().join(DEVICE_ID_FILE).exists());
    }

    #[test]
    fn test_generated_id_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("faceport");

        let first = resolve_device_id(None, &data_dir).unwrap();
        assert!(first.starts_with("kiosk-"));
        let second = resolve_device_id(Some(""), &data_dir).unwrap();
        assert_eq!(first, second);
    }
}
