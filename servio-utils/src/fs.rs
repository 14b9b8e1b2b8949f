use servio_core::{Error, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Writes `contents` to `path` with the given mode, replacing any
/// existing file atomically: the bytes land in a temporary sibling first
/// and are renamed into place, so readers never observe a partial file.
pub async fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let tmp = path.with_extension("tmp");

    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| Error::internal(&format!("failed to write {}", tmp.display()), e))?;

    tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| Error::internal(&format!("failed to chmod {}", tmp.display()), e))?;

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::internal(&format!("failed to install {}", path.display()), e))
}

/// Removes a file, treating "already gone" as success.
pub async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::internal(
            &format!("failed to remove {}", path.display()),
            e,
        )),
    }
}
