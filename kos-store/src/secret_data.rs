//! Binary Secret values never go in the JSON document; they live in a
//! sibling `<name>_data/<key>` directory with mode 0600, per the external
//! interfaces section. The JSON document only lists key names
//! (`Secret.status.keys`).

use kos_core::Error;

use crate::path::secret_data_dir;

pub async fn write_key(root: &std::path::Path, namespace: Option<&str>, name: &str, key: &str, value: &[u8]) -> Result<(), Error> {
    let dir = secret_data_dir(root, namespace, name);
    tokio::fs::create_dir_all(&dir).await.map_err(|e| Error::Internal(format!("creating {}: {e}", dir.display())))?;
    let path = dir.join(key);
    tokio::fs::write(&path, value).await.map_err(|e| Error::Internal(format!("writing {}: {e}", path.display())))?;
    set_owner_only_permissions(&path).await?;
    Ok(())
}

pub async fn read_key(root: &std::path::Path, namespace: Option<&str>, name: &str, key: &str) -> Result<Vec<u8>, Error> {
    let path = secret_data_dir(root, namespace, name).join(key);
    tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::not_found("SecretKey", namespace.map(String::from), format!("{name}/{key}")),
        _ => Error::Internal(format!("reading {}: {e}", path.display())),
    })
}

pub async fn delete_all(root: &std::path::Path, namespace: Option<&str>, name: &str) -> Result<(), Error> {
    let dir = secret_data_dir(root, namespace, name);
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Internal(format!("removing {}: {e}", dir.display()))),
    }
}

#[cfg(unix)]
async fn set_owner_only_permissions(path: &std::path::Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    tokio::fs::set_permissions(path, perms)
        .await
        .map_err(|e| Error::Internal(format!("setting permissions on {}: {e}", path.display())))
}

#[cfg(not(unix))]
async fn set_owner_only_permissions(_path: &std::path::Path) -> Result<(), Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        write_key(dir.path(), Some("default"), "creds", "password", b"hunter2").await.unwrap();
        let value = read_key(dir.path(), Some("default"), "creds", "password").await.unwrap();
        assert_eq!(value, b"hunter2");
    }

    #[tokio::test]
    async fn delete_all_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_key(dir.path(), Some("default"), "creds", "password", b"hunter2").await.unwrap();
        delete_all(dir.path(), Some("default"), "creds").await.unwrap();
        assert!(read_key(dir.path(), Some("default"), "creds", "password").await.is_err());
    }
}
