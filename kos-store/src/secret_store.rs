//! High-level Secret operations. The generic `FileObjectStore::create`/
//! `update` would otherwise serialize `SecretSpec::data` straight into the
//! JSON document, which is exactly what `secret_data` exists to avoid —
//! these wrappers split the binary values out before the envelope ever
//! reaches disk and restore only the key names via `status.keys`.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use kos_core::kinds::secret::Secret;
use kos_core::{Error, Kind};

use crate::{secret_data, FileObjectStore};

pub async fn create_secret(store: &FileObjectStore, mut secret: Secret) -> Result<Secret, Error> {
    merge_string_data(&mut secret);
    let data = take_data(&mut secret);

    let created = store.create(secret).await?;
    write_all(store, &created, &data).await?;
    Ok(created)
}

pub async fn update_secret(store: &FileObjectStore, mut secret: Secret) -> Result<Secret, Error> {
    merge_string_data(&mut secret);
    let data = take_data(&mut secret);

    let updated = store.update(secret).await?;
    write_all(store, &updated, &data).await?;
    Ok(updated)
}

pub async fn get_secret(store: &FileObjectStore, namespace: Option<&str>, name: &str) -> Result<Secret, Error> {
    store.get(Kind::Secret, namespace, name).await
}

pub async fn delete_secret(store: &FileObjectStore, namespace: Option<&str>, name: &str) -> Result<(), Error> {
    store.delete(Kind::Secret, namespace, name).await?;
    secret_data::delete_all(store.root(), namespace, name).await
}

fn merge_string_data(secret: &mut Secret) {
    for (key, value) in secret.spec.string_data.drain() {
        secret.spec.data.insert(key, STANDARD.encode(value.as_bytes()));
    }
}

fn take_data(secret: &mut Secret) -> HashMap<String, String> {
    let data = std::mem::take(&mut secret.spec.data);
    let mut keys: Vec<String> = data.keys().cloned().collect();
    keys.sort();
    secret.status.keys = keys;
    data
}

async fn write_all(store: &FileObjectStore, secret: &Secret, data: &HashMap<String, String>) -> Result<(), Error> {
    for (key, encoded) in data {
        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Invalid(format!("secret key \"{key}\" is not valid base64: {e}")))?;
        secret_data::write_key(store.root(), secret.metadata.namespace.as_deref(), &secret.metadata.name, key, &raw).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kos_core::kinds::secret::SecretSpec;
    use kos_core::{Object, ObjectMeta};

    fn store() -> (FileObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileObjectStore::new(dir.path()), dir)
    }

    fn secret_with_string_data(name: &str) -> Secret {
        let mut spec = SecretSpec::default();
        spec.string_data.insert("password".to_string(), "hunter2".to_string());
        Object::new(Kind::Secret, ObjectMeta::new(name, Some("default".into())), spec)
    }

    #[tokio::test]
    async fn create_secret_strips_data_from_the_envelope_and_writes_it_to_disk() {
        let (store, _dir) = store();
        let created = create_secret(&store, secret_with_string_data("creds")).await.unwrap();

        assert!(created.spec.data.is_empty());
        assert_eq!(created.status.keys, vec!["password".to_string()]);

        let on_disk = tokio::fs::read_to_string(crate::object_path(store.root(), Kind::Secret, Some("default"), "creds")).await.unwrap();
        assert!(!on_disk.contains("hunter2"));

        let raw = secret_data::read_key(store.root(), Some("default"), "creds", "password").await.unwrap();
        assert_eq!(raw, b"hunter2");
    }

    #[tokio::test]
    async fn delete_secret_removes_both_envelope_and_data_directory() {
        let (store, _dir) = store();
        create_secret(&store, secret_with_string_data("creds")).await.unwrap();

        delete_secret(&store, Some("default"), "creds").await.unwrap();

        assert!(!store.exists(Kind::Secret, Some("default"), "creds").await);
        assert!(secret_data::read_key(store.root(), Some("default"), "creds", "password").await.is_err());
    }
}
