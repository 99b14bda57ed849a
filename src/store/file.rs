use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rand::RngCore;
use tokio::fs;
use zeroize::Zeroizing;

use crate::core::PeerAddress;
use crate::crypto::aead::{AeadCipher, KEY_SIZE, NONCE_SIZE, random_nonce};
use crate::error::{ProtocolError, Result};
use crate::store::{SecretStore, SessionStore};

const STORE_KEY_TAG: &str = "session-store/key";

/// File-backed session store, one file per peer, encrypted at rest.
///
/// Records are sealed with the injected AEAD cipher under a store key held in
/// the secret store; each write uses a fresh nonce, persisted as a prefix of
/// the file body.
pub struct FileSessionStore {
    base_path: PathBuf,
    cipher: Arc<dyn AeadCipher>,
    store_key: Zeroizing<[u8; KEY_SIZE]>,
}

impl FileSessionStore {
    pub async fn open(
        path: impl Into<PathBuf>,
        cipher: Arc<dyn AeadCipher>,
        secrets: &dyn SecretStore,
    ) -> Result<Self> {
        let base_path = path.into();
        fs::create_dir_all(base_path.join("sessions"))
            .await
            .map_err(|e| ProtocolError::Storage(e.to_string()))?;

        let store_key = match secrets.load(STORE_KEY_TAG).await? {
            Some(bytes) => {
                let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
                    ProtocolError::SecretStore("session store key has wrong length".to_string())
                })?;
                Zeroizing::new(key)
            }
            None => {
                let mut key = Zeroizing::new([0u8; KEY_SIZE]);
                rand::rng().fill_bytes(&mut *key);
                secrets.store(STORE_KEY_TAG, key.as_slice()).await?;
                key
            }
        };

        Ok(Self {
            base_path,
            cipher,
            store_key,
        })
    }

    fn sanitize_filename(key: &str) -> String {
        key.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-', "_")
    }

    fn path_for(&self, peer: &PeerAddress) -> PathBuf {
        self.base_path
            .join("sessions")
            .join(Self::sanitize_filename(&peer.to_string()))
    }

    fn seal(&self, peer: &PeerAddress, record: &[u8]) -> Result<Vec<u8>> {
        let nonce = random_nonce(&mut rand::rng());
        let sealed = self.cipher.seal(
            &self.store_key,
            &nonce,
            record,
            peer.to_string().as_bytes(),
        )?;
        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn unseal(&self, peer: &PeerAddress, body: &[u8]) -> Result<Vec<u8>> {
        if body.len() < NONCE_SIZE {
            return Err(ProtocolError::SessionCorrupted(peer.clone()));
        }
        let nonce: [u8; NONCE_SIZE] = body[..NONCE_SIZE]
            .try_into()
            .expect("length checked above");
        self.cipher
            .open(
                &self.store_key,
                &nonce,
                &body[NONCE_SIZE..],
                peer.to_string().as_bytes(),
            )
            .map_err(|_| ProtocolError::SessionCorrupted(peer.clone()))
    }

    async fn read_file(path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProtocolError::Storage(e.to_string())),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load_session(&self, peer: &PeerAddress) -> Result<Option<Vec<u8>>> {
        match Self::read_file(&self.path_for(peer)).await? {
            Some(body) => Ok(Some(self.unseal(peer, &body)?)),
            None => Ok(None),
        }
    }

    async fn store_session(&self, peer: &PeerAddress, record: &[u8]) -> Result<()> {
        let body = self.seal(peer, record)?;
        fs::write(self.path_for(peer), body)
            .await
            .map_err(|e| ProtocolError::Storage(e.to_string()))
    }

    async fn delete_session(&self, peer: &PeerAddress) -> Result<()> {
        match fs::remove_file(self.path_for(peer)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProtocolError::Storage(e.to_string())),
        }
    }

    async fn has_session(&self, peer: &PeerAddress) -> Result<bool> {
        Ok(self.path_for(peer).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aead::Aes256GcmCipher;
    use crate::store::MemorySecretStore;

    async fn open_store(dir: &Path, secrets: &MemorySecretStore) -> FileSessionStore {
        FileSessionStore::open(dir, Arc::new(Aes256GcmCipher), secrets)
            .await
            .expect("open store")
    }

    #[tokio::test]
    async fn records_round_trip_and_are_encrypted_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let secrets = MemorySecretStore::new();
        let store = open_store(dir.path(), &secrets).await;
        let peer = PeerAddress::new("bob", 1);

        store.store_session(&peer, b"ratchet state").await.expect("store");
        assert_eq!(
            store.load_session(&peer).await.expect("load").as_deref(),
            Some(&b"ratchet state"[..])
        );

        let on_disk = std::fs::read(dir.path().join("sessions").join("bob.1")).expect("read");
        assert!(!on_disk.windows(b"ratchet state".len()).any(|w| w == b"ratchet state"));
    }

    #[tokio::test]
    async fn store_key_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let secrets = MemorySecretStore::new();
        let peer = PeerAddress::new("bob", 1);

        let store = open_store(dir.path(), &secrets).await;
        store.store_session(&peer, b"state").await.expect("store");
        drop(store);

        let reopened = open_store(dir.path(), &secrets).await;
        assert_eq!(
            reopened.load_session(&peer).await.expect("load").as_deref(),
            Some(&b"state"[..])
        );
    }

    #[tokio::test]
    async fn corrupted_file_is_reported_not_fabricated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let secrets = MemorySecretStore::new();
        let store = open_store(dir.path(), &secrets).await;
        let peer = PeerAddress::new("bob", 1);

        store.store_session(&peer, b"state").await.expect("store");
        let path = dir.path().join("sessions").join("bob.1");
        let mut body = std::fs::read(&path).expect("read");
        let last = body.len() - 1;
        body[last] ^= 0xFF;
        std::fs::write(&path, body).expect("write");

        assert!(matches!(
            store.load_session(&peer).await,
            Err(ProtocolError::SessionCorrupted(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let secrets = MemorySecretStore::new();
        let store = open_store(dir.path(), &secrets).await;
        let peer = PeerAddress::new("bob", 1);

        store.delete_session(&peer).await.expect("delete missing");
        store.store_session(&peer, b"state").await.expect("store");
        store.delete_session(&peer).await.expect("delete");
        assert!(!store.has_session(&peer).await.expect("has"));
    }
}
