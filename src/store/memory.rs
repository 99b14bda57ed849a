use async_trait::async_trait;
use dashmap::DashMap;

use crate::core::PeerAddress;
use crate::error::Result;
use crate::store::{SecretStore, SessionStore};

/// In-memory session store for tests and short-lived embedders.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<PeerAddress, Vec<u8>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_session(&self, peer: &PeerAddress) -> Result<Option<Vec<u8>>> {
        Ok(self.sessions.get(peer).map(|entry| entry.value().clone()))
    }

    async fn store_session(&self, peer: &PeerAddress, record: &[u8]) -> Result<()> {
        self.sessions.insert(peer.clone(), record.to_vec());
        Ok(())
    }

    async fn delete_session(&self, peer: &PeerAddress) -> Result<()> {
        self.sessions.remove(peer);
        Ok(())
    }

    async fn has_session(&self, peer: &PeerAddress) -> Result<bool> {
        Ok(self.sessions.contains_key(peer))
    }
}

/// In-memory secret store. Real deployments inject a platform keystore
/// behind the same trait.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: DashMap<String, Vec<u8>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn store(&self, tag: &str, bytes: &[u8]) -> Result<()> {
        self.secrets.insert(tag.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn load(&self, tag: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.secrets.get(tag).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, tag: &str) -> Result<()> {
        self.secrets.remove(tag);
        Ok(())
    }
}
