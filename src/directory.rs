use async_trait::async_trait;
use dashmap::DashMap;

use crate::bundle::{PreKeyBundle, PreKeyPublication};
use crate::core::PeerAddress;
use crate::error::{ProtocolError, Result};

/// Client interface to the remote key-bundle directory.
///
/// The directory is the engine's only network dependency. A fetch that fails
/// (offline, unknown device, exhausted bundle) fails closed: the caller
/// retries with backoff and no session is created in the meantime.
#[async_trait]
pub trait KeyBundleDirectory: Send + Sync {
    async fn publish_bundle(
        &self,
        device: &PeerAddress,
        publication: PreKeyPublication,
    ) -> Result<()>;

    /// Fetches a handshake bundle for `device`. At most one one-time prekey
    /// is consumed from the published batch per fetch.
    async fn fetch_bundle(&self, device: &PeerAddress) -> Result<PreKeyBundle>;

    /// Remaining one-time prekeys published for `device`; drives the
    /// replenishment floor.
    async fn one_time_key_count(&self, device: &PeerAddress) -> Result<usize>;
}

/// Directory backed by process memory. Stands in for the remote service in
/// tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryDirectory {
    published: DashMap<PeerAddress, PreKeyPublication>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyBundleDirectory for InMemoryDirectory {
    async fn publish_bundle(
        &self,
        device: &PeerAddress,
        publication: PreKeyPublication,
    ) -> Result<()> {
        self.published.insert(device.clone(), publication);
        Ok(())
    }

    async fn fetch_bundle(&self, device: &PeerAddress) -> Result<PreKeyBundle> {
        let mut entry = self
            .published
            .get_mut(device)
            .ok_or_else(|| ProtocolError::BundleUnavailable(device.clone()))?;

        // Hand each one-time key out exactly once.
        let one_time_prekey = if entry.one_time_prekeys.is_empty() {
            None
        } else {
            Some(entry.one_time_prekeys.remove(0))
        };

        Ok(PreKeyBundle {
            registration_id: entry.registration_id,
            identity_key: entry.identity_key,
            signed_prekey: entry.signed_prekey.clone(),
            one_time_prekey,
        })
    }

    async fn one_time_key_count(&self, device: &PeerAddress) -> Result<usize> {
        Ok(self
            .published
            .get(device)
            .map(|entry| entry.one_time_prekeys.len())
            .unwrap_or(0))
    }
}
