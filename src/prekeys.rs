use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::bundle::{OneTimePreKeyPublic, PreKeyPublication, SignedPreKeyPublic};
use crate::core::curve::KeyPair;
use crate::error::{ProtocolError, Result};
use crate::identity::{IdentityKey, IdentityKeyPair};
use crate::store::SecretStore;

const IDENTITY_TAG: &str = "identity/key-pair";
const META_TAG: &str = "prekeys/meta";

fn signed_prekey_tag(id: u32) -> String {
    format!("signed-prekey/{id}")
}

fn one_time_prekey_tag(id: u32) -> String {
    format!("one-time-prekey/{id}")
}

/// Public metadata of one signed prekey generation.
#[derive(Clone, Serialize, Deserialize)]
pub struct SignedPreKeyMeta {
    pub id: u32,
    pub public_key: [u8; 32],
    pub signature: Vec<u8>,
    pub created_at: DateTime<Utc>,
    /// Set when a newer signed prekey replaced this one. Retired keys are
    /// kept through a grace window for in-flight handshakes, then destroyed.
    pub retired_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
struct PreKeyMeta {
    registration_id: u32,
    next_signed_prekey_id: u32,
    next_one_time_prekey_id: u32,
    /// Oldest first; the last entry is the current signed prekey.
    signed_prekeys: Vec<SignedPreKeyMeta>,
    /// Ids of unconsumed one-time prekeys.
    one_time_ids: Vec<u32>,
}

/// Owns the device's long-term and medium-term key material.
///
/// Private key bytes live only in the injected [`SecretStore`]; everything
/// returned by the public API is public material. The crate-internal
/// accessors that materialize key pairs exist for the handshake and are not
/// exported.
pub struct PreKeyManager {
    secrets: Arc<dyn SecretStore>,
    identity: IdentityKeyPair,
    meta: Mutex<PreKeyMeta>,
}

impl PreKeyManager {
    /// Loads the device's key material, generating the identity and first
    /// signed prekey on first run.
    pub async fn initialize(secrets: Arc<dyn SecretStore>) -> Result<Self> {
        let identity = match secrets.load(IDENTITY_TAG).await? {
            Some(bytes) => IdentityKeyPair::deserialize(&bytes)?,
            None => {
                let pair = IdentityKeyPair::generate(&mut rand::rng());
                secrets.store(IDENTITY_TAG, pair.serialize().as_slice()).await?;
                log::info!("generated new device identity");
                pair
            }
        };

        let meta = match secrets.load(META_TAG).await? {
            Some(bytes) => {
                let (meta, _): (PreKeyMeta, _) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                        .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
                meta
            }
            None => PreKeyMeta {
                registration_id: rand::rng().random_range(1..0x4000),
                next_signed_prekey_id: 1,
                next_one_time_prekey_id: 1,
                signed_prekeys: Vec::new(),
                one_time_ids: Vec::new(),
            },
        };

        let manager = Self {
            secrets,
            identity,
            meta: Mutex::new(meta),
        };
        let needs_signed_prekey = { manager.meta.lock().await.signed_prekeys.is_empty() };
        if needs_signed_prekey {
            manager.generate_signed_prekey().await?;
        }
        Ok(manager)
    }

    pub fn identity_key(&self) -> IdentityKey {
        self.identity.identity_key()
    }

    pub(crate) fn identity_key_pair(&self) -> &IdentityKeyPair {
        &self.identity
    }

    pub async fn registration_id(&self) -> u32 {
        self.meta.lock().await.registration_id
    }

    async fn save_meta(&self, meta: &PreKeyMeta) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(meta, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        self.secrets.store(META_TAG, &bytes).await
    }

    /// Generates and signs a fresh signed prekey, retiring the current one.
    pub async fn generate_signed_prekey(&self) -> Result<SignedPreKeyMeta> {
        let mut meta = self.meta.lock().await;
        let id = meta.next_signed_prekey_id;
        meta.next_signed_prekey_id += 1;

        let pair = KeyPair::generate(&mut rand::rng());
        self.secrets
            .store(&signed_prekey_tag(id), &pair.private_key.serialize())
            .await?;

        let now = Utc::now();
        if let Some(current) = meta.signed_prekeys.last_mut()
            && current.retired_at.is_none()
        {
            current.retired_at = Some(now);
        }

        let record = SignedPreKeyMeta {
            id,
            public_key: pair.public_key.serialize(),
            signature: self.identity.sign(&pair.public_key.serialize()).to_vec(),
            created_at: now,
            retired_at: None,
        };
        meta.signed_prekeys.push(record.clone());
        self.save_meta(&meta).await?;
        log::info!("generated signed prekey {id}");
        Ok(record)
    }

    /// Rotates the signed prekey when it is older than `rotation`, and purges
    /// retired keys whose grace window has passed. Returns whether a rotation
    /// happened.
    pub async fn rotate_signed_prekey_if_due(
        &self,
        rotation: Duration,
        grace: Duration,
    ) -> Result<bool> {
        let now = Utc::now();
        let due = {
            let meta = self.meta.lock().await;
            match meta.signed_prekeys.last() {
                Some(current) => current.created_at + rotation <= now,
                None => true,
            }
        };
        if due {
            self.generate_signed_prekey().await?;
        }

        let mut meta = self.meta.lock().await;
        let mut expired = Vec::new();
        meta.signed_prekeys.retain(|record| {
            let keep = match record.retired_at {
                Some(retired_at) => retired_at + grace > now,
                None => true,
            };
            if !keep {
                expired.push(record.id);
            }
            keep
        });
        for id in expired {
            self.secrets.delete(&signed_prekey_tag(id)).await?;
            log::info!("destroyed retired signed prekey {id}");
        }
        self.save_meta(&meta).await?;
        Ok(due)
    }

    pub async fn current_signed_prekey(&self) -> Result<SignedPreKeyMeta> {
        self.meta
            .lock()
            .await
            .signed_prekeys
            .last()
            .cloned()
            .ok_or(ProtocolError::InvalidState(
                "current_signed_prekey",
                "no signed prekey generated".to_string(),
            ))
    }

    /// Materializes a signed prekey pair, current or within its grace window.
    pub(crate) async fn signed_prekey_pair(&self, id: u32) -> Result<KeyPair> {
        {
            let meta = self.meta.lock().await;
            if !meta.signed_prekeys.iter().any(|record| record.id == id) {
                return Err(ProtocolError::InvalidSignedPreKeyId(id));
            }
        }
        let bytes = self
            .secrets
            .load(&signed_prekey_tag(id))
            .await?
            .ok_or(ProtocolError::InvalidSignedPreKeyId(id))?;
        Ok(KeyPair::from_private_bytes(&bytes)?)
    }

    /// Creates a batch of one-time prekeys and returns their public halves.
    pub async fn generate_one_time_prekeys(&self, count: usize) -> Result<Vec<OneTimePreKeyPublic>> {
        let mut meta = self.meta.lock().await;
        let mut publics = Vec::with_capacity(count);
        for _ in 0..count {
            let id = meta.next_one_time_prekey_id;
            meta.next_one_time_prekey_id += 1;

            let pair = KeyPair::generate(&mut rand::rng());
            self.secrets
                .store(&one_time_prekey_tag(id), &pair.private_key.serialize())
                .await?;
            meta.one_time_ids.push(id);
            publics.push(OneTimePreKeyPublic {
                id,
                public_key: pair.public_key.serialize(),
            });
        }
        self.save_meta(&meta).await?;
        log::debug!("generated {count} one-time prekeys");
        Ok(publics)
    }

    /// Materializes a one-time prekey pair without consuming it. The caller
    /// must [`Self::mark_consumed`] once the handshake that used it succeeds.
    pub(crate) async fn one_time_prekey_pair(&self, id: u32) -> Result<KeyPair> {
        {
            let meta = self.meta.lock().await;
            if !meta.one_time_ids.contains(&id) {
                return Err(ProtocolError::OneTimePreKeyUnavailable(id));
            }
        }
        let bytes = self
            .secrets
            .load(&one_time_prekey_tag(id))
            .await?
            .ok_or(ProtocolError::OneTimePreKeyUnavailable(id))?;
        Ok(KeyPair::from_private_bytes(&bytes)?)
    }

    /// Destroys a consumed one-time prekey. Idempotent.
    pub async fn mark_consumed(&self, id: u32) -> Result<()> {
        let mut meta = self.meta.lock().await;
        meta.one_time_ids.retain(|&existing| existing != id);
        self.secrets.delete(&one_time_prekey_tag(id)).await?;
        self.save_meta(&meta).await?;
        log::info!("one-time prekey {id} consumed and destroyed");
        Ok(())
    }

    pub async fn available_one_time_count(&self) -> usize {
        self.meta.lock().await.one_time_ids.len()
    }

    /// Builds the directory publication from the current key material.
    pub async fn publication(&self) -> Result<PreKeyPublication> {
        let signed = self.current_signed_prekey().await?;
        let (registration_id, one_time_ids) = {
            let meta = self.meta.lock().await;
            (meta.registration_id, meta.one_time_ids.clone())
        };

        let mut one_time_prekeys = Vec::with_capacity(one_time_ids.len());
        for id in one_time_ids {
            let pair = self.one_time_prekey_pair(id).await?;
            one_time_prekeys.push(OneTimePreKeyPublic {
                id,
                public_key: pair.public_key.serialize(),
            });
        }

        Ok(PreKeyPublication {
            registration_id,
            identity_key: self.identity.identity_key().serialize(),
            signed_prekey: SignedPreKeyPublic {
                id: signed.id,
                public_key: signed.public_key,
                signature: signed.signature,
            },
            one_time_prekeys,
        })
    }
}
