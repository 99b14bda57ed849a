use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::core::PeerAddress;
use crate::crypto::aead::AeadCipher;
use crate::directory::KeyBundleDirectory;
use crate::envelope::EncryptedEnvelope;
use crate::error::{ProtocolError, Result};
use crate::fingerprint::{SafetyNumber, safety_number};
use crate::handshake;
use crate::identity::IdentityKey;
use crate::prekeys::PreKeyManager;
use crate::ratchet::{self, RatchetState, SessionRecord};
use crate::store::SessionStore;

/// Orchestrates handshakes, the per-message ratchet and session persistence.
///
/// Every collaborator is injected at construction. All mutating operations on
/// one peer's session are serialized behind that peer's lock: each operation
/// is a read-modify-write of the ratchet state, and concurrent sends would
/// otherwise double-derive a message key. State reaches the session store
/// only after an operation fully succeeds, so abandoning a call at any await
/// point leaves the stored session untouched.
pub struct EncryptionEngine {
    address: PeerAddress,
    prekeys: Arc<PreKeyManager>,
    sessions: Arc<dyn SessionStore>,
    directory: Arc<dyn KeyBundleDirectory>,
    cipher: Arc<dyn AeadCipher>,
    config: EngineConfig,
    locks: DashMap<PeerAddress, Arc<Mutex<()>>>,
}

impl EncryptionEngine {
    pub fn new(
        address: PeerAddress,
        prekeys: Arc<PreKeyManager>,
        sessions: Arc<dyn SessionStore>,
        directory: Arc<dyn KeyBundleDirectory>,
        config: EngineConfig,
    ) -> Self {
        let cipher = config.aead.build();
        Self {
            address,
            prekeys,
            sessions,
            directory,
            cipher,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn local_address(&self) -> &PeerAddress {
        &self.address
    }

    pub fn identity_key(&self) -> IdentityKey {
        self.prekeys.identity_key()
    }

    fn lock_for(&self, peer: &PeerAddress) -> Arc<Mutex<()>> {
        self.locks
            .entry(peer.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Publishes the device's current key material to the directory.
    pub async fn publish_keys(&self) -> Result<()> {
        let publication = self.prekeys.publication().await?;
        self.directory
            .publish_bundle(&self.address, publication)
            .await
    }

    /// Periodic maintenance: rotates the signed prekey when due, replenishes
    /// one-time prekeys below the configured floor, republishes on change.
    pub async fn maintain_keys(&self) -> Result<()> {
        let rotated = self
            .prekeys
            .rotate_signed_prekey_if_due(
                self.config.signed_prekey_rotation,
                self.config.signed_prekey_grace,
            )
            .await?;

        let remaining = self.directory.one_time_key_count(&self.address).await?;
        let replenished = if remaining < self.config.one_time_prekey_floor {
            self.prekeys
                .generate_one_time_prekeys(self.config.one_time_prekey_batch)
                .await?;
            true
        } else {
            false
        };

        if rotated || replenished {
            self.publish_keys().await?;
        }
        Ok(())
    }

    /// Fetches the peer's bundle and runs the initiator handshake. Fails
    /// closed: any fetch or verification failure leaves no session behind.
    pub async fn establish_session(&self, peer: &PeerAddress) -> Result<()> {
        let lock = self.lock_for(peer);
        let _guard = lock.lock().await;

        let state = self.establish_state(peer).await?;
        self.save_state(peer, &state).await
    }

    async fn establish_state(&self, peer: &PeerAddress) -> Result<RatchetState> {
        let bundle = self.directory.fetch_bundle(peer).await?;
        let (state, hello) = handshake::initiate_handshake(
            self.prekeys.identity_key_pair(),
            &bundle,
            &mut rand::rng(),
            self.config.warn_on_missing_one_time_prekey,
        )?;
        log::info!(
            "initiated session with {peer} using signed prekey {} (one-time prekey: {})",
            hello.signed_prekey_id,
            hello
                .one_time_key_id
                .map_or_else(|| "<none>".to_string(), |id| id.to_string()),
        );
        Ok(state)
    }

    /// Encrypts one message for `peer`, establishing a session on first send.
    pub async fn encrypt(&self, peer: &PeerAddress, plaintext: &[u8]) -> Result<EncryptedEnvelope> {
        let lock = self.lock_for(peer);
        let _guard = lock.lock().await;

        let mut state = match self.load_state(peer).await? {
            Some(state) => state,
            None => self.establish_state(peer).await?,
        };

        let envelope =
            ratchet::ratchet_encrypt(&mut state, plaintext, self.cipher.as_ref(), &mut rand::rng())?;
        self.save_state(peer, &state).await?;
        log::debug!(
            "encrypted message {} for {peer}",
            envelope.header.counter
        );
        Ok(envelope)
    }

    /// Decrypts one envelope from `peer`, bootstrapping the responder side of
    /// the handshake when the envelope carries hello material.
    ///
    /// A consumed one-time prekey is destroyed only after the message
    /// decrypts, and the session is persisted in the same breath. Failures
    /// leave both the prekey and any previous session state untouched.
    pub async fn decrypt(&self, peer: &PeerAddress, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
        let lock = self.lock_for(peer);
        let _guard = lock.lock().await;

        let existing = self.load_state(peer).await?;
        let mut consumed_one_time = None;

        let mut state = if let Some(hello) = &envelope.handshake {
            match existing {
                // Redelivered handshake for a session we already set up:
                // treat it as a normal (likely duplicate) message.
                Some(state) if state.remote_base_key() == Some(&hello.ephemeral_key) => state,
                _ => {
                    let signed_prekey = self
                        .prekeys
                        .signed_prekey_pair(hello.signed_prekey_id)
                        .await?;
                    let one_time = match hello.one_time_key_id {
                        Some(id) => Some(self.prekeys.one_time_prekey_pair(id).await?),
                        None => None,
                    };
                    let state = handshake::respond_to_handshake(
                        self.prekeys.identity_key_pair(),
                        &signed_prekey,
                        one_time.as_ref(),
                        hello,
                        self.config.warn_on_missing_one_time_prekey,
                    )?;
                    consumed_one_time = hello.one_time_key_id;
                    log::info!("responding to new session from {peer}");
                    state
                }
            }
        } else {
            existing.ok_or_else(|| ProtocolError::SessionNotFound(peer.clone()))?
        };

        let plaintext = match ratchet::ratchet_decrypt(
            &mut state,
            envelope,
            self.cipher.as_ref(),
            &mut rand::rng(),
            self.config.max_skipped_message_keys,
            self.config.max_forward_jumps,
        ) {
            Ok(plaintext) => plaintext,
            Err(error @ ProtocolError::RatchetStepFailed(_)) => {
                // Terminal for the session: drop it so the peer re-handshakes.
                log::warn!("ratchet step failed for {peer}, discarding session");
                self.sessions.delete_session(peer).await?;
                return Err(error);
            }
            Err(error) => return Err(error),
        };

        if let Some(id) = consumed_one_time {
            self.prekeys.mark_consumed(id).await?;
        }
        self.save_state(peer, &state).await?;
        Ok(plaintext)
    }

    pub async fn has_session(&self, peer: &PeerAddress) -> Result<bool> {
        self.sessions.has_session(peer).await
    }

    /// Deletes the session with `peer`; the next exchange re-handshakes.
    pub async fn end_session(&self, peer: &PeerAddress) -> Result<()> {
        let lock = self.lock_for(peer);
        let _guard = lock.lock().await;
        self.sessions.delete_session(peer).await
    }

    /// Safety number between the local identity and a peer identity, for
    /// out-of-band verification.
    pub fn safety_number_with(
        &self,
        remote_identity: &IdentityKey,
        remote_user: &str,
    ) -> SafetyNumber {
        safety_number(
            &self.prekeys.identity_key(),
            self.address.user(),
            remote_identity,
            remote_user,
        )
    }

    async fn load_state(&self, peer: &PeerAddress) -> Result<Option<RatchetState>> {
        let Some(bytes) = self.sessions.load_session(peer).await? else {
            return Ok(None);
        };
        match SessionRecord::deserialize(&bytes) {
            Ok(record) => Ok(Some(record.into_state())),
            Err(_) => {
                // Never fabricate a session from unreadable bytes.
                log::warn!("session record for {peer} is unreadable, deleting");
                self.sessions.delete_session(peer).await?;
                Err(ProtocolError::SessionCorrupted(peer.clone()))
            }
        }
    }

    async fn save_state(&self, peer: &PeerAddress, state: &RatchetState) -> Result<()> {
        let record = SessionRecord::new(state.clone());
        self.sessions
            .store_session(peer, &record.serialize()?)
            .await
    }
}
