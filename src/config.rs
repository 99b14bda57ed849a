use std::sync::Arc;

use chrono::Duration;

use crate::crypto::aead::{AeadCipher, Aes256GcmCipher, ChaCha20Poly1305Cipher};

/// AEAD backend selection. One concrete backend is constructed at engine
/// startup; there is no runtime renegotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AeadBackend {
    #[default]
    AesGcm,
    ChaCha20Poly1305,
}

impl AeadBackend {
    pub fn build(self) -> Arc<dyn AeadCipher> {
        match self {
            AeadBackend::AesGcm => Arc::new(Aes256GcmCipher),
            AeadBackend::ChaCha20Poly1305 => Arc::new(ChaCha20Poly1305Cipher),
        }
    }
}

/// Engine tunables. The defaults are the documented policy; embedders
/// override individual fields.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub aead: AeadBackend,
    /// Hard cap on cached skipped message keys per session. Overflow evicts
    /// the oldest entries.
    pub max_skipped_message_keys: usize,
    /// Maximum counter jump accepted within one receive; larger jumps are
    /// rejected instead of derived.
    pub max_forward_jumps: u32,
    /// Age at which the signed prekey is rotated.
    pub signed_prekey_rotation: Duration,
    /// How long a retired signed prekey stays usable for in-flight
    /// handshakes before it is destroyed.
    pub signed_prekey_grace: Duration,
    /// Replenish one-time prekeys when the published count drops below this.
    pub one_time_prekey_floor: usize,
    /// Batch size for one-time prekey replenishment.
    pub one_time_prekey_batch: usize,
    /// Log handshakes that run without a one-time prekey (reduced
    /// assurance).
    pub warn_on_missing_one_time_prekey: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            aead: AeadBackend::default(),
            max_skipped_message_keys: 1000,
            max_forward_jumps: 25_000,
            signed_prekey_rotation: Duration::days(7),
            signed_prekey_grace: Duration::days(2),
            one_time_prekey_floor: 10,
            one_time_prekey_batch: 100,
            warn_on_missing_one_time_prekey: true,
        }
    }
}
