use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::aead::NONCE_SIZE;
use crate::error::{ProtocolError, Result};

/// Per-message ratchet metadata, sent in the clear and authenticated as
/// associated data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct MessageHeader {
    /// The sender's current ratchet public key.
    pub ratchet_key: [u8; 32],
    /// Length of the sender's previous sending chain.
    pub previous_counter: u32,
    /// Message counter within the current sending chain.
    pub counter: u32,
}

impl MessageHeader {
    /// Fixed byte layout fed to the AEAD as associated data. Kept manual so
    /// the authenticated bytes never depend on the transport encoding.
    pub fn associated_data(&self) -> [u8; 40] {
        let mut out = [0u8; 40];
        out[..32].copy_from_slice(&self.ratchet_key);
        out[32..36].copy_from_slice(&self.previous_counter.to_be_bytes());
        out[36..].copy_from_slice(&self.counter.to_be_bytes());
        out
    }
}

/// Initiator material carried on every message of a new session until the
/// responder's first reply confirms it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct HandshakeHello {
    /// Initiator identity, Diffie-Hellman half.
    pub identity_dh: [u8; 32],
    /// Initiator identity, signing half.
    pub identity_signing: [u8; 32],
    /// The fresh ephemeral ("base") key generated for this handshake.
    pub ephemeral_key: [u8; 32],
    /// Which of the responder's signed prekeys the initiator used.
    pub signed_prekey_id: u32,
    /// The one-time prekey consumed from the bundle, when one was available.
    pub one_time_key_id: Option<u32>,
}

/// Transport-agnostic wire payload.
#[derive(Clone, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub header: MessageHeader,
    /// Fresh random nonce for this message; travels with the ciphertext.
    pub nonce: [u8; NONCE_SIZE],
    /// AEAD output, tag included.
    pub ciphertext: Vec<u8>,
    /// Present only while the session is unconfirmed.
    pub handshake: Option<HandshakeHello>,
}

impl EncryptedEnvelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (envelope, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(envelope)
    }
}
