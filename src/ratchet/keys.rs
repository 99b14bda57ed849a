use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::core::curve::{PrivateKey, PublicKey};
use crate::crypto::{self, kdf};
use crate::error::Result;

pub(crate) const HANDSHAKE_LABEL: &[u8] = b"Caracal-Handshake";
const RATCHET_LABEL: &[u8] = b"Caracal-Ratchet";
const MESSAGE_KEY_LABEL: &[u8] = b"Caracal-MessageKey";

/// Key protecting exactly one message. Derived, used for a single AEAD
/// operation, then dropped (and zeroized).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MessageKey {
    key: [u8; 32],
    #[zeroize(skip)]
    counter: u32,
}

impl MessageKey {
    pub(crate) fn from_bytes(key: [u8; 32], counter: u32) -> Self {
        Self { key, counter }
    }

    #[inline]
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    #[inline]
    pub fn counter(&self) -> u32 {
        self.counter
    }
}

#[derive(Clone, Serialize, Deserialize, Zeroize)]
pub struct ChainKey {
    key: [u8; 32],
    #[zeroize(skip)]
    index: u32,
}

impl ChainKey {
    const MESSAGE_KEY_SEED: [u8; 1] = [0x01u8];
    const CHAIN_KEY_SEED: [u8; 1] = [0x02u8];

    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    #[inline]
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// One-way advance. The previous key is not derivable from the result.
    pub fn next_chain_key(&self) -> Self {
        Self {
            key: crypto::hmac_sha256(&self.key, &Self::CHAIN_KEY_SEED),
            index: self.index + 1,
        }
    }

    /// Derives the message key for the current index. Domain-separated from
    /// [`Self::next_chain_key`] by the seed constant.
    pub fn message_key(&self) -> Result<MessageKey> {
        let seed = Zeroizing::new(crypto::hmac_sha256(&self.key, &Self::MESSAGE_KEY_SEED));
        let okm = kdf::expand(seed.as_slice(), None, MESSAGE_KEY_LABEL, 32)?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&okm);
        Ok(MessageKey::from_bytes(key, self.index))
    }
}

#[derive(Clone, Serialize, Deserialize, Zeroize)]
pub struct RootKey {
    key: [u8; 32],
}

impl RootKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    #[inline]
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// One Diffie-Hellman ratchet step: agreement between the two current
    /// ratchet keys, extracted under the current root key, expanded into the
    /// next root key and a fresh chain key.
    pub fn create_chain(
        &self,
        their_ratchet_key: &PublicKey,
        our_ratchet_key: &PrivateKey,
    ) -> Result<(RootKey, ChainKey)> {
        let shared_secret = our_ratchet_key.calculate_agreement(their_ratchet_key)?;
        let okm = kdf::expand(shared_secret.as_slice(), Some(&self.key), RATCHET_LABEL, 64)?;

        let mut root = [0u8; 32];
        let mut chain = [0u8; 32];
        root.copy_from_slice(&okm[..32]);
        chain.copy_from_slice(&okm[32..]);
        Ok((RootKey::new(root), ChainKey::new(chain, 0)))
    }
}

/// Turns the concatenated handshake agreements into the initial root key and
/// first chain key.
pub fn derive_initial_keys(secret_input: &[u8]) -> Result<(RootKey, ChainKey)> {
    let okm = kdf::expand(secret_input, None, HANDSHAKE_LABEL, 64)?;
    let mut root = [0u8; 32];
    let mut chain = [0u8; 32];
    root.copy_from_slice(&okm[..32]);
    chain.copy_from_slice(&okm[32..]);
    Ok((RootKey::new(root), ChainKey::new(chain, 0)))
}
