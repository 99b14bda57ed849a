pub mod keys;
mod state;

pub use keys::{ChainKey, MessageKey, RootKey, derive_initial_keys};
pub use state::{RatchetState, SESSION_RECORD_VERSION, SessionRecord};

use rand::{CryptoRng, Rng};

use crate::core::curve::PublicKey;
use crate::crypto::aead::{self, AeadCipher};
use crate::envelope::{EncryptedEnvelope, MessageHeader};
use crate::error::{ProtocolError, Result};

/// Derives the next outbound message key, advances the sending chain and
/// seals `plaintext` under a fresh random nonce with the header bytes as
/// associated data.
pub fn ratchet_encrypt<R: Rng + CryptoRng>(
    state: &mut RatchetState,
    plaintext: &[u8],
    cipher: &dyn AeadCipher,
    csprng: &mut R,
) -> Result<EncryptedEnvelope> {
    let ratchet_key = state.sender_ratchet_public()?.serialize();
    let message_key = state.next_sending_message_key()?;
    let header = MessageHeader {
        ratchet_key,
        previous_counter: state.previous_counter(),
        counter: message_key.counter(),
    };

    let nonce = aead::random_nonce(csprng);
    let ciphertext = cipher.seal(
        message_key.key(),
        &nonce,
        plaintext,
        &header.associated_data(),
    )?;

    Ok(EncryptedEnvelope {
        header,
        nonce,
        ciphertext,
        handshake: state.pending_handshake().cloned(),
    })
}

/// Decrypts one inbound envelope, stepping the Diffie-Hellman ratchet when
/// the header carries a new remote ratchet key and caching skipped message
/// keys for out-of-order delivery.
///
/// The caller owns persistence: `state` is mutated in place, so load a copy,
/// call this, and persist only on success. A failed decrypt must not reach
/// the session store.
pub fn ratchet_decrypt<R: Rng + CryptoRng>(
    state: &mut RatchetState,
    envelope: &EncryptedEnvelope,
    cipher: &dyn AeadCipher,
    csprng: &mut R,
    max_skipped: usize,
    max_forward_jumps: u32,
) -> Result<Vec<u8>> {
    let header = &envelope.header;
    let aad = header.associated_data();

    // A message we already derived a key for: delayed delivery of a skipped
    // counter, or a duplicate whose key is still cached. Use the cached key
    // exactly once; never re-derive.
    if let Some(message_key) =
        state.take_skipped_message_key(&header.ratchet_key, header.counter)
    {
        let plaintext = cipher.open(message_key.key(), &envelope.nonce, &envelope.ciphertext, &aad)?;
        state.clear_pending_handshake();
        return Ok(plaintext);
    }

    let header_ratchet = PublicKey::from_bytes(header.ratchet_key);
    let ratchet_key_changed = match state.remote_ratchet_key() {
        Some(current) => current != header_ratchet,
        None => true,
    };
    if ratchet_key_changed {
        // Cache the tail of the old receiving chain first, then step.
        state.skip_receiver_keys(header.previous_counter, max_forward_jumps, max_skipped)?;
        state
            .dh_ratchet(&header_ratchet, csprng)
            .map_err(|e| match e {
                ProtocolError::Curve(_) => {
                    ProtocolError::RatchetStepFailed("malformed remote ratchet key")
                }
                other => other,
            })?;
    }

    if let Some(expected) = state.receiving_chain_index()
        && header.counter < expected
    {
        // Behind the chain and not in the cache: the key was already used
        // (or evicted). Re-deriving it is impossible by construction.
        return Err(ProtocolError::DuplicateMessage(header.counter));
    }

    state.skip_receiver_keys(header.counter, max_forward_jumps, max_skipped)?;
    let message_key = state.next_receiving_message_key()?;
    let plaintext = cipher.open(message_key.key(), &envelope.nonce, &envelope.ciphertext, &aad)?;
    state.clear_pending_handshake();
    Ok(plaintext)
}
