use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::curve::{KeyPair, PrivateKey, PublicKey};
use crate::envelope::HandshakeHello;
use crate::error::{ProtocolError, Result};
use crate::ratchet::keys::{ChainKey, MessageKey, RootKey};

pub const SESSION_RECORD_VERSION: u32 = 1;

/// Eviction only triggers when the cache exceeds the configured bound by this
/// threshold, reducing O(n) drains from every insert to once per threshold.
const SKIPPED_KEY_PRUNE_THRESHOLD: usize = 50;

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SenderChain {
    ratchet_public: [u8; 32],
    ratchet_private: [u8; 32],
    chain: ChainKey,
}

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct ReceiverChain {
    remote_ratchet: [u8; 32],
    chain: ChainKey,
}

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SkippedMessageKey {
    ratchet_public: [u8; 32],
    counter: u32,
    message_key: [u8; 32],
}

/// Per-peer Double Ratchet session state.
///
/// All fields evolve on every send and receive; callers mutate a working copy
/// and persist it only after the operation succeeds, so a failed decrypt
/// never advances the durable chains. Zeroized on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RatchetState {
    root_key: RootKey,
    sender_chain: Option<SenderChain>,
    receiver_chain: Option<ReceiverChain>,
    previous_counter: u32,
    skipped: Vec<SkippedMessageKey>,
    remote_base_key: Option<[u8; 32]>,
    pending_handshake: Option<HandshakeHello>,
}

impl RatchetState {
    pub(crate) fn new(root_key: RootKey) -> Self {
        Self {
            root_key,
            sender_chain: None,
            receiver_chain: None,
            previous_counter: 0,
            skipped: Vec::new(),
            remote_base_key: None,
            pending_handshake: None,
        }
    }

    pub(crate) fn with_sender_chain(mut self, ratchet: &KeyPair, chain: ChainKey) -> Self {
        self.sender_chain = Some(SenderChain {
            ratchet_public: ratchet.public_key.serialize(),
            ratchet_private: ratchet.private_key.serialize(),
            chain,
        });
        self
    }

    pub(crate) fn with_receiver_chain(mut self, remote: &PublicKey, chain: ChainKey) -> Self {
        self.receiver_chain = Some(ReceiverChain {
            remote_ratchet: remote.serialize(),
            chain,
        });
        self
    }

    pub(crate) fn with_remote_base_key(mut self, base_key: PublicKey) -> Self {
        self.remote_base_key = Some(base_key.serialize());
        self
    }

    /// The initiator's ephemeral key observed during the handshake. Used to
    /// recognize redelivered handshake messages for an already-established
    /// session.
    pub fn remote_base_key(&self) -> Option<&[u8; 32]> {
        self.remote_base_key.as_ref()
    }

    pub(crate) fn set_pending_handshake(&mut self, hello: HandshakeHello) {
        self.pending_handshake = Some(hello);
    }

    pub fn pending_handshake(&self) -> Option<&HandshakeHello> {
        self.pending_handshake.as_ref()
    }

    /// Called on the first successful decrypt: the peer demonstrably has the
    /// session, so outbound messages stop carrying the handshake material.
    pub(crate) fn clear_pending_handshake(&mut self) {
        self.pending_handshake = None;
    }

    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub(crate) fn sender_ratchet_public(&self) -> Result<PublicKey> {
        let chain = self
            .sender_chain
            .as_ref()
            .ok_or(ProtocolError::InvalidSessionState("missing sender chain"))?;
        Ok(PublicKey::from_bytes(chain.ratchet_public))
    }

    fn sender_ratchet_private(&self) -> Result<PrivateKey> {
        let chain = self
            .sender_chain
            .as_ref()
            .ok_or(ProtocolError::InvalidSessionState("missing sender chain"))?;
        PrivateKey::deserialize(&chain.ratchet_private)
            .map_err(|_| ProtocolError::InvalidSessionState("invalid sender ratchet private key"))
    }

    /// Derives the key for the next outbound message and advances the sending
    /// chain, overwriting the previous chain key.
    pub(crate) fn next_sending_message_key(&mut self) -> Result<MessageKey> {
        let chain = self
            .sender_chain
            .as_mut()
            .ok_or(ProtocolError::InvalidSessionState("missing sender chain"))?;
        let message_key = chain.chain.message_key()?;
        chain.chain = chain.chain.next_chain_key();
        Ok(message_key)
    }

    pub(crate) fn remote_ratchet_key(&self) -> Option<PublicKey> {
        self.receiver_chain
            .as_ref()
            .map(|c| PublicKey::from_bytes(c.remote_ratchet))
    }

    /// Next expected counter on the receiving chain, if one exists.
    pub(crate) fn receiving_chain_index(&self) -> Option<u32> {
        self.receiver_chain.as_ref().map(|c| c.chain.index())
    }

    pub(crate) fn next_receiving_message_key(&mut self) -> Result<MessageKey> {
        let chain = self
            .receiver_chain
            .as_mut()
            .ok_or(ProtocolError::InvalidSessionState("missing receiver chain"))?;
        let message_key = chain.chain.message_key()?;
        chain.chain = chain.chain.next_chain_key();
        Ok(message_key)
    }

    /// Removes and returns a previously cached message key. Returns `None`
    /// when the (ratchet key, counter) pair was never cached or already used.
    pub(crate) fn take_skipped_message_key(
        &mut self,
        ratchet_public: &[u8; 32],
        counter: u32,
    ) -> Option<MessageKey> {
        let position = self.skipped.iter().position(|entry| {
            entry.counter == counter && bool::from(entry.ratchet_public.ct_eq(ratchet_public))
        })?;
        let entry = self.skipped.remove(position);
        Some(MessageKey::from_bytes(entry.message_key, entry.counter))
    }

    /// Derives and caches message keys for every counter of the current
    /// receiving chain below `until`, so delayed messages stay decryptable
    /// after later ones were processed.
    pub(crate) fn skip_receiver_keys(
        &mut self,
        until: u32,
        max_forward_jumps: u32,
        max_skipped: usize,
    ) -> Result<()> {
        let Self {
            receiver_chain: Some(receiver),
            skipped,
            ..
        } = self
        else {
            return Ok(());
        };

        if until <= receiver.chain.index() {
            return Ok(());
        }
        if until - receiver.chain.index() > max_forward_jumps {
            return Err(ProtocolError::TooManySkippedMessages(
                until,
                receiver.chain.index(),
            ));
        }

        while receiver.chain.index() < until {
            let message_key = receiver.chain.message_key()?;
            skipped.push(SkippedMessageKey {
                ratchet_public: receiver.remote_ratchet,
                counter: message_key.counter(),
                message_key: *message_key.key(),
            });
            receiver.chain = receiver.chain.next_chain_key();
        }

        Self::prune_skipped(skipped, max_skipped);
        Ok(())
    }

    /// Oldest-entry eviction keeps the cache bounded against adversarial or
    /// buggy peers; evicted keys are zeroized on drop.
    fn prune_skipped(skipped: &mut Vec<SkippedMessageKey>, max_skipped: usize) {
        let len = skipped.len();
        if len > max_skipped + SKIPPED_KEY_PRUNE_THRESHOLD {
            let excess = len - max_skipped;
            skipped.drain(..excess);
        }
    }

    /// One full Diffie-Hellman ratchet step, performed when the remote
    /// ratchet key changes: derive the new receiving chain from the current
    /// local ratchet key, then generate a fresh local keypair and derive the
    /// next sending chain from it.
    pub(crate) fn dh_ratchet<R: Rng + CryptoRng>(
        &mut self,
        their_new_ratchet: &PublicKey,
        csprng: &mut R,
    ) -> Result<()> {
        let our_private = self.sender_ratchet_private()?;

        let (root_key, receiving_chain) = self
            .root_key
            .create_chain(their_new_ratchet, &our_private)?;
        self.previous_counter = self
            .sender_chain
            .as_ref()
            .map(|c| c.chain.index())
            .unwrap_or(0);
        self.receiver_chain = Some(ReceiverChain {
            remote_ratchet: their_new_ratchet.serialize(),
            chain: receiving_chain,
        });

        let new_ratchet = KeyPair::generate(csprng);
        let (root_key, sending_chain) =
            root_key.create_chain(their_new_ratchet, &new_ratchet.private_key)?;
        self.sender_chain = Some(SenderChain {
            ratchet_public: new_ratchet.public_key.serialize(),
            ratchet_private: new_ratchet.private_key.serialize(),
            chain: sending_chain,
        });
        self.root_key = root_key;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Versioned persistence envelope for a [`RatchetState`]. The version tag is
/// checked on load so schema changes can never be misread as a valid session.
#[derive(Serialize, Deserialize)]
pub struct SessionRecord {
    version: u32,
    state: RatchetState,
}

impl SessionRecord {
    pub fn new(state: RatchetState) -> Self {
        Self {
            version: SESSION_RECORD_VERSION,
            state,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (record, _): (Self, _) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if record.version != SESSION_RECORD_VERSION {
            return Err(ProtocolError::InvalidSessionState(
                "unrecognized session record version",
            ));
        }
        Ok(record)
    }

    pub fn into_state(self) -> RatchetState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratchet::keys::derive_initial_keys;

    fn rng() -> impl CryptoRng + Rng {
        rand::rng()
    }

    fn state_with_receiver_chain() -> RatchetState {
        let mut csprng = rng();
        let remote = KeyPair::generate(&mut csprng);
        let (root, chain) = derive_initial_keys(b"state tests").expect("derive");
        RatchetState::new(root).with_receiver_chain(&remote.public_key, chain)
    }

    #[test]
    fn skipped_keys_are_single_use() {
        let mut state = state_with_receiver_chain();
        let remote = state.remote_ratchet_key().expect("remote").serialize();

        state.skip_receiver_keys(3, 25_000, 1000).expect("skip");
        assert_eq!(state.skipped_key_count(), 3);

        let key = state.take_skipped_message_key(&remote, 1).expect("cached");
        assert_eq!(key.counter(), 1);
        assert!(state.take_skipped_message_key(&remote, 1).is_none());
        assert_eq!(state.skipped_key_count(), 2);
    }

    #[test]
    fn skipped_lookup_is_keyed_by_ratchet_key() {
        let mut state = state_with_receiver_chain();
        state.skip_receiver_keys(2, 25_000, 1000).expect("skip");
        assert!(state.take_skipped_message_key(&[0xAB; 32], 0).is_none());
    }

    #[test]
    fn forward_jump_bound_is_enforced() {
        let mut state = state_with_receiver_chain();
        assert!(matches!(
            state.skip_receiver_keys(101, 100, 1000),
            Err(ProtocolError::TooManySkippedMessages(101, 0))
        ));
        assert_eq!(state.skipped_key_count(), 0);
    }

    #[test]
    fn cache_evicts_oldest_entries_beyond_bound() {
        let mut state = state_with_receiver_chain();
        let remote = state.remote_ratchet_key().expect("remote").serialize();

        // Push far enough past the bound to trigger the amortized prune.
        state.skip_receiver_keys(180, 25_000, 100).expect("skip");
        assert!(state.skipped_key_count() <= 100 + 50);

        // The oldest counters were evicted, recent ones survive.
        assert!(state.take_skipped_message_key(&remote, 0).is_none());
        assert!(state.take_skipped_message_key(&remote, 179).is_some());
    }

    #[test]
    fn session_record_round_trips() {
        let state = state_with_receiver_chain();
        let bytes = SessionRecord::new(state).serialize().expect("serialize");
        let restored = SessionRecord::deserialize(&bytes).expect("deserialize");
        assert!(restored.into_state().remote_ratchet_key().is_some());
    }

    #[test]
    fn session_record_rejects_unknown_version() {
        let state = state_with_receiver_chain();
        let mut record = SessionRecord::new(state);
        record.version = 99;
        let bytes = record.serialize().expect("serialize");
        assert!(matches!(
            SessionRecord::deserialize(&bytes),
            Err(ProtocolError::InvalidSessionState(_))
        ));
    }

    #[test]
    fn session_record_rejects_garbage() {
        assert!(SessionRecord::deserialize(&[0xFF; 16]).is_err());
    }
}
