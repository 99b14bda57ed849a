use rand::{CryptoRng, Rng};
use zeroize::Zeroizing;

use crate::bundle::PreKeyBundle;
use crate::core::curve::{KeyPair, PublicKey};
use crate::envelope::HandshakeHello;
use crate::error::{ProtocolError, Result};
use crate::identity::{IdentityKey, IdentityKeyPair};
use crate::ratchet::{RatchetState, derive_initial_keys};

/// Prefix mixed into the key-derivation input ahead of the agreements, so the
/// handshake output can never collide with a raw agreement transcript.
const DISCONTINUITY_BYTES: [u8; 32] = [0xFF; 32];

/// Initiator side of the asynchronous handshake.
///
/// Verifies the bundle signature, computes the three (or four) agreements,
/// and derives the initial ratchet state: a receiving chain keyed by the
/// responder's signed prekey plus a sending chain created from a fresh
/// ratchet keypair. Also returns the `HandshakeHello` the responder needs to
/// recompute the same secret.
pub fn initiate_handshake<R: Rng + CryptoRng>(
    identity: &IdentityKeyPair,
    bundle: &PreKeyBundle,
    csprng: &mut R,
    warn_on_missing_one_time_prekey: bool,
) -> Result<(RatchetState, HandshakeHello)> {
    let their_identity = bundle.verify()?;
    let their_signed_prekey = bundle.signed_prekey_public();

    let ephemeral = KeyPair::generate(csprng);

    // Up to four 32-byte agreements after the 32-byte discontinuity prefix.
    let mut secrets = Zeroizing::new([0u8; 160]);
    let mut secrets_len = 0usize;
    secrets[..32].copy_from_slice(&DISCONTINUITY_BYTES);
    secrets_len += 32;

    let agreement = identity.dh_private().calculate_agreement(&their_signed_prekey)?;
    secrets[secrets_len..secrets_len + 32].copy_from_slice(agreement.as_slice());
    secrets_len += 32;

    let agreement = ephemeral.calculate_agreement(their_identity.dh_key())?;
    secrets[secrets_len..secrets_len + 32].copy_from_slice(agreement.as_slice());
    secrets_len += 32;

    let agreement = ephemeral.calculate_agreement(&their_signed_prekey)?;
    secrets[secrets_len..secrets_len + 32].copy_from_slice(agreement.as_slice());
    secrets_len += 32;

    if let Some(one_time) = &bundle.one_time_prekey {
        let their_one_time = PublicKey::from_bytes(one_time.public_key);
        let agreement = ephemeral.calculate_agreement(&their_one_time)?;
        secrets[secrets_len..secrets_len + 32].copy_from_slice(agreement.as_slice());
        secrets_len += 32;
    } else if warn_on_missing_one_time_prekey {
        // Permitted, lower-assurance path: the signed prekey still
        // authenticates the bundle, forward secrecy begins with the first
        // ratchet step.
        log::warn!("handshake proceeding without a one-time prekey");
    }

    let (root_key, chain_key) = derive_initial_keys(&secrets[..secrets_len])?;

    let sending_ratchet = KeyPair::generate(csprng);
    let (root_key, sending_chain) =
        root_key.create_chain(&their_signed_prekey, &sending_ratchet.private_key)?;

    let hello = HandshakeHello {
        identity_dh: identity.identity_key().dh_key().serialize(),
        identity_signing: identity.identity_key().signing_key().to_bytes(),
        ephemeral_key: ephemeral.public_key.serialize(),
        signed_prekey_id: bundle.signed_prekey.id,
        one_time_key_id: bundle.one_time_prekey.as_ref().map(|k| k.id),
    };

    let mut state = RatchetState::new(root_key)
        .with_receiver_chain(&their_signed_prekey, chain_key)
        .with_sender_chain(&sending_ratchet, sending_chain);
    state.set_pending_handshake(hello.clone());

    Ok((state, hello))
}

/// Responder side: recomputes the initiator's agreements from our private
/// keys and the hello material.
///
/// The caller resolves the signed/one-time prekey pairs from its own store
/// first; the one-time prekey must be destroyed only after the first message
/// decrypts, so consumption stays atomic with handshake completion.
pub fn respond_to_handshake(
    identity: &IdentityKeyPair,
    signed_prekey: &KeyPair,
    one_time_prekey: Option<&KeyPair>,
    hello: &HandshakeHello,
    warn_on_missing_one_time_prekey: bool,
) -> Result<RatchetState> {
    if hello.one_time_key_id.is_some() != one_time_prekey.is_some() {
        return Err(ProtocolError::InvalidArgument(
            "one-time prekey presence does not match the hello".to_string(),
        ));
    }

    let their_identity = IdentityKey::from_halves(hello.identity_dh, hello.identity_signing)?;
    let their_base_key = PublicKey::from_bytes(hello.ephemeral_key);

    let mut secrets = Zeroizing::new([0u8; 160]);
    let mut secrets_len = 0usize;
    secrets[..32].copy_from_slice(&DISCONTINUITY_BYTES);
    secrets_len += 32;

    let agreement = signed_prekey
        .private_key
        .calculate_agreement(their_identity.dh_key())?;
    secrets[secrets_len..secrets_len + 32].copy_from_slice(agreement.as_slice());
    secrets_len += 32;

    let agreement = identity.dh_private().calculate_agreement(&their_base_key)?;
    secrets[secrets_len..secrets_len + 32].copy_from_slice(agreement.as_slice());
    secrets_len += 32;

    let agreement = signed_prekey.private_key.calculate_agreement(&their_base_key)?;
    secrets[secrets_len..secrets_len + 32].copy_from_slice(agreement.as_slice());
    secrets_len += 32;

    if let Some(one_time) = one_time_prekey {
        let agreement = one_time.private_key.calculate_agreement(&their_base_key)?;
        secrets[secrets_len..secrets_len + 32].copy_from_slice(agreement.as_slice());
        secrets_len += 32;
    } else if warn_on_missing_one_time_prekey {
        log::warn!("responding to a handshake without a one-time prekey");
    }

    let (root_key, chain_key) = derive_initial_keys(&secrets[..secrets_len])?;

    // The first sending chain rides on the signed prekey as ratchet key; the
    // receiving chain appears with the first inbound ratchet step.
    Ok(RatchetState::new(root_key)
        .with_sender_chain(signed_prekey, chain_key)
        .with_remote_base_key(their_base_key))
}
