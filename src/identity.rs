use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{CryptoRng, Rng, RngCore};
use zeroize::Zeroizing;

use crate::core::curve::{KeyPair, PrivateKey, PublicKey};
use crate::error::{ProtocolError, Result};

pub const IDENTITY_KEY_LENGTH: usize = 64;

/// Public identity of a device: an X25519 key for the handshake agreements
/// and an Ed25519 key that signs published prekeys.
#[derive(Clone)]
pub struct IdentityKey {
    dh_key: PublicKey,
    signing_key: VerifyingKey,
}

impl IdentityKey {
    pub fn new(dh_key: PublicKey, signing_key: VerifyingKey) -> Self {
        Self {
            dh_key,
            signing_key,
        }
    }

    #[inline]
    pub fn dh_key(&self) -> &PublicKey {
        &self.dh_key
    }

    #[inline]
    pub fn signing_key(&self) -> &VerifyingKey {
        &self.signing_key
    }

    /// 64-byte serialization: DH half followed by the signing half.
    pub fn serialize(&self) -> [u8; IDENTITY_KEY_LENGTH] {
        let mut out = [0u8; IDENTITY_KEY_LENGTH];
        out[..32].copy_from_slice(self.dh_key.as_bytes());
        out[32..].copy_from_slice(self.signing_key.as_bytes());
        out
    }

    pub fn deserialize(value: &[u8]) -> Result<Self> {
        if value.len() != IDENTITY_KEY_LENGTH {
            return Err(ProtocolError::InvalidArgument(format!(
                "identity key must be {IDENTITY_KEY_LENGTH} bytes, got {}",
                value.len()
            )));
        }
        let dh_key = PublicKey::deserialize(&value[..32])?;
        let signing_bytes: [u8; 32] = value[32..]
            .try_into()
            .expect("length checked above");
        let signing_key = VerifyingKey::from_bytes(&signing_bytes)
            .map_err(|_| ProtocolError::InvalidArgument("invalid identity signing key".into()))?;
        Ok(Self {
            dh_key,
            signing_key,
        })
    }

    pub fn from_halves(dh: [u8; 32], signing: [u8; 32]) -> Result<Self> {
        let mut combined = [0u8; IDENTITY_KEY_LENGTH];
        combined[..32].copy_from_slice(&dh);
        combined[32..].copy_from_slice(&signing);
        Self::deserialize(&combined)
    }

    /// Verifies an Ed25519 signature made by this identity. Used by every
    /// bundle consumer before trusting a signed prekey.
    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature_bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        self.signing_key
            .verify(message, &Signature::from_bytes(&signature_bytes))
            .is_ok()
    }
}

/// Long-term private identity of the local device.
#[derive(Clone)]
pub struct IdentityKeyPair {
    dh: KeyPair,
    signing: SigningKey,
}

impl IdentityKeyPair {
    pub fn generate<R: Rng + CryptoRng>(csprng: &mut R) -> Self {
        let dh = KeyPair::generate(csprng);
        let mut seed = Zeroizing::new([0u8; 32]);
        csprng.fill_bytes(&mut *seed);
        let signing = SigningKey::from_bytes(&seed);
        Self { dh, signing }
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(self.dh.public_key, self.signing.verifying_key())
    }

    pub(crate) fn dh_private(&self) -> &PrivateKey {
        &self.dh.private_key
    }

    /// Signs `message` with the identity signing key (prekey publication).
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    /// 64-byte private serialization for the secret store: DH private bytes
    /// followed by the signing seed.
    pub(crate) fn serialize(&self) -> Zeroizing<[u8; IDENTITY_KEY_LENGTH]> {
        let mut out = Zeroizing::new([0u8; IDENTITY_KEY_LENGTH]);
        out[..32].copy_from_slice(&self.dh.private_key.serialize());
        out[32..].copy_from_slice(&self.signing.to_bytes());
        out
    }

    pub(crate) fn deserialize(value: &[u8]) -> Result<Self> {
        if value.len() != IDENTITY_KEY_LENGTH {
            return Err(ProtocolError::InvalidArgument(format!(
                "identity key pair must be {IDENTITY_KEY_LENGTH} bytes, got {}",
                value.len()
            )));
        }
        let dh = KeyPair::from_private_bytes(&value[..32])?;
        let seed: [u8; 32] = value[32..].try_into().expect("length checked above");
        Ok(Self {
            dh,
            signing: SigningKey::from_bytes(&seed),
        })
    }
}
