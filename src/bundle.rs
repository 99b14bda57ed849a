use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::core::curve::PublicKey;
use crate::error::{ProtocolError, Result};
use crate::identity::IdentityKey;

/// Public half of a signed prekey as carried in bundles and publications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKeyPublic {
    pub id: u32,
    pub public_key: [u8; 32],
    /// Ed25519 signature by the identity signing key over `public_key`.
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKeyPublic {
    pub id: u32,
    pub public_key: [u8; 32],
}

/// What a device uploads to the directory: identity material, the current
/// signed prekey and the full batch of unconsumed one-time prekeys. The
/// directory hands out one one-time key per fetch.
#[derive(Clone, Serialize, Deserialize)]
pub struct PreKeyPublication {
    pub registration_id: u32,
    /// 64-byte serialized identity key.
    #[serde(with = "BigArray")]
    pub identity_key: [u8; 64],
    pub signed_prekey: SignedPreKeyPublic,
    pub one_time_prekeys: Vec<OneTimePreKeyPublic>,
}

/// What a peer fetches from the directory to start a handshake. Read-only to
/// peers; the optional one-time prekey has been atomically consumed from the
/// published batch.
#[derive(Clone, Serialize, Deserialize)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    #[serde(with = "BigArray")]
    pub identity_key: [u8; 64],
    pub signed_prekey: SignedPreKeyPublic,
    pub one_time_prekey: Option<OneTimePreKeyPublic>,
}

impl PreKeyBundle {
    pub fn identity(&self) -> Result<IdentityKey> {
        IdentityKey::deserialize(&self.identity_key)
    }

    pub fn signed_prekey_public(&self) -> PublicKey {
        PublicKey::from_bytes(self.signed_prekey.public_key)
    }

    /// Checks the signed-prekey signature against the bundle's identity key.
    /// An invalid signature is a hard failure: the handshake is rejected, not
    /// downgraded to an unauthenticated agreement.
    pub fn verify(&self) -> Result<IdentityKey> {
        let identity = self.identity()?;
        if !identity.verify_signature(&self.signed_prekey.public_key, &self.signed_prekey.signature)
        {
            return Err(ProtocolError::SignatureValidationFailed);
        }
        Ok(identity)
    }
}
