use std::fmt;

use rand::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as MontgomeryPublic, StaticSecret};
use zeroize::Zeroizing;

pub const KEY_LENGTH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CurveError {
    #[error("bad key length <{0}>")]
    BadKeyLength(usize),
    /// The peer supplied a public key whose agreement output is degenerate
    /// (identity / small-order point).
    #[error("degenerate shared secret")]
    DegenerateSharedSecret,
}

#[derive(Clone, Copy, Eq)]
pub struct PublicKey {
    key: [u8; KEY_LENGTH],
}

impl PublicKey {
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    pub fn deserialize(value: &[u8]) -> Result<Self, CurveError> {
        let key: [u8; KEY_LENGTH] = value
            .try_into()
            .map_err(|_| CurveError::BadKeyLength(value.len()))?;
        Ok(Self { key })
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    #[inline]
    pub fn serialize(&self) -> [u8; KEY_LENGTH] {
        self.key
    }
}

impl ConstantTimeEq for PublicKey {
    fn ct_eq(&self, other: &PublicKey) -> subtle::Choice {
        self.key.ct_eq(&other.key)
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &PublicKey) -> bool {
        bool::from(self.ct_eq(other))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PublicKey {{ {} }}", hex::encode(self.key))
    }
}

#[derive(Clone)]
pub struct PrivateKey {
    secret: StaticSecret,
}

impl PrivateKey {
    pub fn deserialize(value: &[u8]) -> Result<Self, CurveError> {
        let bytes: [u8; KEY_LENGTH] = value
            .try_into()
            .map_err(|_| CurveError::BadKeyLength(value.len()))?;
        Ok(Self {
            secret: StaticSecret::from(bytes),
        })
    }

    pub fn serialize(&self) -> [u8; KEY_LENGTH] {
        self.secret.to_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(MontgomeryPublic::from(&self.secret).to_bytes())
    }

    /// X25519 agreement. Rejects non-contributory results so a malformed
    /// remote ratchet key can never silently yield an all-zero secret.
    pub fn calculate_agreement(
        &self,
        their_key: &PublicKey,
    ) -> Result<Zeroizing<[u8; KEY_LENGTH]>, CurveError> {
        let shared = self
            .secret
            .diffie_hellman(&MontgomeryPublic::from(*their_key.as_bytes()));
        if !shared.was_contributory() {
            return Err(CurveError::DegenerateSharedSecret);
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}

#[derive(Clone)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl KeyPair {
    pub fn generate<R: CryptoRng + RngCore>(csprng: &mut R) -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LENGTH]);
        csprng.fill_bytes(&mut *bytes);
        let secret = StaticSecret::from(*bytes);
        let public_key = PublicKey::from_bytes(MontgomeryPublic::from(&secret).to_bytes());
        Self {
            public_key,
            private_key: PrivateKey { secret },
        }
    }

    pub fn new(public_key: PublicKey, private_key: PrivateKey) -> Self {
        Self {
            public_key,
            private_key,
        }
    }

    pub fn from_private_bytes(bytes: &[u8]) -> Result<Self, CurveError> {
        let private_key = PrivateKey::deserialize(bytes)?;
        let public_key = private_key.public_key();
        Ok(Self {
            public_key,
            private_key,
        })
    }

    pub fn calculate_agreement(
        &self,
        their_key: &PublicKey,
    ) -> Result<Zeroizing<[u8; KEY_LENGTH]>, CurveError> {
        self.private_key.calculate_agreement(their_key)
    }
}
