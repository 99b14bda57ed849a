use aes_gcm::Aes256Gcm;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::ChaCha20Poly1305;
use rand::{CryptoRng, RngCore};

use crate::error::{ProtocolError, Result};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

/// Authenticated encryption used for message protection and for sealing
/// session records at rest. Implementations must provide a 256-bit key,
/// 96-bit nonce, 128-bit tag AEAD.
///
/// Backends are chosen once, at engine construction, via
/// [`crate::config::AeadBackend`].
pub trait AeadCipher: Send + Sync {
    fn seal(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>>;

    /// Opens `ciphertext` (which carries the trailing tag). A tag mismatch is
    /// [`ProtocolError::AuthenticationFailed`] and is terminal for the
    /// message: it signals tampering or a wrong key, not a transient fault.
    fn open(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>>;
}

pub fn random_nonce<R: CryptoRng + RngCore>(csprng: &mut R) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    csprng.fill_bytes(&mut nonce);
    nonce
}

pub struct Aes256GcmCipher;

impl AeadCipher for Aes256GcmCipher {
    fn seal(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| ProtocolError::InvalidArgument("bad AEAD key length".to_string()))?;
        cipher
            .encrypt(
                aes_gcm::Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|_| ProtocolError::EncryptionFailure)
    }

    fn open(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| ProtocolError::InvalidArgument("bad AEAD key length".to_string()))?;
        cipher
            .decrypt(
                aes_gcm::Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: associated_data,
                },
            )
            .map_err(|_| ProtocolError::AuthenticationFailed)
    }
}

pub struct ChaCha20Poly1305Cipher;

impl AeadCipher for ChaCha20Poly1305Cipher {
    fn seal(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| ProtocolError::InvalidArgument("bad AEAD key length".to_string()))?;
        cipher
            .encrypt(
                chacha20poly1305::Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|_| ProtocolError::EncryptionFailure)
    }

    fn open(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| ProtocolError::InvalidArgument("bad AEAD key length".to_string()))?;
        cipher
            .decrypt(
                chacha20poly1305::Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: associated_data,
                },
            )
            .map_err(|_| ProtocolError::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends() -> Vec<Box<dyn AeadCipher>> {
        vec![Box::new(Aes256GcmCipher), Box::new(ChaCha20Poly1305Cipher)]
    }

    #[test]
    fn seal_open_round_trip() {
        let key = [0x42u8; KEY_SIZE];
        let nonce = [0x11u8; NONCE_SIZE];
        for cipher in backends() {
            let sealed = cipher
                .seal(&key, &nonce, b"hello world", b"header")
                .expect("seal");
            assert_eq!(sealed.len(), b"hello world".len() + TAG_SIZE);
            let opened = cipher.open(&key, &nonce, &sealed, b"header").expect("open");
            assert_eq!(opened, b"hello world");
        }
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = [0x42u8; KEY_SIZE];
        let nonce = [0x11u8; NONCE_SIZE];
        for cipher in backends() {
            let mut sealed = cipher.seal(&key, &nonce, b"payload", b"aad").expect("seal");
            sealed[0] ^= 0x01;
            assert!(matches!(
                cipher.open(&key, &nonce, &sealed, b"aad"),
                Err(ProtocolError::AuthenticationFailed)
            ));
        }
    }

    #[test]
    fn wrong_associated_data_fails_authentication() {
        let key = [0x42u8; KEY_SIZE];
        let nonce = [0x11u8; NONCE_SIZE];
        for cipher in backends() {
            let sealed = cipher.seal(&key, &nonce, b"payload", b"aad").expect("seal");
            assert!(matches!(
                cipher.open(&key, &nonce, &sealed, b"other"),
                Err(ProtocolError::AuthenticationFailed)
            ));
        }
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let nonce = [0x11u8; NONCE_SIZE];
        for cipher in backends() {
            let sealed = cipher
                .seal(&[0x42u8; KEY_SIZE], &nonce, b"payload", b"")
                .expect("seal");
            assert!(
                cipher
                    .open(&[0x43u8; KEY_SIZE], &nonce, &sealed, b"")
                    .is_err()
            );
        }
    }

    #[test]
    fn backends_are_not_interchangeable() {
        let key = [0x42u8; KEY_SIZE];
        let nonce = [0x11u8; NONCE_SIZE];
        let sealed = Aes256GcmCipher.seal(&key, &nonce, b"payload", b"").expect("seal");
        assert!(ChaCha20Poly1305Cipher.open(&key, &nonce, &sealed, b"").is_err());
    }
}
