use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{ProtocolError, Result};

/// HKDF-SHA256 extract-and-expand. The output is wrapped in [`Zeroizing`]
/// because every caller derives key material from it.
pub fn expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    length: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new(vec![0u8; length]);
    hk.expand(info, &mut okm)
        .map_err(|_| ProtocolError::InvalidArgument("invalid HKDF output length".to_string()))?;
    Ok(okm)
}
