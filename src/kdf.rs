//! HMAC-based key derivation (RFC 5869).
//!
//! Both engines funnel every secret through this module: root and chain keys
//! for the pairwise ratchet, path and epoch secrets for the group tree.

use crate::Error;
use hkdf::Hkdf;
use sha2::{Sha256, Sha512};
use zeroize::Zeroize;

/// RFC 5869 caps the expand counter at a single byte.
const MAX_BLOCKS: usize = 255;

/// Hash function backing HMAC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-256, 32 byte output.
    #[default]
    Sha256,
    /// SHA-512, 64 byte output.
    Sha512,
}

impl HashAlgorithm {
    /// Length of the hash output in bytes.
    pub fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Largest output `expand` can produce with this hash.
    pub fn max_output_len(self) -> usize {
        MAX_BLOCKS * self.output_len()
    }
}

/// HKDF-Extract: compresses `ikm` into a pseudorandom key.
///
/// A missing salt is replaced by a zero-filled buffer of the hash length.
pub fn extract(salt: Option<&[u8]>, ikm: &[u8], hash: HashAlgorithm) -> Vec<u8> {
    match hash {
        HashAlgorithm::Sha256 => Hkdf::<Sha256>::extract(salt, ikm).0.to_vec(),
        HashAlgorithm::Sha512 => Hkdf::<Sha512>::extract(salt, ikm).0.to_vec(),
    }
}

/// HKDF-Expand: stretches `prk` into `length` bytes bound to `info`.
///
/// Fails with [`Error::OutputTooLong`] if more than 255 blocks are needed.
pub fn expand(prk: &[u8], info: &[u8], length: usize, hash: HashAlgorithm) -> Result<Vec<u8>, Error> {
    let max = hash.max_output_len();
    if length > max {
        return Err(Error::OutputTooLong { length, max });
    }

    let mut okm = vec![0u8; length];
    let result = match hash {
        HashAlgorithm::Sha256 => Hkdf::<Sha256>::from_prk(prk)
            .map_err(|_| Error::InvalidKey("PRK shorter than hash output".to_string()))?
            .expand(info, &mut okm),
        HashAlgorithm::Sha512 => Hkdf::<Sha512>::from_prk(prk)
            .map_err(|_| Error::InvalidKey("PRK shorter than hash output".to_string()))?
            .expand(info, &mut okm),
    };
    result.map_err(|_| Error::OutputTooLong { length, max })?;

    Ok(okm)
}

/// Extract-then-expand.
pub fn hkdf(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    length: usize,
    hash: HashAlgorithm,
) -> Result<Vec<u8>, Error> {
    let mut prk = extract(salt, ikm, hash);
    let okm = expand(&prk, info, length, hash);
    prk.zeroize();
    okm
}

/// Splits one input secret into `count` independent keys.
///
/// Key `i` is `hkdf(salt, ikm, [i], key_len)` over SHA-256, so `count` is
/// limited to 256.
pub fn derive_keys(
    ikm: &[u8],
    salt: Option<&[u8]>,
    count: usize,
    key_len: usize,
) -> Result<Vec<Vec<u8>>, Error> {
    if count > usize::from(u8::MAX) + 1 {
        return Err(Error::Protocol(format!(
            "Cannot derive {count} keys from single-byte indices"
        )));
    }

    let mut prk = extract(salt, ikm, HashAlgorithm::Sha256);
    let keys = (0..count)
        .map(|i| expand(&prk, &[i as u8], key_len, HashAlgorithm::Sha256))
        .collect();
    prk.zeroize();
    keys
}

/// [`derive_keys`] for a fixed number of 32-byte keys.
pub(crate) fn derive_key_array<const N: usize>(
    ikm: &[u8],
    salt: Option<&[u8]>,
) -> Result<[[u8; 32]; N], Error> {
    let mut derived = derive_keys(ikm, salt, N, 32)?;
    let mut keys = [[0u8; 32]; N];
    for (key, bytes) in keys.iter_mut().zip(derived.iter_mut()) {
        key.copy_from_slice(bytes);
        bytes.zeroize();
    }
    Ok(keys)
}

/// Expands a 32-byte secret under a protocol label and context.
pub(crate) fn expand_label(
    secret: &[u8; 32],
    protocol_info: &[u8],
    label: &[u8],
    context: &[u8],
) -> Result<[u8; 32], Error> {
    let mut info = Vec::with_capacity(protocol_info.len() + label.len() + context.len() + 2);
    info.extend_from_slice(protocol_info);
    info.push(b' ');
    info.extend_from_slice(label);
    info.push(0);
    info.extend_from_slice(context);

    let mut okm = hkdf(None, secret, &info, 32, HashAlgorithm::Sha256)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&okm);
    okm.zeroize();
    Ok(out)
}
