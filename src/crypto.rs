use crate::kdf::{self, HashAlgorithm};
use crate::{Error, X25519PublicKey, X25519Secret};
use aes_gcm_siv::aead::{Aead, AeadInPlace, Payload};
use aes_gcm_siv::{Aes256GcmSiv, KeyInit, Nonce, Tag};
use rand::TryRngCore;
use rand::rngs::OsRng;
use zeroize::Zeroize;

pub(crate) const NONCE_SIZE: usize = 12; // AES-GCM-SIV uses 12-byte (96-bit) nonces
pub(crate) const TAG_SIZE: usize = 16;

pub(crate) fn generate_random_seed() -> Result<[u8; 32], Error> {
    random_bytes()
}

pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N], Error> {
    let mut bytes = [0u8; N];
    OsRng.try_fill_bytes(&mut bytes).map_err(|_| Error::Random)?;
    Ok(bytes)
}

fn cipher(key: &[u8; 32]) -> Aes256GcmSiv {
    Aes256GcmSiv::new(aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(key))
}

/// Encrypts `plaintext` and returns the ciphertext with its tag split off.
pub(crate) fn seal_detached(
    key: &[u8; 32],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_SIZE]), Error> {
    let mut buffer = plaintext.to_vec();
    let tag = cipher(key)
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut buffer)
        .map_err(|_| Error::Protocol("Message encryption failed".to_string()))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(&tag);
    Ok((buffer, tag_bytes))
}

/// Inverse of [`seal_detached`]. Any malformed input is reported as
/// [`Error::DecryptionFailed`].
pub(crate) fn open_detached(
    key: &[u8; 32],
    nonce: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, Error> {
    if nonce.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
        return Err(Error::DecryptionFailed);
    }

    let mut buffer = ciphertext.to_vec();
    cipher(key).decrypt_in_place_detached(
        Nonce::from_slice(nonce),
        aad,
        &mut buffer,
        Tag::from_slice(tag),
    )?;
    Ok(buffer)
}

/// Key and nonce for a one-shot seal, derived from a DH output.
fn seal_key_material(dh_output: &[u8; 32], info: &[u8]) -> Result<([u8; 32], [u8; NONCE_SIZE]), Error> {
    let mut derived = kdf::hkdf(None, dh_output, info, 32 + NONCE_SIZE, HashAlgorithm::Sha256)?;

    let mut key = [0u8; 32];
    key.copy_from_slice(&derived[..32]);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&derived[32..]);
    derived.zeroize();

    Ok((key, nonce))
}

/// Encrypts `plaintext` to `recipient` with a fresh ephemeral key.
///
/// Returns the ephemeral public key and the ciphertext (tag appended). Every
/// seal uses a new ephemeral key, so the derived nonce is never reused.
pub(crate) fn seal_to(
    recipient: &X25519PublicKey,
    plaintext: &[u8],
    aad: &[u8],
    info: &[u8],
) -> Result<(X25519PublicKey, Vec<u8>), Error> {
    let ephemeral = X25519Secret::generate()?;
    let mut dh_output = ephemeral.dh(recipient)?;
    let (mut key, nonce) = seal_key_material(&dh_output, info)?;
    dh_output.zeroize();

    let ciphertext = cipher(&key)
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| Error::Protocol("Seal failed".to_string()));
    key.zeroize();

    Ok((ephemeral.public_key(), ciphertext?))
}

/// Opens a ciphertext produced by [`seal_to`] with the recipient's secret.
pub(crate) fn open_from(
    recipient: &X25519Secret,
    ephemeral_public: &X25519PublicKey,
    ciphertext: &[u8],
    aad: &[u8],
    info: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut dh_output = recipient.dh(ephemeral_public)?;
    let (mut key, nonce) = seal_key_material(&dh_output, info)?;
    dh_output.zeroize();

    let plaintext = cipher(&key).decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad });
    key.zeroize();

    Ok(plaintext?)
}
