use crate::Error;
use crate::crypto::generate_random_seed;
use crate::types::{PublicKeyJwk, base64url};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// An X25519 public key as it travels between peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct X25519PublicKey(PublicKey);

impl X25519PublicKey {
    /// Raw 32-byte encoding.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Raw 32-byte encoding, copied.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Parses a raw key, rejecting anything that is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::InvalidKey(format!("X25519 key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from(bytes))
    }

    /// JWK form of this key for publication.
    pub fn to_jwk(&self, kid: Option<String>) -> PublicKeyJwk {
        PublicKeyJwk::x25519(self, kid)
    }

    /// Reads an `OKP`/`X25519` JWK. Any other key type or curve is rejected.
    pub fn from_jwk(jwk: &PublicKeyJwk) -> Result<Self, Error> {
        jwk.x25519_public_key()
    }
}

impl From<[u8; 32]> for X25519PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(PublicKey::from(bytes))
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(value: PublicKey) -> Self {
        Self(value)
    }
}

impl AsRef<PublicKey> for X25519PublicKey {
    fn as_ref(&self) -> &PublicKey {
        &self.0
    }
}

impl Serialize for X25519PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64url::encode(self.as_bytes()))
    }
}

impl<'de> Deserialize<'de> for X25519PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = base64url::decode(&encoded).map_err(serde::de::Error::custom)?;
        Self::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// An X25519 private key. Zeroized on drop.
#[derive(Clone)]
pub struct X25519Secret(StaticSecret);

impl X25519Secret {
    /// Generates a key from the operating system RNG.
    pub fn generate() -> Result<Self, Error> {
        let mut seed = generate_random_seed()?;
        let secret = Self::from(seed);
        seed.zeroize();
        Ok(secret)
    }

    /// Diffie-Hellman with `public_key`.
    ///
    /// Fails with [`Error::InvalidKey`] when the output is all zeros, which
    /// happens only for low-order public keys.
    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> Result<[u8; 32], Error> {
        let shared = self.0.diffie_hellman(public_key.as_ref());
        if !shared.was_contributory() {
            return Err(Error::InvalidKey(
                "Non-contributory X25519 public key".to_string(),
            ));
        }
        Ok(shared.to_bytes())
    }

    /// The matching public key.
    pub fn public_key(&self) -> X25519PublicKey {
        let pub_key = PublicKey::from(&self.0);
        pub_key.into()
    }
}

impl From<[u8; 32]> for X25519Secret {
    fn from(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }
}

impl Zeroize for X25519Secret {
    fn zeroize(&mut self) {
        self.0.zeroize()
    }
}

impl ZeroizeOnDrop for X25519Secret {}
