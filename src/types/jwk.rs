use crate::types::base64url;
use crate::{Error, X25519PublicKey};
use serde::{Deserialize, Serialize};

/// JWK `kty` values accepted at the key-distribution boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    /// Octet key pair (RFC 8037).
    #[serde(rename = "OKP")]
    Okp,
    /// Elliptic curve (RFC 7518).
    #[serde(rename = "EC")]
    Ec,
}

/// JWK `crv` values accepted at the key-distribution boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Curve {
    /// Curve25519 Diffie-Hellman.
    X25519,
    /// Edwards25519 signatures.
    Ed25519,
    /// NIST P-256.
    #[serde(rename = "P-256")]
    P256,
}

/// JWK `use` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    /// Encryption / key agreement.
    Enc,
    /// Signatures.
    Sig,
}

/// Public key in JSON Web Key form. Never carries private material.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyJwk {
    /// Key type.
    pub kty: KeyType,
    /// Curve.
    pub crv: Curve,
    /// base64url public key.
    pub x: String,
    /// Intended use.
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<KeyUse>,
    /// Key identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl PublicKeyJwk {
    pub(crate) fn x25519(key: &X25519PublicKey, kid: Option<String>) -> Self {
        Self {
            kty: KeyType::Okp,
            crv: Curve::X25519,
            x: base64url::encode(key.as_bytes()),
            key_use: Some(KeyUse::Enc),
            kid,
        }
    }

    pub(crate) fn x25519_public_key(&self) -> Result<X25519PublicKey, Error> {
        if self.kty != KeyType::Okp || self.crv != Curve::X25519 {
            return Err(Error::InvalidKey(format!(
                "Expected OKP/X25519 key, got {:?}/{:?}",
                self.kty, self.crv
            )));
        }
        if self.key_use == Some(KeyUse::Sig) {
            return Err(Error::InvalidKey(
                "Signature key cannot be used for key agreement".to_string(),
            ));
        }

        let bytes = base64url::decode(&self.x)
            .map_err(|err| Error::InvalidKey(format!("Malformed JWK x: {err}")))?;
        X25519PublicKey::from_slice(&bytes)
    }

    /// Serializes to a JSON string.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }
}
