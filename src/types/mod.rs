mod jwk;
pub use jwk::*;

mod x25519;
pub use x25519::*;

/// Unpadded base64url, the encoding of every binary field on the wire.
pub(crate) mod base64url {
    use crate::Error;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn encode(bytes: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub(crate) fn decode(encoded: &str) -> Result<Vec<u8>, Error> {
        Ok(URL_SAFE_NO_PAD.decode(encoded)?)
    }

    /// `#[serde(with = "base64url")]` adapter for byte vectors.
    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(bytes))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        decode(&encoded).map_err(serde::de::Error::custom)
    }
}
