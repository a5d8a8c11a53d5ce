use crate::{Error, X25519PublicKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ratchet bookkeeping sent alongside every ciphertext.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    /// Sender's current DH ratchet public key.
    pub ratchet_key: X25519PublicKey,
    /// Length of the sender's previous sending chain.
    pub previous_chain_length: u32,
}

impl MessageHeader {
    pub(crate) const SIZE: usize = 32 + 4;

    pub(crate) fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..32].copy_from_slice(self.ratchet_key.as_bytes());
        bytes[32..].copy_from_slice(&self.previous_chain_length.to_be_bytes());
        bytes
    }
}

/// Encrypted message envelope produced by [`RatchetSession::encrypt`].
///
/// Binary fields are unpadded base64url so the envelope can travel as JSON
/// unchanged.
///
/// [`RatchetSession::encrypt`]: crate::RatchetSession::encrypt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMessage {
    /// Ratchet header.
    pub header: MessageHeader,
    /// AEAD ciphertext without the tag.
    pub ciphertext: String,
    /// Detached authentication tag. When absent the tag is expected at the
    /// end of `ciphertext`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Per-message nonce.
    pub nonce: String,
    /// Index of the message in the sender's current chain.
    pub sequence: u32,
    /// Creation time, ISO-8601.
    pub timestamp: DateTime<Utc>,
}

impl EncryptedMessage {
    /// Serializes the envelope to JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses an envelope from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::X25519Secret;

    #[test]
    fn test_envelope_json_shape() {
        let message = EncryptedMessage {
            header: MessageHeader {
                ratchet_key: X25519Secret::generate().unwrap().public_key(),
                previous_chain_length: 3,
            },
            ciphertext: "AAEC".to_string(),
            tag: None,
            nonce: "AAAAAAAAAAAAAAAA".to_string(),
            sequence: 7,
            timestamp: Utc::now(),
        };

        let json = message.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["sequence"], 7);
        assert_eq!(value["header"]["previousChainLength"], 3);
        assert!(value.get("tag").is_none());
        assert!(value["timestamp"].as_str().unwrap().contains('T'));

        assert_eq!(EncryptedMessage::from_json(&json).unwrap(), message);
    }

    #[test]
    fn test_header_bytes() {
        let key = X25519Secret::generate().unwrap().public_key();
        let header = MessageHeader {
            ratchet_key: key,
            previous_chain_length: 0x01020304,
        };

        let bytes = header.to_bytes();
        assert_eq!(&bytes[..32], key.as_bytes());
        assert_eq!(&bytes[32..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            EncryptedMessage::from_json("{\"ciphertext\":1}"),
            Err(Error::Serde(_))
        ));
    }
}
