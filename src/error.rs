/// Errors that can occur during ratchet and group operations.
///
/// Every variant is local to the failed operation: the session or group the
/// operation was called on is left exactly as it was before the call.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// Malformed or wrong-curve key material.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// AEAD authentication failed. No plaintext is returned.
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Signature verification failed.
    #[error("Signature invalid")]
    SignatureInvalid,

    /// The message key for this chain position was already consumed.
    #[error("Message replayed (generation {generation}, index {index})")]
    MessageReplayed {
        /// Receiving chain generation.
        generation: u32,
        /// Message index within the chain.
        index: u32,
    },

    /// The skipped message key was evicted before the message arrived.
    #[error("Skipped message key expired (generation {generation}, index {index})")]
    Expired {
        /// Receiving chain generation.
        generation: u32,
        /// Message index within the chain.
        index: u32,
    },

    /// The message lies further ahead than the skip window allows.
    #[error("Too many skipped messages: {requested} requested, at most {max} allowed")]
    SkipLimitExceeded {
        /// Number of message keys that would have to be skipped.
        requested: u32,
        /// Configured skip window.
        max: u32,
    },

    /// No co-path intersection could be opened with the keys held locally.
    #[error("Group path unreachable")]
    GroupPathUnreachable,

    /// HKDF output length exceeds 255 hash blocks.
    #[error("HKDF output too long: {length} bytes requested, at most {max}")]
    OutputTooLong {
        /// Requested output length.
        length: usize,
        /// Maximum output length for the hash.
        max: usize,
    },

    /// An update path does not follow the current epoch.
    #[error("Epoch mismatch: expected {expected}, received {received}")]
    EpochMismatch {
        /// The epoch the group expected next.
        expected: u64,
        /// The epoch carried by the update path.
        received: u64,
    },

    /// The operation is not valid in the current session or group state.
    #[error("Session state error: {0}")]
    Session(String),

    /// A protocol rule was violated.
    #[error("Protocol Violation: {0}")]
    Protocol(String),

    /// Random number generation failed.
    #[error("Random number generation failed")]
    Random,

    /// Serialization or deserialization failed.
    #[error("Serialization/deserialization failed: {0}")]
    Serde(String),
}

impl From<aes_gcm_siv::Error> for Error {
    fn from(_: aes_gcm_siv::Error) -> Self {
        Self::DecryptionFailed
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(value: base64::DecodeError) -> Self {
        Self::Serde(value.to_string())
    }
}
