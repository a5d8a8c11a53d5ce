mod chain;
mod message;
mod skipped;
mod state;

pub use crate::ratchet::message::{EncryptedMessage, MessageHeader};
use crate::ratchet::skipped::{SkippedKeys, StagedKeys};
use crate::ratchet::state::{KnownKey, RatchetState, kdf_rk};
use crate::crypto::{NONCE_SIZE, TAG_SIZE, open_detached, random_bytes, seal_detached};
use crate::types::base64url;
use crate::{Error, PublicKeyJwk, RatchetConfig, X25519PublicKey, X25519Secret};
use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};
use zeroize::Zeroize;

/// Lifecycle phase of a ratchet session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// Responder that has not yet received the initiator's first message and
    /// therefore has no sending chain.
    AwaitingFirstSend,
    /// Both directions can be used.
    Active,
}

/// Double Ratchet session for one two-party conversation.
///
/// The Double Ratchet algorithm provides forward secrecy (compromise of current keys
/// does not compromise past messages) and break-in recovery (compromise of current
/// keys does not compromise future messages as long as a DH ratchet step happens).
///
/// It manages:
/// - A root key that evolves with each DH ratchet step
/// - Separate sending and receiving chain keys for message encryption
/// - Skipped message keys for out-of-order message delivery, bounded by
///   [`RatchetConfig`]
///
/// Every operation is all-or-nothing: it works on a staged copy of the chains
/// plus a list of pending skipped-key edits, and commits both only when the
/// operation succeeds.
#[derive(Clone)]
pub struct RatchetSession {
    state: RatchetState,
    skipped: SkippedKeys,
    config: RatchetConfig,
    session_id: String,
    created_at: DateTime<Utc>,
}

impl RatchetSession {
    /// Initializes a session for the initiator (Alice).
    ///
    /// `shared_secret` is the output of an out-of-band key agreement such as
    /// X3DH, `bob_public_key` the responder's ratchet public key.
    pub fn init_alice(
        bob_public_key: &X25519PublicKey,
        mut shared_secret: [u8; 32],
        config: RatchetConfig,
    ) -> Result<Self, Error> {
        let dh_self = X25519Secret::generate()?;

        // Perform initial DH and KDF
        let mut dh_output = dh_self.dh(bob_public_key)?;
        let derived = kdf_rk(&shared_secret, &dh_output);
        dh_output.zeroize();
        shared_secret.zeroize();
        let (root_key, chain_key) = derived?;

        let mut state = RatchetState::new(root_key, dh_self);
        state.dh_remote = Some(*bob_public_key);
        state.sending_chain = Some(chain::Chain::new(chain_key));

        Self::new(state, config)
    }

    /// Initializes a session for the responder (Bob).
    ///
    /// Bob has no sending chain until the initiator's first message triggers
    /// his first DH ratchet step.
    pub fn init_bob(
        bob_secret: X25519Secret,
        mut shared_secret: [u8; 32],
        config: RatchetConfig,
    ) -> Result<Self, Error> {
        let state = RatchetState::new(shared_secret, bob_secret);
        shared_secret.zeroize();

        Self::new(state, config)
    }

    fn new(state: RatchetState, config: RatchetConfig) -> Result<Self, Error> {
        let session_id = hex::encode(random_bytes::<16>()?);
        debug!(%session_id, "ratchet session created");

        Ok(Self {
            state,
            skipped: SkippedKeys::new(config.max_skipped_keys),
            config,
            session_id,
            created_at: Utc::now(),
        })
    }

    /// Random identifier of this session, used as the JWK `kid`.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// When the session was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        if self.state.sending_chain.is_some() {
            SessionPhase::Active
        } else {
            SessionPhase::AwaitingFirstSend
        }
    }

    /// Get the current dh ratchet public key
    pub fn public_key(&self) -> X25519PublicKey {
        self.state.dh_self.public_key()
    }

    /// Exposes the current ratchet public key as a JWK. Never the private key.
    pub fn export_public_key(&self) -> PublicKeyJwk {
        self.public_key().to_jwk(Some(self.session_id.clone()))
    }

    /// Number of messages sent on the current sending chain.
    pub fn sending_index(&self) -> u32 {
        self.state.sending_chain.as_ref().map_or(0, chain::Chain::index)
    }

    /// Number of messages received on the current receiving chain.
    pub fn receiving_index(&self) -> u32 {
        self.state.receiving_chain.as_ref().map_or(0, chain::Chain::index)
    }

    /// Number of message keys held for out-of-order delivery.
    pub fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }

    /// Encrypts a message without caller associated data.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<EncryptedMessage, Error> {
        self.encrypt_with_ad(plaintext, &[])
    }

    /// Encrypts a message using the Double Ratchet algorithm.
    ///
    /// This performs the following steps:
    /// 1. Generates a message key from the sending chain
    /// 2. Encrypts the message under a fresh random nonce, authenticating the
    ///    header, the chain index and `associated_data`
    /// 3. Increments the sending chain index
    pub fn encrypt_with_ad(
        &mut self,
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<EncryptedMessage, Error> {
        let mut staged = self.state.clone();

        let header = MessageHeader {
            ratchet_key: staged.dh_self.public_key(),
            previous_chain_length: staged.previous_sending_chain_length,
        };
        let chain = staged.sending_chain.as_mut().ok_or_else(|| {
            Error::Session("No sending chain: awaiting the peer's first message".to_string())
        })?;

        let sequence = chain.index();
        let mut message_key = chain.next()?;
        let nonce = random_bytes::<NONCE_SIZE>()?;
        let aad = self.build_ad(&header, sequence, associated_data);
        let sealed = seal_detached(&message_key, &nonce, plaintext, &aad);
        message_key.zeroize();
        let (ciphertext, tag) = sealed?;

        self.state = staged;
        trace!(session_id = %self.session_id, sequence, "message encrypted");

        Ok(EncryptedMessage {
            header,
            ciphertext: base64url::encode(&ciphertext),
            tag: Some(base64url::encode(&tag)),
            nonce: base64url::encode(&nonce),
            sequence,
            timestamp: Utc::now(),
        })
    }

    /// Decrypts a message without caller associated data.
    pub fn decrypt(&mut self, message: &EncryptedMessage) -> Result<Vec<u8>, Error> {
        self.decrypt_with_ad(message, &[])
    }

    /// Decrypts a message using the Double Ratchet algorithm.
    ///
    /// This performs the following steps:
    /// 1. Finds the receiving chain the header's ratchet key belongs to, or
    ///    performs a DH ratchet step for a new key
    /// 2. Takes a cached key for an earlier index, or caches the keys between
    ///    the chain position and the message index
    /// 3. Derives the message key and decrypts the message
    ///
    /// Fails without touching the session when the message is a replay, has
    /// expired, is too far ahead, or does not authenticate.
    pub fn decrypt_with_ad(
        &mut self,
        message: &EncryptedMessage,
        associated_data: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let mut staged = self.state.clone();
        let mut staged_keys = StagedKeys::default();
        let header = &message.header;
        let index = message.sequence;

        let generation = match staged.lookup(&header.ratchet_key) {
            Some(KnownKey::Current(generation)) => generation,
            Some(KnownKey::Retired { generation, next_index }) if index >= next_index => {
                return Err(self.expired(generation, index));
            }
            Some(KnownKey::Retired { generation, .. }) => generation,
            Some(KnownKey::Expired(generation)) => return Err(self.expired(generation, index)),
            None if staged.dh_remote == Some(header.ratchet_key) => {
                return Err(Error::Session(
                    "No receiving chain for the current ratchet key".to_string(),
                ));
            }
            None => {
                staged
                    .skip_message_keys(header.previous_chain_length, &self.config, &mut staged_keys)
                    .inspect_err(|err| warn!(session_id = %self.session_id, %err, "cannot close previous chain"))?;
                staged.dh_ratchet(header.ratchet_key, &self.config, &mut staged_keys)?;
                debug!(
                    session_id = %self.session_id,
                    generation = staged.receiving_generation,
                    "DH ratchet step on new remote key"
                );
                staged.receiving_generation
            }
        };

        let current_index = staged.receiving_chain.as_ref().map_or(0, chain::Chain::index);
        let mut message_key = if generation != staged.receiving_generation || index < current_index {
            let message_key = self
                .skipped
                .get((generation, index))
                .inspect_err(|err| warn!(session_id = %self.session_id, %err, "skipped key unavailable"))?;
            staged_keys.consume((generation, index));
            message_key
        } else {
            staged
                .skip_message_keys(index, &self.config, &mut staged_keys)
                .inspect_err(|err| warn!(session_id = %self.session_id, %err, "skip window exceeded"))?;
            match staged.receiving_chain.as_mut() {
                Some(chain) => chain.next()?,
                None => return Err(Error::Session("No receiving chain".to_string())),
            }
        };

        let plaintext = self.open(message, &mut message_key, associated_data);
        message_key.zeroize();
        let plaintext = plaintext?;

        self.state = staged;
        self.skipped.apply(staged_keys, Utc::now());
        trace!(session_id = %self.session_id, generation, index, "message decrypted");

        Ok(plaintext)
    }

    fn expired(&self, generation: u32, index: u32) -> Error {
        let err = Error::Expired { generation, index };
        warn!(session_id = %self.session_id, %err, "message key was discarded with its chain");
        err
    }

    fn open(
        &self,
        message: &EncryptedMessage,
        message_key: &mut [u8; 32],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let nonce = base64url::decode(&message.nonce).map_err(|_| Error::DecryptionFailed)?;
        let mut ciphertext =
            base64url::decode(&message.ciphertext).map_err(|_| Error::DecryptionFailed)?;
        let tag = match &message.tag {
            Some(tag) => base64url::decode(tag).map_err(|_| Error::DecryptionFailed)?,
            None => {
                let split = ciphertext
                    .len()
                    .checked_sub(TAG_SIZE)
                    .ok_or(Error::DecryptionFailed)?;
                ciphertext.split_off(split)
            }
        };

        let aad = self.build_ad(&message.header, message.sequence, associated_data);
        open_detached(message_key, &nonce, &ciphertext, &tag, &aad)
    }

    fn build_ad(&self, header: &MessageHeader, sequence: u32, associated_data: &[u8]) -> Vec<u8> {
        let mut aad = Vec::with_capacity(
            self.config.protocol_info.len() + MessageHeader::SIZE + 4 + associated_data.len(),
        );
        aad.extend_from_slice(&self.config.protocol_info);
        aad.extend_from_slice(&header.to_bytes());
        aad.extend_from_slice(&sequence.to_be_bytes());
        aad.extend_from_slice(associated_data);
        aad
    }

    /// Performs a DH ratchet step towards a ratchet key the peer published
    /// without sending a message.
    ///
    /// The receiving chain restarts at index 0 under a new root key and a new
    /// local key pair is generated. Keys of the replaced receiving chain that
    /// were never derived become unrecoverable: a late message on that chain
    /// fails with [`Error::Expired`].
    pub fn ratchet_step(&mut self, remote_public_key: &X25519PublicKey) -> Result<(), Error> {
        if self.state.dh_remote.as_ref() == Some(remote_public_key)
            || self.state.lookup(remote_public_key).is_some()
        {
            return Err(Error::Session(
                "Ratchet key is already known to this session".to_string(),
            ));
        }

        let mut staged = self.state.clone();
        let mut staged_keys = StagedKeys::default();
        staged.dh_ratchet(*remote_public_key, &self.config, &mut staged_keys)?;
        self.state = staged;
        self.skipped.apply(staged_keys, Utc::now());

        debug!(
            session_id = %self.session_id,
            generation = self.state.receiving_generation,
            "explicit DH ratchet step"
        );
        Ok(())
    }

    /// Drops skipped message keys older than the configured retention window.
    ///
    /// Nothing expires on its own; callers schedule this sweep. Returns the
    /// number of keys dropped.
    pub fn sweep_skipped_keys(&mut self, now: DateTime<Utc>) -> usize {
        let swept = self.skipped.sweep(now, self.config.skipped_key_ttl);
        if swept > 0 {
            debug!(session_id = %self.session_id, swept, "expired skipped message keys");
        }
        swept
    }
}
