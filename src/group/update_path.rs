use crate::types::base64url;
use crate::{Error, X25519PublicKey};
use serde::{Deserialize, Serialize};

/// Membership change carried by a commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Operation {
    /// A member joined at `leaf_index`.
    #[serde(rename_all = "camelCase")]
    Add {
        /// Leaf the new member occupies.
        leaf_index: u32,
        /// Application identifier of the new member.
        member_id: String,
        /// The new member's leaf key.
        public_key: X25519PublicKey,
    },
    /// The member at `leaf_index` was removed.
    #[serde(rename_all = "camelCase")]
    Remove {
        /// Leaf that becomes blank.
        leaf_index: u32,
    },
    /// Key refresh with no membership change.
    Update,
}

/// A path secret sealed to one node of the receiving side's resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedPathSecret {
    /// Tree node whose key can open this secret.
    pub recipient_node: u32,
    /// Ephemeral key used for the seal.
    pub ephemeral_key: X25519PublicKey,
    /// AEAD ciphertext with the tag appended.
    #[serde(with = "base64url")]
    pub ciphertext: Vec<u8>,
}

/// Commit message broadcast after every membership or key-update operation.
///
/// `path_public_keys[i]` is the new public key of the `i`-th node on the
/// sender's direct path, and `encrypted_path_secrets[i]` holds that node's
/// path secret sealed to every node in the resolution of the matching
/// co-path node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePath {
    /// Leaf of the committer.
    pub sender_index: u32,
    /// The committer's fresh leaf key.
    pub leaf_public_key: X25519PublicKey,
    /// New public keys along the committer's direct path, leaf side first.
    pub path_public_keys: Vec<X25519PublicKey>,
    /// Sealed path secrets, one list per direct path node.
    pub encrypted_path_secrets: Vec<Vec<SealedPathSecret>>,
    /// Membership change applied before the path.
    pub operation: Operation,
    /// Epoch this commit moves the group into.
    pub epoch: u64,
}

/// Everything a newly added member needs to enter the current epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    /// Group identifier.
    pub group_id: String,
    /// Epoch the new member enters.
    pub epoch: u64,
    /// Member identifiers by leaf index, `None` for empty leaves.
    pub members: Vec<Option<String>>,
    /// Public key of every tree node, `None` for blank nodes.
    pub tree: Vec<Option<X25519PublicKey>>,
    /// Leaf of the member that sealed `path_secret`.
    pub sender_index: u32,
    /// Leaf the new member occupies.
    pub new_member_index: u32,
    /// Path secret of the lowest common ancestor of sender and new member,
    /// sealed to the new member's leaf key.
    pub path_secret: SealedPathSecret,
}

macro_rules! json_codec {
    ($ty:ty) => {
        impl $ty {
            /// Serializes to a JSON string.
            pub fn to_json(&self) -> Result<String, Error> {
                Ok(serde_json::to_string(self)?)
            }

            /// Parses from a JSON string.
            pub fn from_json(json: &str) -> Result<Self, Error> {
                Ok(serde_json::from_str(json)?)
            }
        }
    };
}

json_codec!(UpdatePath);
json_codec!(Welcome);
