mod tree;
mod update_path;

pub use crate::group::update_path::{Operation, SealedPathSecret, UpdatePath, Welcome};
use crate::crypto::{generate_random_seed, open_from, seal_to};
use crate::group::tree::{Node, RatchetTree, common_ancestor, copath, direct_path, leaf_node, node_width};
use crate::kdf::{self, HashAlgorithm, expand_label};
use crate::{Error, GroupConfig, X25519PublicKey, X25519Secret};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use zeroize::Zeroize;

const PATH_LABEL: &[u8] = b"path";
const NODE_LABEL: &[u8] = b"node";
const EPOCH_LABEL: &[u8] = b"epoch";
const WELCOME_LABEL: &[u8] = b"welcome";
const EXPORTER_LABEL: &[u8] = b"exporter";

/// Per-node secret from which the node key pair and the parent's secret
/// are derived.
#[derive(Clone)]
struct PathSecret([u8; 32]);

impl PathSecret {
    fn random() -> Result<Self, Error> {
        Ok(Self(generate_random_seed()?))
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Protocol("Path secret must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }

    /// `parent = KDF(child)`.
    fn next(&self, config: &GroupConfig) -> Result<Self, Error> {
        Ok(Self(expand_label(&self.0, &config.protocol_info, PATH_LABEL, &[])?))
    }

    fn node_secret(&self, config: &GroupConfig) -> Result<X25519Secret, Error> {
        let mut bytes = expand_label(&self.0, &config.protocol_info, NODE_LABEL, &[])?;
        let secret = X25519Secret::from(bytes);
        bytes.zeroize();
        Ok(secret)
    }

    fn epoch_secret(&self, config: &GroupConfig, group_id: &str, epoch: u64) -> Result<[u8; 32], Error> {
        let mut context = group_id.as_bytes().to_vec();
        context.extend_from_slice(&epoch.to_be_bytes());
        expand_label(&self.0, &config.protocol_info, EPOCH_LABEL, &context)
    }
}

impl Drop for PathSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupStateExport<'a> {
    group_id: &'a str,
    epoch: u64,
    members: &'a [Option<String>],
    my_index: u32,
    tree_size: u32,
    leaf_public_keys: Vec<Option<X25519PublicKey>>,
}

/// One member's view of a ratchet-tree group.
///
/// Every epoch has a single epoch secret shared by all current members.
/// Membership changes and key updates are commits: the committer refreshes
/// the secrets on its path to the root and publishes an [`UpdatePath`] that
/// every other member feeds to [`MlsGroupState::process_update_path`].
///
/// Operations are all-or-nothing. A failed call leaves the state exactly
/// as it was.
#[derive(Clone)]
pub struct MlsGroupState {
    group_id: String,
    epoch: u64,
    epoch_secret: [u8; 32],
    tree: RatchetTree,
    members: Vec<Option<String>>,
    my_index: u32,
    // Keyed by tree node. Only nodes on this member's own direct path.
    path_secrets: BTreeMap<u32, PathSecret>,
    config: GroupConfig,
}

impl MlsGroupState {
    /// Creates a group whose only member is the founder, at epoch 0.
    pub fn init_group(
        group_id: impl Into<String>,
        founder_id: impl Into<String>,
        config: GroupConfig,
    ) -> Result<Self, Error> {
        let group_id = group_id.into();
        let leaf_secret = PathSecret::random()?;
        let epoch_secret = leaf_secret.epoch_secret(&config, &group_id, 0)?;

        let mut state = Self {
            group_id,
            epoch: 0,
            epoch_secret,
            tree: RatchetTree::default(),
            members: vec![Some(founder_id.into())],
            my_index: 0,
            path_secrets: BTreeMap::new(),
            config,
        };
        let secret = leaf_secret.node_secret(&state.config)?;
        state.tree = RatchetTree::with_leaf(Node::Occupied {
            public_key: secret.public_key(),
            secret: Some(secret),
        });
        state.path_secrets.insert(leaf_node(0), leaf_secret);

        debug!(group_id = %state.group_id, "group created");
        Ok(state)
    }

    /// Enters a group through a [`Welcome`] produced after this member was
    /// added. `leaf_secret` must match the public key the member was added with.
    pub fn join(
        welcome: &Welcome,
        member_id: &str,
        leaf_secret: X25519Secret,
        config: GroupConfig,
    ) -> Result<Self, Error> {
        let leaf_count = u32::try_from(welcome.members.len())
            .map_err(|_| Error::Protocol("Too many members".to_string()))?;
        if welcome.tree.len() != node_width(leaf_count) as usize {
            return Err(Error::Protocol(
                "Welcome tree does not match its member list".to_string(),
            ));
        }
        if welcome.members.get(welcome.new_member_index as usize)
            != Some(&Some(member_id.to_string()))
        {
            return Err(Error::Session(
                "Welcome is addressed to another member".to_string(),
            ));
        }

        if welcome.sender_index >= leaf_count {
            return Err(Error::Protocol("Invalid welcome sender".to_string()));
        }

        let leaf = leaf_node(welcome.new_member_index);
        let sender_leaf = leaf_node(welcome.sender_index);
        let mut tree = RatchetTree::from_public_keys(&welcome.tree);
        let public_key = leaf_secret.public_key();
        if tree.node(leaf).and_then(Node::public_key) != Some(&public_key) {
            return Err(Error::InvalidKey(
                "Leaf secret does not match the welcomed leaf".to_string(),
            ));
        }
        if sender_leaf == leaf || tree.is_blank(sender_leaf) {
            return Err(Error::Protocol("Invalid welcome sender".to_string()));
        }
        if welcome.path_secret.recipient_node != leaf {
            return Err(Error::Protocol(
                "Welcome path secret is sealed to another node".to_string(),
            ));
        }
        tree.set(
            leaf,
            Node::Occupied {
                public_key,
                secret: Some(leaf_secret),
            },
        );

        let mut state = Self {
            group_id: welcome.group_id.clone(),
            epoch: welcome.epoch,
            epoch_secret: [0u8; 32],
            tree,
            members: welcome.members.clone(),
            my_index: welcome.new_member_index,
            path_secrets: BTreeMap::new(),
            config,
        };

        let path_secret = state.open_sealed(&welcome.path_secret, welcome.epoch, WELCOME_LABEL)?;
        let ancestor = common_ancestor(sender_leaf, leaf, leaf_count);
        let mut nodes = vec![ancestor];
        nodes.extend(direct_path(ancestor, leaf_count));

        let root_secret = state.derive_path(path_secret, &nodes, |tree, node| {
            tree.node(node).and_then(Node::public_key).copied()
        })?;
        state.epoch_secret = root_secret.epoch_secret(&state.config, &state.group_id, state.epoch)?;

        debug!(group_id = %state.group_id, epoch = state.epoch, leaf = state.my_index, "joined group");
        Ok(state)
    }

    /// Group identifier.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Secret shared by every member in the current epoch.
    pub fn epoch_secret(&self) -> &[u8; 32] {
        &self.epoch_secret
    }

    /// This member's leaf index.
    pub fn my_index(&self) -> u32 {
        self.my_index
    }

    /// Member identifiers by leaf index, `None` for empty leaves.
    pub fn members(&self) -> &[Option<String>] {
        &self.members
    }

    /// Number of leaves, including empty ones.
    pub fn leaf_count(&self) -> u32 {
        self.tree.leaf_count()
    }

    /// Adds a member and commits the change.
    ///
    /// The new member is placed in the leftmost empty leaf, or the tree
    /// grows by one leaf on the right. Send the returned [`UpdatePath`] to
    /// the existing members and a [`Welcome`] from
    /// [`create_welcome`](Self::create_welcome) to the new one.
    pub fn add_member(
        &mut self,
        member_id: impl Into<String>,
        public_key: &X25519PublicKey,
    ) -> Result<UpdatePath, Error> {
        let member_id = member_id.into();
        if self.members.iter().flatten().any(|id| *id == member_id) {
            return Err(Error::Session(format!("{member_id} is already a member")));
        }

        let mut staged = self.clone();
        let leaf_index = staged.place_member(member_id.clone(), *public_key);
        let path = staged.commit(Operation::Add {
            leaf_index,
            member_id,
            public_key: *public_key,
        })?;
        *self = staged;

        debug!(group_id = %self.group_id, epoch = self.epoch, leaf = leaf_index, "member added");
        Ok(path)
    }

    /// Removes the member at `leaf_index` and commits the change.
    ///
    /// The committer's path is refreshed so the removed member cannot derive
    /// the new epoch secret.
    pub fn remove_member(&mut self, leaf_index: u32) -> Result<UpdatePath, Error> {
        if leaf_index == self.my_index {
            return Err(Error::Session("A member cannot remove itself".to_string()));
        }

        let mut staged = self.clone();
        staged.remove_leaf(leaf_index)?;
        let path = staged.commit(Operation::Remove { leaf_index })?;
        *self = staged;

        debug!(group_id = %self.group_id, epoch = self.epoch, leaf = leaf_index, "member removed");
        Ok(path)
    }

    /// Refreshes this member's path without changing membership.
    pub fn update_keys(&mut self) -> Result<UpdatePath, Error> {
        let mut staged = self.clone();
        let path = staged.commit(Operation::Update)?;
        *self = staged;

        debug!(group_id = %self.group_id, epoch = self.epoch, "keys updated");
        Ok(path)
    }

    /// Applies another member's commit and moves to its epoch.
    ///
    /// Fails with [`Error::GroupPathUnreachable`] when this member holds no
    /// key that opens the commit, which is the expected outcome for a member
    /// the commit removes.
    pub fn process_update_path(&mut self, path: &UpdatePath) -> Result<(), Error> {
        let expected = self
            .epoch
            .checked_add(1)
            .ok_or_else(|| Error::Session("Epoch exhausted".to_string()))?;
        if path.epoch != expected {
            return Err(Error::EpochMismatch {
                expected,
                received: path.epoch,
            });
        }
        if path.sender_index == self.my_index {
            return Err(Error::Session(
                "Cannot process an update path sent by this member".to_string(),
            ));
        }

        let mut staged = self.clone();
        staged.apply_operation(&path.operation)?;

        let leaf_count = staged.tree.leaf_count();
        if path.sender_index >= leaf_count || staged.tree.is_blank(leaf_node(path.sender_index)) {
            return Err(Error::Protocol(format!(
                "Sender {} is not a member",
                path.sender_index
            )));
        }

        let sender_leaf = leaf_node(path.sender_index);
        let sender_path = direct_path(sender_leaf, leaf_count);
        if path.path_public_keys.len() != sender_path.len()
            || path.encrypted_path_secrets.len() != sender_path.len()
        {
            return Err(Error::Protocol(
                "Update path length does not match the tree".to_string(),
            ));
        }

        staged.install_public_key(sender_leaf, path.leaf_public_key);
        for (&node, public_key) in sender_path.iter().zip(&path.path_public_keys) {
            staged.install_public_key(node, *public_key);
        }

        let ancestor = common_ancestor(sender_leaf, leaf_node(staged.my_index), leaf_count);
        let position = sender_path
            .iter()
            .position(|&node| node == ancestor)
            .ok_or(Error::GroupPathUnreachable)?;
        let sealed = path
            .encrypted_path_secrets
            .get(position)
            .ok_or(Error::GroupPathUnreachable)?;

        let path_secret = staged
            .open_path_secret(sealed, path.epoch)
            .inspect_err(|err| warn!(group_id = %self.group_id, %err, "cannot open update path"))?;
        let expected_keys: BTreeMap<u32, X25519PublicKey> = sender_path
            .iter()
            .copied()
            .zip(path.path_public_keys.iter().copied())
            .collect();
        let root_secret = staged.derive_path(path_secret, &sender_path[position..], |_, node| {
            expected_keys.get(&node).copied()
        })?;

        staged.epoch = path.epoch;
        staged.epoch_secret = root_secret.epoch_secret(&staged.config, &staged.group_id, staged.epoch)?;
        *self = staged;

        debug!(
            group_id = %self.group_id,
            epoch = self.epoch,
            sender = path.sender_index,
            "update path processed"
        );
        Ok(())
    }

    /// Builds the [`Welcome`] for the member at `leaf_index`.
    ///
    /// Call it right after the commit that added that member, from a member
    /// that holds the path secret the two of them share.
    pub fn create_welcome(&self, leaf_index: u32) -> Result<Welcome, Error> {
        if leaf_index == self.my_index {
            return Err(Error::Session("Cannot welcome oneself".to_string()));
        }

        let leaf_count = self.tree.leaf_count();
        if leaf_index >= leaf_count {
            return Err(Error::Session(format!("No member at leaf {leaf_index}")));
        }
        let leaf = leaf_node(leaf_index);
        let public_key = self
            .tree
            .node(leaf)
            .and_then(Node::public_key)
            .ok_or_else(|| Error::Session(format!("No member at leaf {leaf_index}")))?;

        let ancestor = common_ancestor(leaf_node(self.my_index), leaf, leaf_count);
        let below_ancestor = direct_path(leaf, leaf_count)
            .into_iter()
            .take_while(|&node| node != ancestor)
            .any(|node| !self.tree.is_blank(node));
        if below_ancestor {
            return Err(Error::Session(
                "Welcome must follow the commit that added the member".to_string(),
            ));
        }
        let path_secret = self
            .path_secrets
            .get(&ancestor)
            .ok_or(Error::GroupPathUnreachable)?;

        let aad = self.seal_aad(self.epoch, leaf);
        let (ephemeral_key, ciphertext) = seal_to(
            public_key,
            &path_secret.0,
            &aad,
            &self.seal_info(WELCOME_LABEL),
        )?;

        Ok(Welcome {
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            members: self.members.clone(),
            tree: self.tree.public_keys(),
            sender_index: self.my_index,
            new_member_index: leaf_index,
            path_secret: SealedPathSecret {
                recipient_node: leaf,
                ephemeral_key,
                ciphertext,
            },
        })
    }

    /// Public view of the group as pretty-printed JSON. Never includes
    /// private keys, path secrets or the epoch secret.
    pub fn export_group_state(&self) -> Result<String, Error> {
        let leaf_public_keys = (0..self.tree.leaf_count())
            .map(|i| self.tree.node(leaf_node(i)).and_then(Node::public_key).copied())
            .collect();

        let export = GroupStateExport {
            group_id: &self.group_id,
            epoch: self.epoch,
            members: &self.members,
            my_index: self.my_index,
            tree_size: self.tree.leaf_count(),
            leaf_public_keys,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Derives `length` bytes for `label` from the current epoch secret.
    pub fn export_secret(&self, label: &str, length: usize) -> Result<Vec<u8>, Error> {
        let mut info = self.seal_info(EXPORTER_LABEL);
        info.push(0);
        info.extend_from_slice(label.as_bytes());
        kdf::hkdf(None, &self.epoch_secret, &info, length, HashAlgorithm::Sha256)
    }

    fn place_member(&mut self, member_id: String, public_key: X25519PublicKey) -> u32 {
        let leaf_index = self.tree.add_leaf(public_key);
        match self.members.get_mut(leaf_index as usize) {
            Some(slot) => *slot = Some(member_id),
            None => self.members.push(Some(member_id)),
        }

        let blanked = self.tree.blank_direct_path(leaf_index);
        self.forget(&blanked);
        leaf_index
    }

    fn remove_leaf(&mut self, leaf_index: u32) -> Result<(), Error> {
        if leaf_index >= self.tree.leaf_count() || self.tree.is_blank(leaf_node(leaf_index)) {
            return Err(Error::Session(format!("No member at leaf {leaf_index}")));
        }
        let leaf = leaf_node(leaf_index);

        let blanked = self.tree.blank_direct_path(leaf_index);
        self.forget(&blanked);
        self.tree.blank(leaf);
        if let Some(slot) = self.members.get_mut(leaf_index as usize) {
            *slot = None;
        }

        self.tree.truncate();
        self.members.truncate(self.tree.leaf_count() as usize);
        let width = self.tree.len();
        self.path_secrets.retain(|&node, _| (node as usize) < width);
        Ok(())
    }

    fn apply_operation(&mut self, operation: &Operation) -> Result<(), Error> {
        match operation {
            Operation::Add {
                leaf_index,
                member_id,
                public_key,
            } => {
                let placed = self.place_member(member_id.clone(), *public_key);
                if placed != *leaf_index {
                    return Err(Error::Protocol(format!(
                        "Member added at leaf {leaf_index}, expected leaf {placed}"
                    )));
                }
            }
            Operation::Remove { leaf_index } if *leaf_index == self.my_index => {
                return Err(Error::GroupPathUnreachable);
            }
            Operation::Remove { leaf_index } => self
                .remove_leaf(*leaf_index)
                .map_err(|_| Error::Protocol(format!("Removed leaf {leaf_index} is not a member")))?,
            Operation::Update => {}
        }
        Ok(())
    }

    /// Refreshes the committer's leaf and direct path and seals every new
    /// path secret to the matching co-path resolution.
    fn commit(&mut self, operation: Operation) -> Result<UpdatePath, Error> {
        let epoch = self
            .epoch
            .checked_add(1)
            .ok_or_else(|| Error::Session("Epoch exhausted".to_string()))?;
        let leaf_count = self.tree.leaf_count();
        let leaf = leaf_node(self.my_index);
        let path = direct_path(leaf, leaf_count);
        let copath = copath(leaf, leaf_count);

        self.path_secrets.clear();
        let mut path_secret = PathSecret::random()?;
        let leaf_public_key = self.install_path_secret(leaf, &path_secret)?;

        let mut path_public_keys = Vec::with_capacity(path.len());
        let mut encrypted_path_secrets = Vec::with_capacity(path.len());
        for (&node, &copath_node) in path.iter().zip(&copath) {
            path_secret = path_secret.next(&self.config)?;
            path_public_keys.push(self.install_path_secret(node, &path_secret)?);
            encrypted_path_secrets.push(self.seal_path_secret(&path_secret, copath_node, epoch)?);
        }

        self.epoch = epoch;
        self.epoch_secret = path_secret.epoch_secret(&self.config, &self.group_id, epoch)?;

        Ok(UpdatePath {
            sender_index: self.my_index,
            leaf_public_key,
            path_public_keys,
            encrypted_path_secrets,
            operation,
            epoch,
        })
    }

    /// Walks `nodes` upwards from `path_secret`, installing each derived key
    /// pair after checking it against `expected`. Returns the secret of the
    /// last node.
    fn derive_path<F>(&mut self, mut path_secret: PathSecret, nodes: &[u32], expected: F) -> Result<PathSecret, Error>
    where
        F: Fn(&RatchetTree, u32) -> Option<X25519PublicKey>,
    {
        for (offset, &node) in nodes.iter().enumerate() {
            if offset > 0 {
                path_secret = path_secret.next(&self.config)?;
            }

            let expected_key = expected(&self.tree, node)
                .ok_or_else(|| Error::Protocol(format!("Node {node} has no public key")))?;
            let public_key = self.install_path_secret(node, &path_secret)?;
            if public_key != expected_key {
                return Err(Error::Protocol(format!(
                    "Derived key for node {node} does not match the published key"
                )));
            }
        }
        Ok(path_secret)
    }

    fn install_path_secret(&mut self, node: u32, path_secret: &PathSecret) -> Result<X25519PublicKey, Error> {
        let secret = path_secret.node_secret(&self.config)?;
        let public_key = secret.public_key();
        self.tree.set(
            node,
            Node::Occupied {
                public_key,
                secret: Some(secret),
            },
        );
        self.path_secrets.insert(node, path_secret.clone());
        Ok(public_key)
    }

    fn install_public_key(&mut self, node: u32, public_key: X25519PublicKey) {
        self.tree.set(
            node,
            Node::Occupied {
                public_key,
                secret: None,
            },
        );
        self.path_secrets.remove(&node);
    }

    fn forget(&mut self, nodes: &[u32]) {
        for node in nodes {
            self.path_secrets.remove(node);
        }
    }

    fn seal_path_secret(
        &self,
        path_secret: &PathSecret,
        copath_node: u32,
        epoch: u64,
    ) -> Result<Vec<SealedPathSecret>, Error> {
        let info = self.seal_info(PATH_LABEL);
        self.tree
            .resolution(copath_node)
            .into_iter()
            .map(|recipient_node| {
                let public_key = self
                    .tree
                    .node(recipient_node)
                    .and_then(Node::public_key)
                    .ok_or_else(|| Error::Protocol(format!("Node {recipient_node} is blank")))?;
                let aad = self.seal_aad(epoch, recipient_node);
                let (ephemeral_key, ciphertext) = seal_to(public_key, &path_secret.0, &aad, &info)?;
                Ok(SealedPathSecret {
                    recipient_node,
                    ephemeral_key,
                    ciphertext,
                })
            })
            .collect()
    }

    /// Opens the entry addressed to a node this member holds a key for.
    fn open_path_secret(&self, sealed: &[SealedPathSecret], epoch: u64) -> Result<PathSecret, Error> {
        let entry = sealed
            .iter()
            .find(|entry| {
                self.tree
                    .node(entry.recipient_node)
                    .and_then(Node::secret)
                    .is_some()
            })
            .ok_or(Error::GroupPathUnreachable)?;
        self.open_sealed(entry, epoch, PATH_LABEL)
    }

    fn open_sealed(&self, sealed: &SealedPathSecret, epoch: u64, label: &[u8]) -> Result<PathSecret, Error> {
        let secret = self
            .tree
            .node(sealed.recipient_node)
            .and_then(Node::secret)
            .ok_or(Error::GroupPathUnreachable)?;

        let aad = self.seal_aad(epoch, sealed.recipient_node);
        let mut plaintext = open_from(
            secret,
            &sealed.ephemeral_key,
            &sealed.ciphertext,
            &aad,
            &self.seal_info(label),
        )?;
        let path_secret = PathSecret::from_slice(&plaintext);
        plaintext.zeroize();
        path_secret
    }

    fn seal_info(&self, label: &[u8]) -> Vec<u8> {
        let mut info = self.config.protocol_info.clone();
        info.push(b' ');
        info.extend_from_slice(label);
        info
    }

    fn seal_aad(&self, epoch: u64, recipient_node: u32) -> Vec<u8> {
        let mut aad = Vec::with_capacity(self.group_id.len() + 20);
        aad.extend_from_slice(&(self.group_id.len() as u64).to_be_bytes());
        aad.extend_from_slice(self.group_id.as_bytes());
        aad.extend_from_slice(&epoch.to_be_bytes());
        aad.extend_from_slice(&recipient_node.to_be_bytes());
        aad
    }
}

impl Drop for MlsGroupState {
    fn drop(&mut self) {
        self.epoch_secret.zeroize();
    }
}
