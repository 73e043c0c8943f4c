//! In-memory arena over a community's authorization nodes.
//!
//! The store keeps nodes as rows with a parent reference. Mutations load
//! the whole tree of the affected community (trees are small: one node
//! per delegated position), validate against this arena and then hand a
//! precise write set back to the repository.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use crate::error::{NidoError, NidoResult};
use crate::models::auth_node::AuthNode;
use crate::models::permission::Permissions;

/// Deeper trees than this are treated as corrupt (cycle protection).
pub const MAX_TREE_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct AuthTree {
    community_id: Uuid,
    root_id: Uuid,
    nodes: HashMap<Uuid, AuthNode>,
    children: HashMap<Uuid, Vec<Uuid>>,
}

impl AuthTree {
    /// Build the arena, checking that the nodes form exactly one tree
    /// rooted at a parentless node.
    pub fn from_nodes(community_id: Uuid, nodes: Vec<AuthNode>) -> NidoResult<Self> {
        let mut roots = nodes.iter().filter(|n| n.is_root()).map(|n| n.id);
        let root_id = roots
            .next()
            .ok_or_else(|| NidoError::not_found("root auth_node", community_id))?;
        if roots.next().is_some() {
            return Err(NidoError::Internal(format!(
                "community {community_id} has more than one root authorization"
            )));
        }

        let mut by_id = HashMap::with_capacity(nodes.len());
        let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for node in nodes {
            if node.community_id != community_id {
                return Err(NidoError::Internal(format!(
                    "auth_node {} belongs to community {}",
                    node.id, node.community_id
                )));
            }
            if let Some(parent_id) = node.parent_id {
                children.entry(parent_id).or_default().push(node.id);
            }
            by_id.insert(node.id, node);
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| by_id[a].name.cmp(&by_id[b].name));
        }

        let tree = Self {
            community_id,
            root_id,
            nodes: by_id,
            children,
        };

        let reachable = tree.subtree_ids(root_id).len();
        if reachable != tree.nodes.len() {
            return Err(NidoError::Internal(format!(
                "community {community_id} has {} auth_nodes unreachable from the root",
                tree.nodes.len() - reachable
            )));
        }
        Ok(tree)
    }

    pub fn community_id(&self) -> Uuid {
        self.community_id
    }

    pub fn root(&self) -> &AuthNode {
        &self.nodes[&self.root_id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&AuthNode> {
        self.nodes.get(&id)
    }

    /// Like [`AuthTree::get`] but reports a missing node as `NotFound`.
    pub fn node(&self, id: Uuid) -> NidoResult<&AuthNode> {
        self.get(id)
            .ok_or_else(|| NidoError::not_found("auth_node", id))
    }

    pub fn parent(&self, id: Uuid) -> Option<&AuthNode> {
        self.get(id)?.parent_id.and_then(|p| self.get(p))
    }

    /// Direct children, ordered by name.
    pub fn children(&self, id: Uuid) -> Vec<&AuthNode> {
        self.children
            .get(&id)
            .map(|ids| ids.iter().map(|c| &self.nodes[c]).collect())
            .unwrap_or_default()
    }

    /// Ancestors of `id` from its parent up to the root.
    pub fn ancestors(&self, id: Uuid) -> Vec<&AuthNode> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            if out.len() >= MAX_TREE_DEPTH {
                break;
            }
            out.push(node);
            current = self.parent(node.id);
        }
        out
    }

    /// `id` followed by all of its descendants, breadth first.
    pub fn subtree_ids(&self, id: Uuid) -> Vec<Uuid> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            out.push(current);
            if let Some(kids) = self.children.get(&current) {
                queue.extend(kids.iter().copied());
            }
        }
        out
    }

    pub fn descendant_ids(&self, id: Uuid) -> Vec<Uuid> {
        self.subtree_ids(id).into_iter().skip(1).collect()
    }

    /// `true` if `node` is `ancestor` or lies beneath it.
    pub fn is_within(&self, ancestor: Uuid, node: Uuid) -> bool {
        node == ancestor || self.ancestors(node).iter().any(|a| a.id == ancestor)
    }

    /// Nodes in breadth-first order from the root.
    pub fn iter(&self) -> impl Iterator<Item = &AuthNode> {
        self.subtree_ids(self.root_id)
            .into_iter()
            .map(move |id| &self.nodes[&id])
    }

    /// Verify the narrowing invariant for every non-root node.
    pub fn check_invariant(&self) -> NidoResult<()> {
        for node in self.nodes.values() {
            if let Some(parent) = self.parent(node.id) {
                check_grant(&node.name, node.permissions, parent)?;
            }
        }
        Ok(())
    }

    /// New permissions for every descendant of `id` once `id` holds
    /// `new_bits`. Only descendants whose bits actually shrink are
    /// returned.
    pub fn narrowed_descendants(&self, id: Uuid, new_bits: Permissions) -> Vec<(Uuid, Permissions)> {
        let mut effective: HashMap<Uuid, Permissions> = HashMap::from([(id, new_bits)]);
        let mut changes = Vec::new();
        for child_id in self.descendant_ids(id) {
            let child = &self.nodes[&child_id];
            let Some(parent_bits) = child.parent_id.and_then(|p| effective.get(&p).copied()) else {
                continue;
            };
            let narrowed = child.permissions & parent_bits;
            if narrowed != child.permissions {
                changes.push((child_id, narrowed));
            }
            effective.insert(child_id, narrowed);
        }
        changes
    }
}

/// Validate that a node called `name` may hold `requested` beneath
/// `parent`. Every requested flag must be held by the parent; the first
/// flag that is not is reported.
pub fn check_grant(name: &str, requested: Permissions, parent: &AuthNode) -> NidoResult<()> {
    let held = parent.effective_permissions();
    match requested.first_missing_from(held) {
        Some((bit, _)) => Err(NidoError::PermissionEscalation {
            name: name.to_string(),
            bit: bit.to_string(),
            parent_value: held.to_string(),
        }),
        None => Ok(()),
    }
}

/// Validate a delegation: the parent must hold `CAN_DELEGATE` and the
/// requested flags must pass [`check_grant`].
pub fn check_delegation(name: &str, requested: Permissions, parent: &AuthNode) -> NidoResult<()> {
    if !parent.can_delegate() {
        return Err(NidoError::NotAuthorized {
            reason: format!("{} does not hold CAN_DELEGATE", parent.name),
        });
    }
    check_grant(name, requested, parent)
}

/// Validate a node name.
pub fn check_name(name: &str) -> NidoResult<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(NidoError::validation("authorization name must not be empty"));
    }
    if trimmed.chars().count() > 80 {
        return Err(NidoError::validation(
            "authorization name must be at most 80 characters",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    struct Fixture {
        community_id: Uuid,
        nodes: Vec<AuthNode>,
    }

    impl Fixture {
        fn new() -> (Self, Uuid) {
            let community_id = Uuid::new_v4();
            let root = AuthNode {
                id: Uuid::new_v4(),
                community_id,
                parent_id: None,
                name: "Omnipotent".into(),
                permissions: Permissions::all_flags(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            let root_id = root.id;
            (
                Self {
                    community_id,
                    nodes: vec![root],
                },
                root_id,
            )
        }

        fn add(&mut self, parent: Uuid, name: &str, permissions: Permissions) -> Uuid {
            let node = AuthNode {
                id: Uuid::new_v4(),
                community_id: self.community_id,
                parent_id: Some(parent),
                name: name.into(),
                permissions,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            let id = node.id;
            self.nodes.push(node);
            id
        }

        fn tree(&self) -> AuthTree {
            AuthTree::from_nodes(self.community_id, self.nodes.clone()).unwrap()
        }
    }

    #[test]
    fn builds_tree_and_walks_it() {
        let (mut fx, root) = Fixture::new();
        let board = fx.add(
            root,
            "Board",
            Permissions::CanDelegate | Permissions::ModifyBillingSettings,
        );
        let treasurer = fx.add(board, "Treasurer", Permissions::ModifyBillingSettings);
        let tree = fx.tree();

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.root().id, root);
        assert_eq!(tree.children(root).len(), 1);
        assert_eq!(tree.parent(treasurer).unwrap().id, board);
        let ancestors: Vec<Uuid> = tree.ancestors(treasurer).iter().map(|n| n.id).collect();
        assert_eq!(ancestors, vec![board, root]);
        assert!(tree.is_within(board, treasurer));
        assert!(!tree.is_within(treasurer, board));
        assert_eq!(tree.descendant_ids(root).len(), 2);
        tree.check_invariant().unwrap();
    }

    #[test]
    fn rejects_missing_or_duplicate_root() {
        let community_id = Uuid::new_v4();
        assert!(AuthTree::from_nodes(community_id, Vec::new()).is_err());

        let (mut fx, _) = Fixture::new();
        let (other, _) = Fixture::new();
        let mut second_root = other.nodes[0].clone();
        second_root.community_id = fx.community_id;
        fx.nodes.push(second_root);
        assert!(AuthTree::from_nodes(fx.community_id, fx.nodes).is_err());
    }

    #[test]
    fn rejects_orphaned_nodes() {
        let (mut fx, _) = Fixture::new();
        fx.add(Uuid::new_v4(), "Orphan", Permissions::none());
        assert!(AuthTree::from_nodes(fx.community_id, fx.nodes).is_err());
    }

    #[test]
    fn grant_names_offending_bit() {
        let (mut fx, root) = Fixture::new();
        let board = fx.add(
            root,
            "Board",
            Permissions::CanDelegate | Permissions::ModifyBillingSettings,
        );
        let tree = fx.tree();
        let board = tree.node(board).unwrap();

        check_delegation("Treasurer", Permissions::ModifyBillingSettings, board).unwrap();
        let err = check_delegation("Treasurer2", Permissions::ModifyReportingSettings, board)
            .unwrap_err();
        match err {
            NidoError::PermissionEscalation {
                name,
                bit,
                parent_value,
            } => {
                assert_eq!(name, "Treasurer2");
                assert_eq!(bit, "MODIFY_REPORTING_SETTINGS");
                assert_eq!(parent_value, "CAN_DELEGATE, MODIFY_BILLING_SETTINGS");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn root_accepts_any_grant() {
        let (fx, root) = Fixture::new();
        let tree = fx.tree();
        check_delegation("Anything", Permissions::all_flags(), tree.node(root).unwrap()).unwrap();
    }

    #[test]
    fn delegation_requires_can_delegate() {
        let (mut fx, root) = Fixture::new();
        let clerk = fx.add(root, "Clerk", Permissions::ReadErContacts);
        let tree = fx.tree();
        let err =
            check_delegation("Helper", Permissions::none(), tree.node(clerk).unwrap()).unwrap_err();
        assert!(matches!(err, NidoError::NotAuthorized { .. }));
    }

    #[test]
    fn narrowing_propagates_down() {
        let (mut fx, root) = Fixture::new();
        let board = fx.add(
            root,
            "Board",
            Permissions::CanDelegate | Permissions::ModifyBillingSettings | Permissions::ReadErContacts,
        );
        let treasurer = fx.add(
            board,
            "Treasurer",
            Permissions::CanDelegate | Permissions::ModifyBillingSettings,
        );
        let assistant = fx.add(treasurer, "Assistant", Permissions::ModifyBillingSettings);
        let secretary = fx.add(board, "Secretary", Permissions::ReadErContacts);
        let tree = fx.tree();

        let changes = tree.narrowed_descendants(board, Permissions::CanDelegate | Permissions::ReadErContacts);
        let changes: HashMap<Uuid, Permissions> = changes.into_iter().collect();

        assert_eq!(changes.get(&treasurer), Some(&Permissions::CanDelegate));
        assert_eq!(changes.get(&assistant), Some(&Permissions::none()));
        assert!(!changes.contains_key(&secretary));
    }

    #[test]
    fn invariant_violation_is_detected() {
        let (mut fx, root) = Fixture::new();
        let clerk = fx.add(root, "Clerk", Permissions::ReadErContacts);
        fx.add(clerk, "Rogue", Permissions::ModifyBillingSettings);
        assert!(matches!(
            fx.tree().check_invariant(),
            Err(NidoError::PermissionEscalation { .. })
        ));
    }

    #[test]
    fn name_validation() {
        assert!(check_name("Treasurer").is_ok());
        assert!(check_name("   ").is_err());
        assert!(check_name(&"x".repeat(81)).is_err());
    }
}
