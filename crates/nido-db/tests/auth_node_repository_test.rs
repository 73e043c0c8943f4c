//! Integration tests for the authorization node repository using
//! in-memory SurrealDB.

use nido_core::error::NidoError;
use nido_core::models::auth_node::{AuthNode, CreateAuthNode};
use nido_core::models::community::{CreateCommunity, CreateFounder};
use nido_core::models::org_unit::CreateOrgUnit;
use nido_core::models::permission::Permissions;
use nido_core::repository::{AuthNodeRepository, CommunityRepository, OrgUnitRepository};
use nido_core::tree::AuthTree;
use nido_db::repository::{
    SurrealAuthNodeRepository, SurrealCommunityRepository, SurrealOrgUnitRepository,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

/// Helper: spin up in-memory DB, run migrations, provision a community.
async fn setup() -> (
    Surreal<Db>,
    Uuid,     // community_id
    AuthNode, // root
) {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    nido_db::run_migrations(&db).await.unwrap();

    let provisioned = SurrealCommunityRepository::new(db.clone())
        .provision(CreateCommunity {
            name: "Harbour Rowing".into(),
            country: "NZ".into(),
            root_name: "Omnipotent".into(),
            root_unit_name: "Board".into(),
            founder: CreateFounder {
                personal_name: "Ada".into(),
                family_name: "Lovelace".into(),
                email: None,
                phone: None,
            },
        })
        .await
        .unwrap();

    (db, provisioned.community.id, provisioned.root)
}

async fn child(
    repo: &SurrealAuthNodeRepository<Db>,
    parent: &AuthNode,
    name: &str,
    permissions: Permissions,
) -> AuthNode {
    repo.create_child(
        CreateAuthNode {
            community_id: parent.community_id,
            parent_id: parent.id,
            name: name.into(),
            permissions,
        },
        parent.permissions,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn create_and_read_children() {
    let (db, community_id, root) = setup().await;
    let repo = SurrealAuthNodeRepository::new(db);

    let board = child(
        &repo,
        &root,
        "Board",
        Permissions::CanDelegate | Permissions::ModifyBillingSettings,
    )
    .await;
    assert_eq!(board.parent_id, Some(root.id));
    assert_eq!(
        board.permissions,
        Permissions::CanDelegate | Permissions::ModifyBillingSettings
    );

    let treasurer = child(&repo, &board, "Treasurer", Permissions::ModifyBillingSettings).await;
    let fetched = repo.get_by_id(community_id, treasurer.id).await.unwrap();
    assert_eq!(fetched.name, "Treasurer");
    assert_eq!(fetched.permissions, Permissions::ModifyBillingSettings);

    let children = repo.get_children(community_id, board.id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, treasurer.id);

    assert_eq!(repo.get_root(community_id).await.unwrap().id, root.id);
    assert_eq!(repo.list(community_id).await.unwrap().len(), 3);
    assert_eq!(repo.count(community_id).await.unwrap(), 3);
}

#[tokio::test]
async fn nodes_are_scoped_to_their_community() {
    let (db, _, root) = setup().await;
    let repo = SurrealAuthNodeRepository::new(db);

    let result = repo.get_by_id(Uuid::new_v4(), root.id).await;
    assert!(matches!(result, Err(NidoError::NotFound { .. })));
}

#[tokio::test]
async fn create_child_rejects_stale_parent_permissions() {
    let (db, community_id, root) = setup().await;
    let repo = SurrealAuthNodeRepository::new(db);
    let board = child(&repo, &root, "Board", Permissions::CanDelegate).await;

    // Caller validated against a value the parent no longer holds.
    let result = repo
        .create_child(
            CreateAuthNode {
                community_id,
                parent_id: board.id,
                name: "Treasurer".into(),
                permissions: Permissions::ModifyBillingSettings,
            },
            Permissions::CanDelegate | Permissions::ModifyBillingSettings,
        )
        .await;
    assert!(matches!(result, Err(NidoError::Conflict { .. })));
    assert_eq!(repo.count(community_id).await.unwrap(), 2);
}

#[tokio::test]
async fn set_permissions_writes_every_change() {
    let (db, community_id, root) = setup().await;
    let repo = SurrealAuthNodeRepository::new(db);
    let board = child(
        &repo,
        &root,
        "Board",
        Permissions::CanDelegate | Permissions::ReadErContacts,
    )
    .await;
    let clerk = child(&repo, &board, "Clerk", Permissions::ReadErContacts).await;

    repo.set_permissions(
        community_id,
        vec![
            (board.id, Permissions::CanDelegate),
            (clerk.id, Permissions::none()),
        ],
        (root.id, root.permissions),
        vec![(board.id, board.permissions), (clerk.id, clerk.permissions)],
    )
    .await
    .unwrap();

    let board = repo.get_by_id(community_id, board.id).await.unwrap();
    let clerk = repo.get_by_id(community_id, clerk.id).await.unwrap();
    assert_eq!(board.permissions, Permissions::CanDelegate);
    assert!(clerk.permissions.is_none());
}

async fn load_tree(repo: &SurrealAuthNodeRepository<Db>, community_id: Uuid) -> AuthTree {
    AuthTree::from_nodes(community_id, repo.list(community_id).await.unwrap()).unwrap()
}

/// Changes and subtree snapshot for narrowing `id` to `bits`.
fn narrowing(
    tree: &AuthTree,
    id: Uuid,
    bits: Permissions,
) -> (Vec<(Uuid, Permissions)>, Vec<(Uuid, Permissions)>) {
    let mut changes = vec![(id, bits)];
    changes.extend(tree.narrowed_descendants(id, bits));
    let subtree = tree
        .subtree_ids(id)
        .into_iter()
        .map(|n| (n, tree.node(n).unwrap().permissions))
        .collect();
    (changes, subtree)
}

#[tokio::test]
async fn set_permissions_rejects_child_added_after_tree_was_read() {
    let (db, community_id, root) = setup().await;
    let repo = SurrealAuthNodeRepository::new(db);
    let board = child(
        &repo,
        &root,
        "Board",
        Permissions::CanDelegate | Permissions::ReadErContacts,
    )
    .await;
    child(&repo, &board, "Clerk", Permissions::ReadErContacts).await;

    let stale = load_tree(&repo, community_id).await;
    child(&repo, &board, "Kid", Permissions::ReadErContacts).await;

    let (changes, subtree) = narrowing(&stale, board.id, Permissions::CanDelegate);
    let result = repo
        .set_permissions(community_id, changes, (root.id, root.permissions), subtree)
        .await;
    assert!(matches!(result, Err(NidoError::Conflict { .. })));

    let fresh = load_tree(&repo, community_id).await;
    fresh.check_invariant().unwrap();
    assert_eq!(
        fresh.node(board.id).unwrap().permissions,
        Permissions::CanDelegate | Permissions::ReadErContacts
    );

    // Retrying against a fresh read narrows the new child as well.
    let (changes, subtree) = narrowing(&fresh, board.id, Permissions::CanDelegate);
    repo.set_permissions(community_id, changes, (root.id, root.permissions), subtree)
        .await
        .unwrap();
    let after = load_tree(&repo, community_id).await;
    after.check_invariant().unwrap();
    assert!(after.children(board.id).iter().all(|n| n.permissions.is_none()));
}

#[tokio::test]
async fn set_permissions_rejects_descendant_with_changed_bits() {
    let (db, community_id, root) = setup().await;
    let repo = SurrealAuthNodeRepository::new(db);
    let board = child(
        &repo,
        &root,
        "Board",
        Permissions::CanDelegate | Permissions::ReadErContacts,
    )
    .await;
    let clerk = child(&repo, &board, "Clerk", Permissions::none()).await;

    let stale = load_tree(&repo, community_id).await;
    repo.set_permissions(
        community_id,
        vec![(clerk.id, Permissions::ReadErContacts)],
        (board.id, board.permissions),
        vec![(clerk.id, clerk.permissions)],
    )
    .await
    .unwrap();

    let (changes, subtree) = narrowing(&stale, board.id, Permissions::CanDelegate);
    let result = repo
        .set_permissions(community_id, changes, (root.id, root.permissions), subtree)
        .await;
    assert!(matches!(result, Err(NidoError::Conflict { .. })));
    load_tree(&repo, community_id).await.check_invariant().unwrap();
}

#[tokio::test]
async fn rename_and_reparent() {
    let (db, community_id, root) = setup().await;
    let repo = SurrealAuthNodeRepository::new(db);
    let board = child(&repo, &root, "Board", Permissions::CanDelegate).await;
    let clerk = child(&repo, &root, "Clerk", Permissions::none()).await;

    let renamed = repo
        .rename(community_id, clerk.id, "Secretary".into())
        .await
        .unwrap();
    assert_eq!(renamed.name, "Secretary");

    let moved = repo
        .reparent(community_id, clerk.id, board.id, board.permissions)
        .await
        .unwrap();
    assert_eq!(moved.parent_id, Some(board.id));

    let result = repo
        .reparent(community_id, root.id, board.id, board.permissions)
        .await;
    assert!(matches!(result, Err(NidoError::RootMutationForbidden { .. })));
}

#[tokio::test]
async fn delete_leaf_removes_exactly_one_node() {
    let (db, community_id, root) = setup().await;
    let repo = SurrealAuthNodeRepository::new(db);
    let clerk = child(&repo, &root, "Clerk", Permissions::ReadErContacts).await;
    let before = repo.count(community_id).await.unwrap();

    repo.delete(community_id, clerk.id).await.unwrap();

    assert_eq!(repo.count(community_id).await.unwrap(), before - 1);
    let result = repo.get_by_id(community_id, clerk.id).await;
    assert!(matches!(result, Err(NidoError::NotFound { .. })));
}

#[tokio::test]
async fn delete_root_is_forbidden() {
    let (db, community_id, root) = setup().await;
    let repo = SurrealAuthNodeRepository::new(db);

    let result = repo.delete(community_id, root.id).await;
    assert!(matches!(result, Err(NidoError::RootMutationForbidden { .. })));
    assert!(repo.get_root(community_id).await.is_ok());
}

#[tokio::test]
async fn delete_rejects_referenced_or_parent_nodes() {
    let (db, community_id, root) = setup().await;
    let repo = SurrealAuthNodeRepository::new(db.clone());
    let board = child(&repo, &root, "Board", Permissions::CanDelegate).await;
    let treasurer = child(&repo, &board, "Treasurer", Permissions::none()).await;

    let result = repo.delete(community_id, board.id).await;
    assert!(
        matches!(result, Err(NidoError::ReferentialConflict { .. })),
        "node with children must not be deleted"
    );

    SurrealOrgUnitRepository::new(db)
        .create(CreateOrgUnit {
            community_id,
            auth_node_id: treasurer.id,
            name: "Treasurer".into(),
            min_size: None,
            max_size: Some(1),
        })
        .await
        .unwrap();

    let result = repo.delete(community_id, treasurer.id).await;
    assert!(
        matches!(result, Err(NidoError::ReferentialConflict { .. })),
        "node bound to an org unit must not be deleted"
    );
    assert_eq!(repo.count(community_id).await.unwrap(), 3);
}

#[tokio::test]
async fn delete_missing_node_is_not_found() {
    let (db, community_id, _) = setup().await;
    let repo = SurrealAuthNodeRepository::new(db);

    let result = repo.delete(community_id, Uuid::new_v4()).await;
    assert!(matches!(result, Err(NidoError::NotFound { .. })));
}
