//! Integration tests for org units and membership using in-memory
//! SurrealDB.

use nido_core::error::NidoError;
use nido_core::models::community::{CreateCommunity, CreateFounder, ProvisionedCommunity};
use nido_core::models::org_unit::{CreateOrgUnit, OrgUnit, UpdateOrgUnit};
use nido_core::models::user::CreateUser;
use nido_core::repository::{CommunityRepository, OrgUnitRepository, Pagination, UserRepository};
use nido_db::repository::{
    SurrealCommunityRepository, SurrealOrgUnitRepository, SurrealUserRepository,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

/// Helper: spin up in-memory DB, run migrations, provision a community
/// and register three more users.
async fn setup() -> (
    Surreal<Db>,
    ProvisionedCommunity,
    Vec<Uuid>, // extra user ids
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

    let users = SurrealUserRepository::new(db.clone());
    let mut ids = Vec::new();
    for (personal, family) in [("Grace", "Hopper"), ("Alan", "Turing"), ("Edsger", "Dijkstra")] {
        let user = users
            .create(CreateUser {
                community_id: provisioned.community.id,
                personal_name: personal.into(),
                family_name: family.into(),
                email: None,
                phone: None,
            })
            .await
            .unwrap();
        ids.push(user.id);
    }

    (db, provisioned, ids)
}

async fn unit(
    repo: &SurrealOrgUnitRepository<Db>,
    provisioned: &ProvisionedCommunity,
    name: &str,
    min_size: Option<u32>,
    max_size: Option<u32>,
) -> OrgUnit {
    repo.create(CreateOrgUnit {
        community_id: provisioned.community.id,
        auth_node_id: provisioned.root.id,
        name: name.into(),
        min_size,
        max_size,
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn create_get_and_list() {
    let (db, provisioned, _) = setup().await;
    let community_id = provisioned.community.id;
    let repo = SurrealOrgUnitRepository::new(db);

    let president = unit(&repo, &provisioned, "President", Some(1), Some(1)).await;
    assert_eq!(president.min_size, Some(1));
    assert_eq!(president.max_size, Some(1));

    let fetched = repo.get_by_id(community_id, president.id).await.unwrap();
    assert_eq!(fetched.name, "President");

    let names: Vec<String> = repo
        .list(community_id)
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.name)
        .collect();
    assert_eq!(names, vec!["Board".to_string(), "President".to_string()]);

    let bound = repo
        .list_by_auth_node(community_id, provisioned.root.id)
        .await
        .unwrap();
    assert_eq!(bound.len(), 2);
}

#[tokio::test]
async fn create_rejects_bad_bounds_and_unknown_nodes() {
    let (db, provisioned, _) = setup().await;
    let community_id = provisioned.community.id;
    let repo = SurrealOrgUnitRepository::new(db);

    let inverted = repo
        .create(CreateOrgUnit {
            community_id,
            auth_node_id: provisioned.root.id,
            name: "Committee".into(),
            min_size: Some(3),
            max_size: Some(2),
        })
        .await;
    assert!(matches!(inverted, Err(NidoError::Validation { .. })));

    let dangling = repo
        .create(CreateOrgUnit {
            community_id,
            auth_node_id: Uuid::new_v4(),
            name: "Committee".into(),
            min_size: None,
            max_size: None,
        })
        .await;
    assert!(matches!(dangling, Err(NidoError::NotFound { .. })));
}

#[tokio::test]
async fn locked_unit_rejects_add_and_remove() {
    let (db, provisioned, users) = setup().await;
    let community_id = provisioned.community.id;
    let repo = SurrealOrgUnitRepository::new(db);
    let president = unit(&repo, &provisioned, "President", Some(1), Some(1)).await;

    repo.add_member(community_id, president.id, users[0]).await.unwrap();

    let add = repo.add_member(community_id, president.id, users[1]).await;
    assert!(matches!(add, Err(NidoError::CapacityExceeded { max_size: 1, .. })));

    let remove = repo.remove_member(community_id, president.id, users[0]).await;
    assert!(matches!(remove, Err(NidoError::BelowMinimum { min_size: 1, .. })));

    assert_eq!(repo.count_members(community_id, president.id).await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_and_missing_memberships() {
    let (db, provisioned, users) = setup().await;
    let community_id = provisioned.community.id;
    let repo = SurrealOrgUnitRepository::new(db);
    let crew = unit(&repo, &provisioned, "Crew", None, None).await;

    repo.add_member(community_id, crew.id, users[0]).await.unwrap();
    let again = repo.add_member(community_id, crew.id, users[0]).await;
    assert!(matches!(again, Err(NidoError::AlreadyExists { .. })));

    let absent = repo.remove_member(community_id, crew.id, users[1]).await;
    assert!(matches!(absent, Err(NidoError::NotFound { .. })));

    let stranger = repo.add_member(community_id, crew.id, Uuid::new_v4()).await;
    assert!(matches!(stranger, Err(NidoError::NotFound { .. })));

    repo.remove_member(community_id, crew.id, users[0]).await.unwrap();
    assert_eq!(repo.count_members(community_id, crew.id).await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_adds_at_capacity_never_both_succeed() {
    let (db, provisioned, users) = setup().await;
    let community_id = provisioned.community.id;
    let repo = SurrealOrgUnitRepository::new(db);
    let pair = unit(&repo, &provisioned, "Captains", None, Some(2)).await;
    repo.add_member(community_id, pair.id, users[0]).await.unwrap();

    let (first, second) = tokio::join!(
        repo.add_member(community_id, pair.id, users[1]),
        repo.add_member(community_id, pair.id, users[2]),
    );

    assert!(
        !(first.is_ok() && second.is_ok()),
        "only one add may take the last seat"
    );
    for outcome in [&first, &second] {
        if let Err(err) = outcome {
            assert!(
                matches!(
                    err,
                    NidoError::CapacityExceeded { max_size: 2, .. } | NidoError::Conflict { .. }
                ),
                "losing add must report capacity or a conflict, got {err:?}"
            );
        }
    }
    let seated = [&first, &second].iter().filter(|r| r.is_ok()).count() as u64;
    assert_eq!(
        repo.count_members(community_id, pair.id).await.unwrap(),
        1 + seated
    );
}

#[tokio::test]
async fn members_are_listed_in_directory_order() {
    let (db, provisioned, users) = setup().await;
    let community_id = provisioned.community.id;
    let repo = SurrealOrgUnitRepository::new(db);
    let crew = unit(&repo, &provisioned, "Crew", None, None).await;
    for user in &users {
        repo.add_member(community_id, crew.id, *user).await.unwrap();
    }

    let members = repo
        .get_members(community_id, crew.id, Pagination::default())
        .await
        .unwrap();
    assert_eq!(members.total, 3);
    let families: Vec<&str> = members.items.iter().map(|u| u.family_name.as_str()).collect();
    assert_eq!(families, vec!["Dijkstra", "Hopper", "Turing"]);

    let units = repo.get_user_org_units(community_id, users[0]).await.unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].id, crew.id);
}

#[tokio::test]
async fn update_bounds_respect_current_count() {
    let (db, provisioned, users) = setup().await;
    let community_id = provisioned.community.id;
    let repo = SurrealOrgUnitRepository::new(db);
    let crew = unit(&repo, &provisioned, "Crew", None, None).await;
    repo.add_member(community_id, crew.id, users[0]).await.unwrap();
    repo.add_member(community_id, crew.id, users[1]).await.unwrap();

    let too_small = repo
        .update(
            community_id,
            crew.id,
            UpdateOrgUnit {
                max_size: Some(Some(1)),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(too_small, Err(NidoError::Validation { .. })));

    let too_large = repo
        .update(
            community_id,
            crew.id,
            UpdateOrgUnit {
                min_size: Some(Some(3)),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(too_large, Err(NidoError::Validation { .. })));

    let updated = repo
        .update(
            community_id,
            crew.id,
            UpdateOrgUnit {
                name: Some("First Crew".into()),
                min_size: Some(Some(2)),
                max_size: Some(Some(4)),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "First Crew");
    assert_eq!(updated.min_size, Some(2));
    assert_eq!(updated.max_size, Some(4));

    let cleared = repo
        .update(
            community_id,
            crew.id,
            UpdateOrgUnit {
                max_size: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(cleared.max_size, None);
    assert_eq!(cleared.min_size, Some(2));
}

#[tokio::test]
async fn delete_removes_unit_and_memberships() {
    let (db, provisioned, users) = setup().await;
    let community_id = provisioned.community.id;
    let repo = SurrealOrgUnitRepository::new(db);
    let crew = unit(&repo, &provisioned, "Crew", None, None).await;
    repo.add_member(community_id, crew.id, users[0]).await.unwrap();

    repo.delete(community_id, crew.id).await.unwrap();

    let result = repo.get_by_id(community_id, crew.id).await;
    assert!(matches!(result, Err(NidoError::NotFound { .. })));
    let units = repo.get_user_org_units(community_id, users[0]).await.unwrap();
    assert!(units.is_empty());
}
