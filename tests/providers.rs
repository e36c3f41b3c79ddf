mod common;

use common::harness;
use zonewarden::db::{record_repo, zone_repo};
use zonewarden::engine::providers::{
    DeleteMode, ProviderPatch, ProviderRequest, create_provider, delete_provider, test_provider,
    update_provider,
};
use zonewarden::engine::records::{RecordRequest, create_record};
use zonewarden::engine::zones::{ZoneRequest, create_zone};
use zonewarden::error::AppError;
use zonewarden::models::{ConnectionConfig, ProviderType, RecordType};

fn request(name: &str, provider_type: ProviderType) -> ProviderRequest {
    ProviderRequest {
        name: name.into(),
        provider_type,
        connection: ConnectionConfig::default(),
        policy: None,
    }
}

#[tokio::test]
async fn creation_checks_type_and_credentials() {
    let h = harness().await;

    let err = create_provider(&h.state, request("r53", ProviderType::Route53))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Configuration(_)), "{err:?}");

    let err = create_provider(&h.state, request("cf", ProviderType::Cloudflare))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Configuration(_)), "{err:?}");

    let err = create_provider(&h.state, request("mock", ProviderType::Custom))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyExists(_)), "{err:?}");

    let err = create_provider(&h.state, request("  ", ProviderType::Custom))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "{err:?}");

    let second = create_provider(&h.state, request("second", ProviderType::Custom))
        .await
        .unwrap();
    assert!(second.active);
    assert!(test_provider(&h.state, second.id).await.unwrap().ok);
}

#[tokio::test]
async fn inactive_provider_refuses_writes() {
    let h = harness().await;
    update_provider(
        &h.state,
        h.provider_id,
        ProviderPatch {
            active: Some(false),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let err = create_zone(&h.state, h.provider_id, ZoneRequest::new("example.com."))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Configuration(_)), "{err:?}");
    assert!(h.backend.zones.lock().unwrap().is_empty());
}

#[tokio::test]
async fn removal_modes() {
    let h = harness().await;
    let zone = create_zone(&h.state, h.provider_id, ZoneRequest::new("example.com."))
        .await
        .unwrap()
        .local
        .unwrap();
    create_record(
        &h.state,
        zone.id,
        RecordRequest::new("www", RecordType::A, "192.0.2.1"),
    )
    .await
    .unwrap();

    let err = delete_provider(&h.state, h.provider_id, DeleteMode::Refuse)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{err:?}");

    let err = delete_provider(&h.state, h.provider_id, DeleteMode::Reassign(h.provider_id))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "{err:?}");

    // Reassign moves the zone and keeps its records.
    let other = create_provider(&h.state, request("other", ProviderType::Custom))
        .await
        .unwrap();
    delete_provider(&h.state, h.provider_id, DeleteMode::Reassign(other.id))
        .await
        .unwrap();
    let moved = zone_repo::find(&h.state.db, zone.id).await.unwrap().unwrap();
    assert_eq!(moved.provider_id, other.id);
    assert!(!record_repo::list(&h.state.db, zone.id).await.unwrap().is_empty());
    assert!(matches!(
        h.state.provider(h.provider_id).await.unwrap_err(),
        AppError::NotFound(_)
    ));

    // Cascade takes zones and records with it.
    delete_provider(&h.state, other.id, DeleteMode::Cascade)
        .await
        .unwrap();
    assert!(zone_repo::find(&h.state.db, zone.id).await.unwrap().is_none());
    assert!(record_repo::list(&h.state.db, zone.id).await.unwrap().is_empty());
}
