mod common;

use std::sync::atomic::Ordering;

use common::harness;
use zonewarden::db::zone_repo;
use zonewarden::dnssec::{
    self, CheckStatus, activate_key, disable, enable, enable_many, generate_keys, list_keys,
    rollover,
};
use zonewarden::engine::SideEffect;
use zonewarden::engine::zones::{ZonePatch, ZoneRequest, create_zone, update_zone};
use zonewarden::error::AppError;
use zonewarden::models::{DnssecState, KeyType};

#[tokio::test]
async fn enable_generates_keys_and_rollover_keeps_old_key() {
    let h = harness().await;
    let zone = create_zone(&h.state, h.provider_id, ZoneRequest::new("example.com."))
        .await
        .unwrap()
        .local
        .unwrap();
    assert_eq!(zone.dnssec_state, DnssecState::Disabled);

    let zone = enable(&h.state, zone.id).await.unwrap();
    assert_eq!(zone.dnssec_state, DnssecState::KeysActive);
    assert!(zone.dnssec_enabled);
    let keys = &zone.provider_data.dnssec_keys;
    assert!(keys.iter().any(|k| k.key_type == KeyType::Ksk && k.active));
    assert!(keys.iter().any(|k| k.key_type == KeyType::Zsk && k.active));
    assert!(keys.iter().all(|k| k.created_at.is_some()));

    // Enabling twice is a no-op.
    let again = enable(&h.state, zone.id).await.unwrap();
    assert_eq!(again.provider_data.dnssec_keys.len(), keys.len());

    let err = rollover(&h.state, zone.id, KeyType::Zsk, false).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "{err:?}");

    let old_zsk = keys
        .iter()
        .find(|k| k.key_type == KeyType::Zsk)
        .unwrap()
        .id
        .clone();
    let report = rollover(&h.state, zone.id, KeyType::Zsk, true).await.unwrap();
    assert_eq!(report.retired, vec![old_zsk.clone()]);
    assert!(report.new_key.active);

    let keys = list_keys(&h.state, zone.id).await.unwrap();
    let old = keys.iter().find(|k| k.id == old_zsk).unwrap();
    assert!(!old.active, "old key is deactivated, not deleted");
    assert_eq!(keys.iter().filter(|k| k.key_type == KeyType::Zsk && k.active).count(), 1);

    let zone = h.state.zone(zone.id).await.unwrap();
    assert_eq!(zone.dnssec_state, DnssecState::KeysActive);

    // Explicit activation of the retired key.
    let key = activate_key(&h.state, zone.id, &old_zsk).await.unwrap();
    assert!(key.active);

    let zone = disable(&h.state, zone.id).await.unwrap();
    assert_eq!(zone.dnssec_state, DnssecState::Disabled);
    assert!(!zone.dnssec_enabled);
    assert!(zone.provider_data.dnssec_keys.is_empty());
}

#[tokio::test]
async fn generate_keys_needs_enabled_zone() {
    let h = harness().await;
    let zone = create_zone(&h.state, h.provider_id, ZoneRequest::new("example.com."))
        .await
        .unwrap()
        .local
        .unwrap();
    let err = generate_keys(&h.state, zone.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{err:?}");

    enable(&h.state, zone.id).await.unwrap();
    let created = generate_keys(&h.state, zone.id, Some("ed25519")).await.unwrap();
    assert_eq!(created.len(), 2);
    // Both roles already had active keys, so the new pair waits for rollover.
    assert!(created.iter().all(|k| !k.active));
    assert!(created.iter().all(|k| k.algorithm == "ed25519"));
}

#[tokio::test]
async fn auto_dnssec_on_create_and_update() {
    let h = harness().await;
    let mut req = ZoneRequest::new("signed.example.");
    req.auto_dnssec = true;
    let outcome = create_zone(&h.state, h.provider_id, req).await.unwrap();
    assert!(outcome.side_effects.iter().any(|s| matches!(s, SideEffect::DnssecEnabled { .. })));
    let zone = outcome.local.unwrap();
    assert!(zone.auto_dnssec);
    assert_eq!(zone.dnssec_state, DnssecState::KeysActive);

    let plain = create_zone(&h.state, h.provider_id, ZoneRequest::new("plain.example."))
        .await
        .unwrap()
        .local
        .unwrap();
    let outcome = update_zone(
        &h.state,
        plain.id,
        ZonePatch {
            auto_dnssec: Some(true),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome.local.unwrap().dnssec_state, DnssecState::KeysActive);
}

#[tokio::test]
async fn auto_dnssec_flag_follows_the_backend() {
    let h = harness().await;
    let plain = create_zone(&h.state, h.provider_id, ZoneRequest::new("plain.example."))
        .await
        .unwrap()
        .local
        .unwrap();
    let on = || ZonePatch {
        auto_dnssec: Some(true),
        ..Default::default()
    };

    // The backend refuses: the call fails and the cache keeps the flag off.
    h.backend.fail_writes.store(true, Ordering::SeqCst);
    let err = update_zone(&h.state, plain.id, on()).await.unwrap_err();
    assert!(matches!(err, AppError::RemoteApi { .. }), "{err:?}");
    let cached = zone_repo::find(&h.state.db, plain.id).await.unwrap().unwrap();
    assert!(!cached.auto_dnssec);
    assert_eq!(cached.dnssec_state, DnssecState::Disabled);
    h.backend.fail_writes.store(false, Ordering::SeqCst);

    // Turning the flag off again disables signing.
    update_zone(&h.state, plain.id, on()).await.unwrap();
    let outcome = update_zone(
        &h.state,
        plain.id,
        ZonePatch {
            auto_dnssec: Some(false),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(outcome.side_effects.iter().any(|s| matches!(s, SideEffect::DnssecDisabled { .. })));
    let zone = outcome.local.unwrap();
    assert!(!zone.auto_dnssec);
    assert_eq!(zone.dnssec_state, DnssecState::Disabled);
    assert!(zone.provider_data.dnssec_keys.is_empty());
    assert!(h.backend.zones.lock().unwrap()["plain.example."].keys.is_empty());

    // A zone whose signing cannot be enabled is created with the flag off.
    h.backend.fail_dnssec.store(true, Ordering::SeqCst);
    let mut req = ZoneRequest::new("signed.example.");
    req.auto_dnssec = true;
    let outcome = create_zone(&h.state, h.provider_id, req).await.unwrap();
    assert!(outcome.side_effects.iter().any(|s| matches!(s, SideEffect::Warning { .. })));
    let zone = outcome.local.unwrap();
    assert!(!zone.auto_dnssec);
    assert_eq!(zone.dnssec_state, DnssecState::Disabled);
    let cached = zone_repo::find(&h.state.db, zone.id).await.unwrap().unwrap();
    assert!(!cached.auto_dnssec);
}

#[tokio::test]
async fn failed_disable_keeps_previous_state() {
    let h = harness().await;
    let zone = create_zone(&h.state, h.provider_id, ZoneRequest::new("example.com."))
        .await
        .unwrap()
        .local
        .unwrap();
    enable(&h.state, zone.id).await.unwrap();

    h.backend.fail_dnssec.store(true, Ordering::SeqCst);
    disable(&h.state, zone.id).await.unwrap_err();
    let cached = zone_repo::find(&h.state.db, zone.id).await.unwrap().unwrap();
    assert_eq!(cached.dnssec_state, DnssecState::KeysActive);
    assert!(cached.dnssec_enabled);
    assert!(!cached.provider_data.dnssec_keys.is_empty());

    h.backend.fail_dnssec.store(false, Ordering::SeqCst);
    let zone = disable(&h.state, zone.id).await.unwrap();
    assert_eq!(zone.dnssec_state, DnssecState::Disabled);
}

#[tokio::test]
async fn bulk_enable_reports_each_zone() {
    let h = harness().await;
    let zone = create_zone(&h.state, h.provider_id, ZoneRequest::new("example.com."))
        .await
        .unwrap()
        .local
        .unwrap();

    let results = enable_many(&h.state, &[zone.id, 9999]).await;
    assert_eq!(results.len(), 2);
    assert!(results[0].ok);
    assert_eq!(results[0].state, Some(DnssecState::KeysActive));
    assert!(!results[1].ok);
    assert!(results[1].error.is_some());
}

#[tokio::test]
async fn validation_checks_are_independent() {
    let h = harness().await;
    let zone = create_zone(&h.state, h.provider_id, ZoneRequest::new("example.com."))
        .await
        .unwrap()
        .local
        .unwrap();
    enable(&h.state, zone.id).await.unwrap();

    h.lookup.set_records("example.com.", "DNSKEY", &["257 3 13 AAAA"]);
    h.lookup.set_records("example.com.", "RRSIG", &["SOA 13 2 300 ..."]);
    h.lookup.set_records("example.com.", "NSEC3PARAM", &["1 0 0 -"]);

    let report = dnssec::validate(&h.state, zone.id).await.unwrap();
    let status = |name: &str| report.checks.iter().find(|c| c.name == name).unwrap().status;
    assert_eq!(status("ds"), CheckStatus::Fail);
    assert_eq!(status("dnskey"), CheckStatus::Pass);
    assert_eq!(status("rrsig"), CheckStatus::Pass);
    assert_eq!(status("nsec"), CheckStatus::Pass);
    assert_eq!(status("key_age"), CheckStatus::Pass);
    assert_eq!(report.status, CheckStatus::Fail);
    assert!(!report.passed());

    h.lookup.set_records("example.com.", "DS", &["12345 13 2 ABCDEF"]);
    let report = dnssec::validate(&h.state, zone.id).await.unwrap();
    assert!(report.passed());

    let zone = h.state.zone(zone.id).await.unwrap();
    assert!(zone.last_check.is_some());
}
