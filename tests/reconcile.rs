mod common;

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::harness;
use zonewarden::db::{provider_repo, record_repo, zone_repo};
use zonewarden::engine::records::{RecordRequest, create_record};
use zonewarden::engine::zones::{ZoneRequest, create_zone};
use zonewarden::models::RecordType;
use zonewarden::sync::{sync_all, sync_provider, sync_zone};

fn key_set(records: impl IntoIterator<Item = (String, RecordType, String)>) -> BTreeSet<(String, String, String)> {
    records
        .into_iter()
        .map(|(name, rtype, content)| (name, rtype.to_string(), content))
        .collect()
}

#[tokio::test]
async fn sync_converges_on_backend_state() {
    let h = harness().await;
    let zone = create_zone(&h.state, h.provider_id, ZoneRequest::new("example.com."))
        .await
        .unwrap()
        .local
        .unwrap();
    let www = create_record(
        &h.state,
        zone.id,
        RecordRequest::new("www", RecordType::A, "192.0.2.1"),
    )
    .await
    .unwrap()
    .local
    .unwrap();

    // Drift: one record appears out of band, one disappears, one glue record shows up.
    h.backend.inject("example.com.", "api.example.com.", RecordType::A, "192.0.2.2");
    h.backend.inject("example.com.", "example.com.", RecordType::MX, "10 mail.example.com.");
    h.backend.inject("example.com.", "ns1.example.net.", RecordType::A, "198.51.100.1");
    h.backend.remove("example.com.", www.external_id.as_deref().unwrap());

    let report = sync_zone(&h.state, zone.id).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.records_removed, 1);

    let local = record_repo::list(&h.state.db, zone.id).await.unwrap();
    let remote = h.backend.records("example.com.");
    assert_eq!(
        key_set(local.iter().map(|r| (r.name.clone(), r.rtype.clone(), r.content.clone()))),
        key_set(
            remote
                .iter()
                .filter(|r| r.name.ends_with("example.com."))
                .map(|r| (r.name.clone(), r.rtype.clone(), r.content.clone()))
        )
    );
    let mx = local.iter().find(|r| r.rtype == RecordType::MX).unwrap();
    assert_eq!(mx.priority, Some(10));
    assert_eq!(mx.content, "mail.example.com.");
    assert!(local.iter().all(|r| r.name != "ns1.example.net."));
    assert!(record_repo::find(&h.state.db, www.id).await.unwrap().is_none());

    // A second pass changes nothing.
    let again = sync_zone(&h.state, zone.id).await.unwrap();
    assert_eq!(again.records_removed, 0);
    assert_eq!(
        record_repo::list(&h.state.db, zone.id).await.unwrap().len(),
        local.len()
    );
}

#[tokio::test]
async fn provider_sync_discovers_and_retires_zones() {
    let h = harness().await;
    let kept = create_zone(&h.state, h.provider_id, ZoneRequest::new("example.com."))
        .await
        .unwrap()
        .local
        .unwrap();
    let gone = create_zone(&h.state, h.provider_id, ZoneRequest::new("example.org."))
        .await
        .unwrap()
        .local
        .unwrap();

    // example.org. vanishes from the backend; example.net. is created elsewhere.
    {
        let mut zones = h.backend.zones.lock().unwrap();
        zones.remove("example.org.");
        let template = zones.get("example.com.").unwrap().clone();
        zones.insert("example.net.".into(), template);
    }
    // The cloned template still names example.com.; replace its records.
    for r in h.backend.records("example.net.") {
        h.backend.remove("example.net.", &r.id);
    }
    h.backend.inject(
        "example.net.",
        "example.net.",
        RecordType::SOA,
        "ns1.example.net. hostmaster.example.net. 2024010101 10800 3600 604800 300",
    );
    h.backend.inject("example.net.", "www.example.net.", RecordType::A, "203.0.113.5");

    let report = sync_provider(&h.state, h.provider_id).await.unwrap();
    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.zones_seen, 2);
    assert_eq!(report.zones_removed, 1);

    assert!(zone_repo::find(&h.state.db, gone.id).await.unwrap().is_none());
    assert!(record_repo::list(&h.state.db, gone.id).await.unwrap().is_empty());
    assert!(zone_repo::find(&h.state.db, kept.id).await.unwrap().is_some());

    let discovered = zone_repo::find_by_name(&h.state.db, h.provider_id, "example.net.")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(discovered.serial, 2024010101);
    assert!(discovered.last_synced.is_some());
    assert_eq!(record_repo::list(&h.state.db, discovered.id).await.unwrap().len(), 2);

    let provider = provider_repo::find(&h.state.db, h.provider_id).await.unwrap().unwrap();
    assert!(provider.last_sync.is_some());

    // example.org. returns: the soft-deleted row is revived, not duplicated.
    create_zone_on_backend(&h, "example.org.");
    sync_all(&h.state).await.unwrap();
    let revived = zone_repo::find_by_name(&h.state.db, h.provider_id, "example.org.")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(revived.id, gone.id);
}

fn create_zone_on_backend(h: &common::Harness, name: &str) {
    {
        let mut zones = h.backend.zones.lock().unwrap();
        let mut zone = zones.get("example.com.").unwrap().clone();
        zone.records.clear();
        zones.insert(name.to_string(), zone);
    }
    h.backend.inject(
        name,
        name,
        RecordType::SOA,
        &format!("ns1.example.net. hostmaster.{name} 2024010101 10800 3600 604800 300"),
    );
}

#[tokio::test]
async fn zone_sync_does_not_drop_a_concurrent_write() {
    let h = harness().await;
    let zone = create_zone(&h.state, h.provider_id, ZoneRequest::new("example.com."))
        .await
        .unwrap()
        .local
        .unwrap();
    h.backend.list_delay_ms.store(200, Ordering::SeqCst);

    let (synced, created) = tokio::join!(sync_zone(&h.state, zone.id), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        create_record(
            &h.state,
            zone.id,
            RecordRequest::new("www", RecordType::A, "192.0.2.1"),
        )
        .await
    });
    assert!(synced.unwrap().is_clean());
    let created = created.unwrap().local.unwrap();

    assert!(record_repo::find(&h.state.db, created.id).await.unwrap().is_some());
    assert!(
        h.backend
            .records("example.com.")
            .iter()
            .any(|r| r.name == "www.example.com.")
    );
}

#[tokio::test]
async fn provider_sync_keeps_a_zone_created_mid_pass() {
    let h = harness().await;
    create_zone(&h.state, h.provider_id, ZoneRequest::new("example.com."))
        .await
        .unwrap();
    h.backend.list_delay_ms.store(200, Ordering::SeqCst);

    let (report, created) = tokio::join!(sync_provider(&h.state, h.provider_id), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        create_zone(&h.state, h.provider_id, ZoneRequest::new("new.com.")).await
    });
    let report = report.unwrap();
    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.zones_removed, 0);
    let created = created.unwrap().local.unwrap();

    let cached = zone_repo::find(&h.state.db, created.id).await.unwrap();
    assert!(cached.is_some());
    assert!(h.backend.zones.lock().unwrap().contains_key("new.com."));
}
