//! Lease-expiry sweeps

mod common;

use common::{Harness, blog};
use vitrine_common::Context;
use vitrine_common::model::{EventType, ExhibitStatus};
use vitrine_core::ApplicationProvisioner;

async fn started(harness: &Harness, name: &str) -> (String, i64) {
    let id = harness.create(blog(name)).await;
    harness
        .provisioner
        .start_application(&Context::new(), &id)
        .await
        .unwrap();
    let last_accessed = harness.runtime_info(&id).await.last_accessed;
    (id, last_accessed)
}

#[tokio::test]
async fn test_sweep_within_lease_keeps_exhibit() {
    let harness = Harness::new().await;
    let (id, last_accessed) = started(&harness, "blog").await;

    let report = harness
        .cleanup
        .sweep(&Context::new(), last_accessed + 600)
        .await
        .unwrap();

    assert!(report.expired.is_empty());
    assert_eq!(harness.runtime_info(&id).await.status, ExhibitStatus::Running);
    assert_eq!(harness.runtime.call_count("stop_container"), 0);
}

#[tokio::test]
async fn test_expired_exhibit_is_stopped_once() {
    let harness = Harness::new().await;
    let (id, last_accessed) = started(&harness, "blog").await;
    let ctx = Context::new();

    let report = harness.cleanup.sweep(&ctx, last_accessed + 660).await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.expired, vec![id.clone()]);
    assert_eq!(report.cleaned, vec![id.clone()]);

    let info = harness.runtime_info(&id).await;
    assert_eq!(info.status, ExhibitStatus::Stopped);
    assert!(harness.runtime.container_names().is_empty());
    assert_eq!(harness.runtime.call_count("stop_container"), 2);
    assert_eq!(harness.emitter.events_of(EventType::LeaseExpired).len(), 1);

    // Stopped exhibits are not expired again
    let mut again = harness.cleanup.sweep(&ctx, last_accessed + 720).await.unwrap();
    for _ in 0..50 {
        if again.expired.is_empty() {
            break;
        }
        // The mirror may still be catching up with the stop
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        again = harness.cleanup.sweep(&ctx, last_accessed + 720).await.unwrap();
    }
    assert!(again.expired.is_empty());
    assert_eq!(harness.runtime.call_count("stop_container"), 2);
}

#[tokio::test]
async fn test_failed_stop_is_retried_without_reprovisioning() {
    let harness = Harness::new().await;
    let (id, last_accessed) = started(&harness, "blog").await;
    let ctx = Context::new();
    let creates = harness.runtime.call_count("create_container");
    harness.runtime.fail_next("stop_container", 1);

    let first = harness.cleanup.sweep(&ctx, last_accessed + 660).await.unwrap();
    assert_eq!(first.failed, vec![id.clone()]);
    assert_eq!(harness.runtime_info(&id).await.status, ExhibitStatus::Running);

    harness.wait_for_status(&id, ExhibitStatus::Running).await;
    let mut second = harness.cleanup.sweep(&ctx, last_accessed + 660).await.unwrap();
    for _ in 0..50 {
        if !second.cleaned.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        second = harness.cleanup.sweep(&ctx, last_accessed + 660).await.unwrap();
    }
    assert_eq!(second.cleaned, vec![id.clone()]);
    assert_eq!(harness.runtime_info(&id).await.status, ExhibitStatus::Stopped);
    assert_eq!(harness.runtime.call_count("create_container"), creates);
}

#[tokio::test]
async fn test_failure_is_isolated_per_exhibit() {
    let harness = Harness::new().await;
    let (first, first_accessed) = started(&harness, "alpha").await;
    let (second, second_accessed) = started(&harness, "beta").await;
    harness.runtime.fail_next("remove_network", 1);

    let now = first_accessed.max(second_accessed) + 660;
    let report = harness.cleanup.sweep(&Context::new(), now).await.unwrap();

    assert_eq!(report.expired.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.cleaned.len(), 1);
    for id in [&first, &second] {
        assert_eq!(harness.runtime_info(id).await.status, ExhibitStatus::Stopped);
    }
}

#[tokio::test]
async fn test_explicit_stop_then_sweep_is_noop() {
    let harness = Harness::new().await;
    let (id, last_accessed) = started(&harness, "blog").await;
    let ctx = Context::new();
    harness.provisioner.stop_application(&ctx, &id).await.unwrap();
    harness.wait_for_status(&id, ExhibitStatus::Stopped).await;

    let mut report = harness.cleanup.sweep(&ctx, last_accessed + 660).await.unwrap();
    for _ in 0..50 {
        if report.expired.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        report = harness.cleanup.sweep(&ctx, last_accessed + 660).await.unwrap();
    }
    assert!(report.expired.is_empty());
}
