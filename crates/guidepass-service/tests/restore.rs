//! Restoring purchases from the provider.

mod common;

use chrono::{Duration, Utc};

use common::{event, event_at, TestHarness};
use guidepass_core::{PurchaseState, TransactionId};
use guidepass_service::{RestoreOutcome, RestoreReport, ServiceError};

fn tx(s: &str) -> TransactionId {
    TransactionId::new(s).unwrap()
}

#[tokio::test]
async fn nothing_to_restore_is_not_an_error() {
    let harness = TestHarness::connected().await;

    let outcome = harness.service.restore().await.unwrap();
    assert_eq!(outcome, RestoreOutcome::Empty);
}

#[tokio::test]
async fn restore_requires_connection() {
    let harness = TestHarness::new();

    let err = harness.service.restore().await.unwrap_err();
    assert!(matches!(err, ServiceError::NotConnected));
}

#[tokio::test]
async fn restore_replays_every_purchase_once() {
    let harness = TestHarness::connected().await;
    harness.provider.add_purchase(event(
        "guidepass.unlimited.yearly",
        "GPA.1",
        PurchaseState::Restored,
    ));
    harness
        .provider
        .add_purchase(event("guidepass.pack.15", "GPA.2", PurchaseState::Restored));
    harness.provider.add_purchase(event(
        "guidepass.attraction.louvre",
        "GPA.3",
        PurchaseState::Restored,
    ));

    let first = harness.service.restore().await.unwrap();
    assert_eq!(
        first,
        RestoreOutcome::Restored(RestoreReport {
            applied: 3,
            ..RestoreReport::default()
        })
    );
    let after_first = harness.ledger_state().await;
    assert_eq!(after_first.usage.as_ref().unwrap().limit, 17);
    assert_eq!(after_first.owned_attractions.len(), 1);

    let second = harness.service.restore().await.unwrap();
    assert_eq!(
        second,
        RestoreOutcome::Restored(RestoreReport {
            duplicates: 3,
            ..RestoreReport::default()
        })
    );
    assert_eq!(harness.ledger_state().await, after_first);
    assert_eq!(harness.store.inner.purchase_count().await, 3);

    let snapshot = harness.service.entitlement_snapshot().await;
    assert!(snapshot.has_unlimited_access);
}

#[tokio::test]
async fn unreachable_provider_fails_restore() {
    let harness = TestHarness::connected().await;
    harness.provider.fail_list(true);

    let err = harness.service.restore().await.unwrap_err();
    assert!(matches!(err, ServiceError::StoreUnavailable(_)));
    assert!(err.is_user_facing());
}

#[tokio::test]
async fn unknown_and_pending_purchases_are_counted() {
    let harness = TestHarness::connected().await;
    harness
        .provider
        .add_purchase(event("guidepass.pack.5", "GPA.1", PurchaseState::Restored));
    harness.provider.add_purchase(event(
        "com.retired.product",
        "GPA.2",
        PurchaseState::Restored,
    ));
    harness
        .provider
        .add_purchase(event("guidepass.pack.40", "GPA.3", PurchaseState::Pending));

    let outcome = harness.service.restore().await.unwrap();
    let RestoreOutcome::Restored(report) = outcome else {
        panic!("expected a restore report, got {outcome:?}");
    };
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.pending, 1);
    assert_eq!(report.total(), 3);

    // Only the classified, settled purchase was acknowledged
    assert_eq!(harness.provider.acknowledged(), vec![(tx("GPA.1"), true)]);
    assert_eq!(harness.ledger_state().await.usage.unwrap().limit, 7);
}

#[tokio::test]
async fn renewal_replay_never_shortens_expiry() {
    let harness = TestHarness::connected().await;
    let now = Utc::now();
    let renewal = event_at(
        "guidepass.unlimited.monthly",
        "GPA.11",
        PurchaseState::Restored,
        now,
    );
    let original = event_at(
        "guidepass.unlimited.monthly",
        "GPA.10",
        PurchaseState::Restored,
        now - Duration::days(31),
    );

    // The provider lists the newer renewal first
    harness.provider.add_purchase(renewal);
    harness.service.restore().await.unwrap();
    let expiry = harness.service.entitlement_snapshot().await.subscription.expires_at;

    harness.provider.add_purchase(original);
    harness.service.restore().await.unwrap();
    let snapshot = harness.service.entitlement_snapshot().await;
    assert_eq!(snapshot.subscription.expires_at, expiry);
    assert_eq!(snapshot.subscription.transaction_id, Some(tx("GPA.11")));
}
