//! Contract Test: Check Engine
//!
//! Constraints verified:
//! - Notification policy table for every mode
//! - Scheduled checks with an unchanged IP do not notify
//! - Manual checks always notify
//! - Test mode records nothing and sends nothing
//! - Resolver failure becomes a result field, never an error
//! - Transport failure is recorded, then propagated without retry
//!
//! If this test fails, check orchestration is broken.

mod common;

use common::*;
use ipnotify_core::{CheckEvent, CheckMode, Error, NotificationPolicy, Observation, UNAVAILABLE};
use tempfile::tempdir;

async fn seeded_store(dir: &std::path::Path, ip: &str) -> std::sync::Arc<ipnotify_core::HistoryStore> {
    let store = open_store(dir).await;
    store
        .record_ip_check(&Observation::new("192.168.1.100", ip), "scheduled", true, 0.1)
        .await
        .unwrap();
    store
}

#[test]
fn policy_table_is_exhaustive() {
    let table = [
        (CheckMode::Test, false, false),
        (CheckMode::Test, true, false),
        (CheckMode::Manual, false, true),
        (CheckMode::Manual, true, true),
        (CheckMode::Scheduled, false, false),
        (CheckMode::Scheduled, true, true),
    ];

    for (mode, changed, expected) in table {
        assert_eq!(
            NotificationPolicy::decide(mode, changed),
            expected,
            "decide({}, {})",
            mode,
            changed
        );
        assert_eq!(NotificationPolicy::decide_raw(mode.as_str(), changed), expected);
    }
}

#[tokio::test]
async fn scheduled_unchanged_does_not_notify() {
    let dir = tempdir().unwrap();
    let store = seeded_store(dir.path(), "1.2.3.4").await;
    let resolver = ScriptedResolver::fixed("1.2.3.4");
    let notifier = RecordingNotifier::new();
    let (engine, _events) = engine_with(store.clone(), &resolver, &notifier);

    let result = engine.perform_check(CheckMode::Scheduled).await.unwrap();

    assert!(!result.has_changed);
    assert!(!result.should_notify);
    assert_eq!(result.error, None);

    let data = store.snapshot().await;
    assert_eq!(data.metadata.total_checks, 2);
    assert_eq!(data.statistics.total_notifications_sent, 1);
    assert!(!data.history[1].notification_sent);
}

#[tokio::test]
async fn manual_unchanged_notifies() {
    let dir = tempdir().unwrap();
    let store = seeded_store(dir.path(), "1.2.3.4").await;
    let resolver = ScriptedResolver::fixed("1.2.3.4");
    let notifier = RecordingNotifier::new();
    let (engine, _events) = engine_with(store.clone(), &resolver, &notifier);

    let result = engine.perform_check(CheckMode::Manual).await.unwrap();

    assert!(!result.has_changed);
    assert!(result.should_notify);
    assert_eq!(store.snapshot().await.statistics.total_notifications_sent, 2);
    // perform_check records intent only; nothing is sent
    assert_eq!(notifier.send_call_count(), 0);
}

#[tokio::test]
async fn scheduled_change_is_delivered_and_recorded() {
    let dir = tempdir().unwrap();
    let store = seeded_store(dir.path(), "1.2.3.4").await;
    let resolver = ScriptedResolver::fixed("1.2.3.5");
    let notifier = RecordingNotifier::new();
    let (engine, mut events) = engine_with(store.clone(), &resolver, &notifier);

    let result = engine.run_check(CheckMode::Scheduled).await.unwrap();

    assert!(result.has_changed);
    assert!(result.should_notify);
    assert_eq!(notifier.sent_messages(), vec!["IP: 1.2.3.5".to_string()]);

    let record = store.snapshot().await.history.pop().unwrap();
    assert!(record.ip_changed);
    assert!(record.notification_sent);
    assert_eq!(record.previous_public_ip.as_deref(), Some("1.2.3.4"));

    let events = drain_events(&mut events);
    assert!(matches!(events.first(), Some(CheckEvent::CheckStarted { .. })));
    assert!(events.contains(&CheckEvent::IpChanged {
        previous: Some("1.2.3.4".to_string()),
        current: "1.2.3.5".to_string(),
    }));
    assert!(events.iter().any(|e| matches!(e, CheckEvent::NotificationSent { .. })));
    assert!(matches!(events.last(), Some(CheckEvent::CheckCompleted { .. })));
}

#[tokio::test]
async fn test_mode_records_and_sends_nothing() {
    let dir = tempdir().unwrap();
    let store = seeded_store(dir.path(), "1.2.3.4").await;
    let before = store.load().await.unwrap();
    let resolver = ScriptedResolver::fixed("1.2.3.5");
    let notifier = RecordingNotifier::new();
    let (engine, _events) = engine_with(store.clone(), &resolver, &notifier);

    let result = engine.run_check(CheckMode::Test).await.unwrap();

    assert!(result.has_changed);
    assert!(!result.should_notify);
    assert_eq!(notifier.send_call_count(), 0);
    assert_eq!(store.load().await.unwrap(), before);
}

#[tokio::test]
async fn total_resolver_failure_becomes_error_field() {
    let dir = tempdir().unwrap();
    let store = seeded_store(dir.path(), "1.2.3.4").await;
    let resolver = ScriptedResolver::offline();
    let notifier = RecordingNotifier::new();
    let (engine, _events) = engine_with(store.clone(), &resolver, &notifier);

    let result = engine.run_check(CheckMode::Manual).await.unwrap();

    assert_eq!(result.public_ip, UNAVAILABLE);
    assert_eq!(result.local_ip, UNAVAILABLE);
    assert!(!result.has_changed);
    assert!(!result.should_notify);
    assert!(result.error.as_deref().unwrap().contains("connection refused"));
    assert_eq!(notifier.send_call_count(), 0);

    // Recorded, and the last known IP survives
    let data = store.snapshot().await;
    assert_eq!(data.metadata.total_checks, 2);
    assert_eq!(data.current.public_ip.as_deref(), Some("1.2.3.4"));
}

#[tokio::test]
async fn partial_failure_is_a_warning() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let resolver = ScriptedResolver::scripted(vec![
        Observation::new(UNAVAILABLE, "1.2.3.4")
            .with_errors(vec!["local: no route".to_string()]),
    ]);
    let notifier = RecordingNotifier::new();
    let (engine, _events) = engine_with(store.clone(), &resolver, &notifier);

    let result = engine.perform_check(CheckMode::Scheduled).await.unwrap();

    assert!(result.has_changed);
    assert!(result.should_notify);
    assert_eq!(result.error, None);
    assert_eq!(result.warnings, vec!["local: no route".to_string()]);
    assert_eq!(store.snapshot().await.current.local_ip, None);
}

#[tokio::test]
async fn transport_failure_is_recorded_then_propagated() {
    let dir = tempdir().unwrap();
    let store = seeded_store(dir.path(), "1.2.3.4").await;
    let resolver = ScriptedResolver::fixed("1.2.3.5");
    let notifier = RecordingNotifier::failing();
    let (engine, mut events) = engine_with(store.clone(), &resolver, &notifier);

    let err = engine.run_check(CheckMode::Scheduled).await.unwrap_err();

    assert!(matches!(err, Error::Transport(_)));
    // The engine never retries on the transport's behalf
    assert_eq!(notifier.send_call_count(), 1);

    let data = store.snapshot().await;
    let record = data.history.last().unwrap();
    assert!(record.ip_changed);
    assert!(!record.notification_sent);
    assert!(record.notification_error.is_some());
    assert_eq!(data.statistics.total_notification_failures, 1);
    assert_eq!(data.current.public_ip.as_deref(), Some("1.2.3.5"));

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(e, CheckEvent::NotificationFailed { .. })));
}

#[tokio::test]
async fn repeated_checks_count_once_each() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let resolver = ScriptedResolver::scripted(vec![
        Observation::new("192.168.1.100", "1.2.3.4"),
        Observation::new("192.168.1.100", "1.2.3.4"),
        Observation::new("192.168.1.100", "1.2.3.6"),
    ]);
    let notifier = RecordingNotifier::new();
    let (engine, _events) = engine_with(store.clone(), &resolver, &notifier);

    let mut notified = Vec::new();
    for _ in 0..3 {
        notified.push(engine.run_check(CheckMode::Scheduled).await.unwrap().should_notify);
    }

    assert_eq!(notified, vec![true, false, true]);
    assert_eq!(resolver.resolve_call_count(), 3);
    assert_eq!(notifier.send_call_count(), 2);
    assert_eq!(store.snapshot().await.metadata.total_checks, 3);
}

#[tokio::test]
async fn full_event_channel_does_not_block_checks() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let resolver = ScriptedResolver::fixed("1.2.3.4");
    let notifier = RecordingNotifier::new();
    let (engine, _events) = ipnotify_core::CheckEngine::new(
        Box::new(ScriptedResolver::sharing_counters_with(&resolver)),
        store.clone(),
        Box::new(RecordingNotifier::sharing_counters_with(&notifier)),
        1,
    );

    for _ in 0..5 {
        engine.perform_check(CheckMode::Manual).await.unwrap();
    }

    assert_eq!(store.snapshot().await.metadata.total_checks, 5);
}
