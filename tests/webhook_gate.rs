//! Webhook ingestion gate: the ordered validation pipeline, replay
//! suppression, and the per-stage rejection counters.

mod common;

use common::{client, harness, Harness};

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use clientflow_engine::store::RuleStore;
use clientflow_engine::webhooks::replay::ReplayGuard;
use clientflow_engine::webhooks::{compute_signature, WebhookDelivery, WebhookGate};
use clientflow_engine::workflows::actions::{ActionStep, ActionType};
use clientflow_engine::workflows::{Rule, RuleDraft, TriggerType};
use clientflow_engine::{AuthFailure, Clock, EngineConfig, EngineError, GateMetrics, RunStatus};

const SECRET: &str = "whsec_test_0001";
const TOLERANCE_SECS: i64 = 300;
const REPLAY_WINDOW_SECS: i64 = 600;

struct GateHarness {
    h: Harness,
    gate: WebhookGate,
}

async fn gate_harness() -> GateHarness {
    let h = harness();
    let config = EngineConfig {
        webhook_tolerance_secs: TOLERANCE_SECS,
        replay_window_secs: REPLAY_WINDOW_SECS,
        ..Default::default()
    };
    let gate = WebhookGate::new(
        h.rules.clone(),
        h.domain.clone(),
        h.engine.clone(),
        ReplayGuard::local_only(1000, h.clock.clone()),
        Arc::new(GateMetrics::new()),
        h.clock.clone(),
        &config,
    );
    GateHarness { h, gate }
}

async fn webhook_rule(h: &Harness, secret: Option<&str>) -> Rule {
    h.rules
        .create(RuleDraft {
            name: "Inbound webhook".into(),
            trigger_type: TriggerType::Webhook,
            trigger_config: json!({}),
            conditions: vec![],
            actions: vec![ActionStep::new(
                ActionType::AddNote,
                json!({"body": "webhook arrived"}),
            )],
            webhook_secret: secret.map(str::to_owned),
            is_active: true,
        })
        .await
        .unwrap()
}

fn signed_delivery(gh: &GateHarness, body: &[u8]) -> WebhookDelivery {
    let timestamp = gh.h.clock.now().timestamp().to_string();
    let signature = compute_signature(SECRET, &timestamp, body);
    WebhookDelivery {
        signature: Some(signature),
        timestamp: Some(timestamp),
        body: body.to_vec(),
    }
}

#[tokio::test]
async fn valid_delivery_is_accepted_and_executed() {
    let gh = gate_harness().await;
    let rule = webhook_rule(&gh.h, Some(SECRET)).await;

    let ack = gh
        .gate
        .ingest(rule.id, signed_delivery(&gh, br#"{"kind":"ping"}"#))
        .await
        .unwrap();
    assert_eq!(ack.rule_id, rule.id);
    assert_eq!(ack.run.status, RunStatus::Completed);
    assert_eq!(gh.h.recorder.call_count(), 1);

    let snap = gh.gate.metrics().snapshot();
    assert_eq!(snap.accepted, 1);
    assert_eq!(snap.signature_verified, 1);
}

#[tokio::test]
async fn duplicate_delivery_is_rejected_by_the_replay_guard() {
    let gh = gate_harness().await;
    let rule = webhook_rule(&gh.h, Some(SECRET)).await;
    let delivery = signed_delivery(&gh, br#"{"kind":"ping"}"#);

    gh.gate.ingest(rule.id, delivery.clone()).await.unwrap();
    let err = gh.gate.ingest(rule.id, delivery).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Authentication(AuthFailure::Replayed)
    ));

    let snap = gh.gate.metrics().snapshot();
    assert_eq!(snap.accepted, 1);
    assert_eq!(snap.replay_rejected, 1);
    // Both deliveries carried a valid signature.
    assert_eq!(snap.signature_verified, 2);
    assert_eq!(gh.h.recorder.call_count(), 1);
}

#[tokio::test]
async fn stale_timestamp_is_rejected_before_signature_work() {
    let gh = gate_harness().await;
    let rule = webhook_rule(&gh.h, Some(SECRET)).await;

    let body = br#"{"kind":"old"}"#;
    let stale = (gh.h.clock.now() - chrono::Duration::seconds(TOLERANCE_SECS + 1))
        .timestamp()
        .to_string();
    let delivery = WebhookDelivery {
        signature: Some(compute_signature(SECRET, &stale, body)),
        timestamp: Some(stale),
        body: body.to_vec(),
    };

    let err = gh.gate.ingest(rule.id, delivery).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Authentication(AuthFailure::StaleTimestamp { .. })
    ));

    let snap = gh.gate.metrics().snapshot();
    assert_eq!(snap.timestamp_stale, 1);
    // The signature was never even checked.
    assert_eq!(snap.signature_verified, 0);
    assert_eq!(snap.signature_rejected, 0);
}

#[tokio::test]
async fn sub_second_skew_beyond_tolerance_is_rejected() {
    let gh = gate_harness().await;
    let rule = webhook_rule(&gh.h, Some(SECRET)).await;

    // Half a second past the window, expressed in milliseconds so the
    // skew is invisible to whole-second comparison.
    let body = br#"{"kind":"late"}"#;
    let stale = (gh.h.clock.now()
        - chrono::Duration::milliseconds(TOLERANCE_SECS * 1000 + 500))
    .timestamp_millis()
    .to_string();
    let delivery = WebhookDelivery {
        signature: Some(compute_signature(SECRET, &stale, body)),
        timestamp: Some(stale),
        body: body.to_vec(),
    };

    let err = gh.gate.ingest(rule.id, delivery).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Authentication(AuthFailure::StaleTimestamp { .. })
    ));
    assert_eq!(gh.gate.metrics().snapshot().signature_verified, 0);
}

#[tokio::test]
async fn skew_exactly_at_tolerance_is_accepted() {
    let gh = gate_harness().await;
    let rule = webhook_rule(&gh.h, Some(SECRET)).await;

    let body = br#"{"kind":"edge"}"#;
    let edge = (gh.h.clock.now() - chrono::Duration::seconds(TOLERANCE_SECS))
        .timestamp()
        .to_string();
    let delivery = WebhookDelivery {
        signature: Some(compute_signature(SECRET, &edge, body)),
        timestamp: Some(edge),
        body: body.to_vec(),
    };

    let ack = gh.gate.ingest(rule.id, delivery).await.unwrap();
    assert_eq!(ack.run.status, RunStatus::Completed);
}

#[tokio::test]
async fn wrong_signature_is_rejected() {
    let gh = gate_harness().await;
    let rule = webhook_rule(&gh.h, Some(SECRET)).await;

    let mut delivery = signed_delivery(&gh, br#"{"kind":"ping"}"#);
    delivery.signature = Some(compute_signature(
        "whsec_other",
        delivery.timestamp.as_deref().unwrap(),
        &delivery.body,
    ));

    let err = gh.gate.ingest(rule.id, delivery).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Authentication(AuthFailure::BadSignature)
    ));
    assert_eq!(gh.gate.metrics().snapshot().signature_rejected, 1);
    assert_eq!(gh.h.recorder.call_count(), 0);
}

#[tokio::test]
async fn missing_headers_and_bad_timestamp_are_distinct_stages() {
    let gh = gate_harness().await;
    let rule = webhook_rule(&gh.h, Some(SECRET)).await;

    let err = gh
        .gate
        .ingest(
            rule.id,
            WebhookDelivery {
                signature: None,
                timestamp: None,
                body: vec![],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Authentication(AuthFailure::MissingHeaders)
    ));

    let err = gh
        .gate
        .ingest(
            rule.id,
            WebhookDelivery {
                signature: Some("deadbeef".into()),
                timestamp: Some("yesterday-ish".into()),
                body: vec![],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Authentication(AuthFailure::BadTimestamp(_))
    ));

    let snap = gh.gate.metrics().snapshot();
    assert_eq!(snap.headers_missing, 1);
    assert_eq!(snap.timestamp_invalid, 1);
}

#[tokio::test]
async fn rule_without_secret_is_a_server_side_misconfiguration() {
    let gh = gate_harness().await;
    let rule = webhook_rule(&gh.h, None).await;

    let err = gh
        .gate
        .ingest(rule.id, signed_delivery(&gh, b"{}"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Misconfigured(_)));
    assert_eq!(gh.gate.metrics().snapshot().secret_missing, 1);
}

#[tokio::test]
async fn non_webhook_rule_is_rejected_up_front() {
    let gh = gate_harness().await;
    let rule = gh
        .h
        .rules
        .create(RuleDraft {
            name: "Not a webhook rule".into(),
            trigger_type: TriggerType::ClientCreated,
            trigger_config: json!({}),
            conditions: vec![],
            actions: vec![ActionStep::new(ActionType::AddNote, json!({"body": "x"}))],
            webhook_secret: Some(SECRET.into()),
            is_active: true,
        })
        .await
        .unwrap();

    let err = gh
        .gate
        .ingest(rule.id, signed_delivery(&gh, b"{}"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Inactive(_)));
    assert_eq!(gh.gate.metrics().snapshot().rule_rejected, 1);

    let err = gh
        .gate
        .ingest(Uuid::new_v4(), signed_delivery(&gh, b"{}"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert_eq!(gh.gate.metrics().snapshot().rule_rejected, 2);
}

#[tokio::test]
async fn declared_subject_must_exist() {
    let gh = gate_harness().await;
    let rule = webhook_rule(&gh.h, Some(SECRET)).await;

    let ghost = Uuid::new_v4();
    let body = serde_json::to_vec(&json!({"client_id": ghost.to_string()})).unwrap();
    let err = gh
        .gate
        .ingest(rule.id, signed_delivery(&gh, &body))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert_eq!(gh.gate.metrics().snapshot().subject_unknown, 1);

    // A known subject passes and reaches the rule.
    let known = client("ACTIVE");
    gh.h.domain.put_client(known.clone()).await;
    let body = serde_json::to_vec(&json!({"client_id": known.id.to_string()})).unwrap();
    let ack = gh
        .gate
        .ingest(rule.id, signed_delivery(&gh, &body))
        .await
        .unwrap();
    assert_eq!(ack.run.status, RunStatus::Completed);
}

#[tokio::test]
async fn replay_suppression_expires_with_the_window() {
    let gh = gate_harness().await;
    let rule = webhook_rule(&gh.h, Some(SECRET)).await;
    let delivery = signed_delivery(&gh, br#"{"kind":"ping"}"#);

    gh.gate.ingest(rule.id, delivery.clone()).await.unwrap();

    // Past the replay window the key has expired, but by then the
    // timestamp is stale, so the delivery still cannot be replayed.
    gh.h.clock
        .advance(chrono::Duration::seconds(REPLAY_WINDOW_SECS + 1));
    let err = gh.gate.ingest(rule.id, delivery).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Authentication(AuthFailure::StaleTimestamp { .. })
    ));
}
