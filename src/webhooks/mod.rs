//! Webhook ingestion gate: HMAC authentication, freshness, replay
//! suppression, and handoff to the automation engine.
//!
//! The validation pipeline is strictly ordered and fail-fast. Freshness is
//! checked before the signature so attackers replaying old captures cannot
//! burn CPU on HMAC work, and the replay guard only ever sees deliveries
//! that already carried a valid signature.

pub mod replay;

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{AuthFailure, EngineError, EngineResult};
use crate::metrics::{bump, GateMetrics};
use crate::store::{DomainStore, RuleStore};
use crate::workflows::engine::AutomationEngine;
use crate::workflows::executor::RunSummary;
use crate::workflows::triggers::{TriggerEvent, TriggerType};
use chrono::{DateTime, Duration, Utc};
use replay::ReplayGuard;

type HmacSha256 = Hmac<Sha256>;

/// Raw inbound delivery as the HTTP layer hands it over. Header values are
/// optional because their absence is itself a rejection stage.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub signature: Option<String>,
    pub timestamp: Option<String>,
    pub body: Vec<u8>,
}

/// Acknowledgement returned for an accepted delivery.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub rule_id: Uuid,
    pub event_id: Uuid,
    pub received_at: DateTime<Utc>,
    pub run: RunSummary,
}

pub struct WebhookGate {
    rules: Arc<dyn RuleStore>,
    domain: Arc<dyn DomainStore>,
    engine: Arc<AutomationEngine>,
    replay: ReplayGuard,
    metrics: Arc<GateMetrics>,
    clock: Arc<dyn Clock>,
    tolerance_secs: i64,
    replay_window_secs: i64,
}

impl WebhookGate {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        domain: Arc<dyn DomainStore>,
        engine: Arc<AutomationEngine>,
        replay: ReplayGuard,
        metrics: Arc<GateMetrics>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            rules,
            domain,
            engine,
            replay,
            metrics,
            clock,
            tolerance_secs: config.webhook_tolerance_secs,
            replay_window_secs: config.replay_window_secs,
        }
    }

    /// Validate and execute one inbound delivery addressed to a rule.
    pub async fn ingest(
        &self,
        rule_id: Uuid,
        delivery: WebhookDelivery,
    ) -> EngineResult<WebhookAck> {
        // Stage 1: the rule must exist, be active, and be webhook-triggered.
        let rule = match self.rules.get(rule_id).await? {
            Some(rule) if rule.is_active && rule.trigger_type == TriggerType::Webhook => rule,
            Some(rule) => {
                bump(&self.metrics.rule_rejected);
                return Err(if rule.is_active {
                    EngineError::Inactive(format!("rule '{}' is not webhook-triggered", rule.name))
                } else {
                    EngineError::Inactive(format!("rule '{}' is disabled", rule.name))
                });
            }
            None => {
                bump(&self.metrics.rule_rejected);
                return Err(EngineError::NotFound(format!("rule {rule_id}")));
            }
        };

        // Stage 2: a webhook rule without a secret is a server-side
        // misconfiguration, not a caller error.
        let Some(secret) = rule.webhook_secret.as_deref() else {
            bump(&self.metrics.secret_missing);
            return Err(EngineError::Misconfigured(format!(
                "rule '{}' has no webhook secret",
                rule.name
            )));
        };

        // Stage 3: both auth headers must be present.
        let (Some(signature), Some(timestamp_raw)) =
            (delivery.signature.as_deref(), delivery.timestamp.as_deref())
        else {
            bump(&self.metrics.headers_missing);
            return Err(AuthFailure::MissingHeaders.into());
        };

        // Stage 4: parse the timestamp.
        let delivered_at = match parse_timestamp(timestamp_raw) {
            Some(ts) => ts,
            None => {
                bump(&self.metrics.timestamp_invalid);
                return Err(AuthFailure::BadTimestamp(timestamp_raw.to_string()).into());
            }
        };

        // Stage 5: freshness, before any signature work. Compared as a
        // full duration: millisecond and RFC 3339 timestamps carry
        // sub-second skew that integer seconds would truncate away.
        let skew = (self.clock.now() - delivered_at).abs();
        if skew > Duration::seconds(self.tolerance_secs) {
            bump(&self.metrics.timestamp_stale);
            return Err(AuthFailure::StaleTimestamp {
                skew_secs: skew.num_seconds(),
                tolerance_secs: self.tolerance_secs,
            }
            .into());
        }

        // Stage 6: constant-time HMAC verification over timestamp + body.
        if !verify_signature(secret, timestamp_raw, &delivery.body, signature) {
            bump(&self.metrics.signature_rejected);
            return Err(AuthFailure::BadSignature.into());
        }
        bump(&self.metrics.signature_verified);

        // Stage 7: replay suppression, keyed so the same signed delivery
        // cannot be accepted twice within the window.
        let replay_key = format!("replay:{rule_id}:{signature}:{timestamp_raw}");
        if !self.replay.first_seen(&replay_key, self.replay_window_secs).await {
            bump(&self.metrics.replay_rejected);
            return Err(AuthFailure::Replayed.into());
        }

        // Stage 8: parse the payload; a declared subject must exist.
        let payload: serde_json::Value = if delivery.body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&delivery.body)?
        };
        let subject_id = payload
            .get("client_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        if let Some(id) = subject_id {
            if !self.domain.client_exists(id).await? {
                bump(&self.metrics.subject_unknown);
                return Err(EngineError::NotFound(format!("client {id}")));
            }
        }

        // Stage 9: hand off to the engine, targeted at this rule.
        let mut event = TriggerEvent::webhook(rule_id, payload);
        if let Some(id) = subject_id {
            event = event.with_subject(id);
        }
        debug!(%rule_id, event = %event.event_id, "webhook delivery authenticated");
        let run = self.engine.fire_rule(rule_id, &event).await?;

        bump(&self.metrics.accepted);
        info!(%rule_id, event = %event.event_id, "webhook delivery accepted");
        Ok(WebhookAck {
            rule_id,
            event_id: event.event_id,
            received_at: self.clock.now(),
            run,
        })
    }

    pub fn metrics(&self) -> &GateMetrics {
        &self.metrics
    }
}

/// Accepts unix seconds, unix milliseconds (distinguished by magnitude),
/// or an RFC 3339 string.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(numeric) = raw.parse::<i64>() {
        return if numeric > 1_000_000_000_000 {
            DateTime::<Utc>::from_timestamp_millis(numeric)
        } else {
            DateTime::<Utc>::from_timestamp(numeric, 0)
        };
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Hex HMAC-SHA256 over `"{timestamp}.{body}"`, the signing convention
/// published to webhook senders.
pub fn compute_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison via the MAC itself. An optional `sha256=`
/// prefix on the presented signature is tolerated.
fn verify_signature(secret: &str, timestamp: &str, body: &[u8], presented: &str) -> bool {
    let presented = presented.strip_prefix("sha256=").unwrap_or(presented);
    let Ok(expected) = hex::decode(presented) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trips_and_tolerates_prefix() {
        let sig = compute_signature("topsecret", "1767260400", b"{\"x\":1}");
        assert!(verify_signature("topsecret", "1767260400", b"{\"x\":1}", &sig));
        assert!(verify_signature(
            "topsecret",
            "1767260400",
            b"{\"x\":1}",
            &format!("sha256={sig}")
        ));
        assert!(!verify_signature("othersecret", "1767260400", b"{\"x\":1}", &sig));
        assert!(!verify_signature("topsecret", "1767260401", b"{\"x\":1}", &sig));
    }

    #[test]
    fn timestamp_parser_handles_all_three_shapes() {
        let secs = parse_timestamp("1767260400").unwrap();
        let millis = parse_timestamp("1767260400000").unwrap();
        assert_eq!(secs, millis);
        let rfc = parse_timestamp("2026-01-01T09:40:00Z").unwrap();
        assert_eq!(rfc, secs);
        assert!(parse_timestamp("not-a-time").is_none());
    }

    #[test]
    fn garbage_hex_signature_is_rejected_not_panicked() {
        assert!(!verify_signature("s", "0", b"", "zzzz"));
    }
}
