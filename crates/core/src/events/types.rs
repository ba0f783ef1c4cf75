use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::TierAggregate;
use crate::step::FailureClass;

/// Domain events published for downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Run lifecycle
    RunStarted {
        run_id: String,
        client_id: String,
    },
    TierCompleted {
        run_id: String,
        tier_id: String,
        aggregate: TierAggregate,
    },
    RunCompleted {
        run_id: String,
        artifact_ref: String,
    },
    RunFailed {
        run_id: String,
        reason: String,
        class: FailureClass,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tier_id: Option<String>,
    },
    RunCancelled {
        run_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_recorded_tier: Option<String>,
    },
}

impl DomainEvent {
    /// Event type name as stored.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::ServiceStarted { .. } => "service_started",
            DomainEvent::ServiceStopped { .. } => "service_stopped",
            DomainEvent::RunStarted { .. } => "run_started",
            DomainEvent::TierCompleted { .. } => "tier_completed",
            DomainEvent::RunCompleted { .. } => "run_completed",
            DomainEvent::RunFailed { .. } => "run_failed",
            DomainEvent::RunCancelled { .. } => "run_cancelled",
        }
    }

    /// Run the event belongs to, if any.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            DomainEvent::ServiceStarted { .. } | DomainEvent::ServiceStopped { .. } => None,
            DomainEvent::RunStarted { run_id, .. }
            | DomainEvent::TierCompleted { run_id, .. }
            | DomainEvent::RunCompleted { run_id, .. }
            | DomainEvent::RunFailed { run_id, .. }
            | DomainEvent::RunCancelled { run_id, .. } => Some(run_id),
        }
    }
}

/// A stored event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub run_id: Option<String>,
    pub data: DomainEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::ItemFailure;

    #[test]
    fn test_event_type_service_started() {
        let event = DomainEvent::ServiceStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc123".to_string(),
        };
        assert_eq!(event.event_type(), "service_started");
        assert_eq!(event.run_id(), None);
    }

    #[test]
    fn test_event_type_tier_completed() {
        let event = DomainEvent::TierCompleted {
            run_id: "run-1".to_string(),
            tier_id: "tier1".to_string(),
            aggregate: TierAggregate::Success,
        };
        assert_eq!(event.event_type(), "tier_completed");
        assert_eq!(event.run_id(), Some("run-1"));
    }

    #[test]
    fn test_serialize_tier_completed_with_failures() {
        let event = DomainEvent::TierCompleted {
            run_id: "run-1".to_string(),
            tier_id: "tier2".to_string(),
            aggregate: TierAggregate::Failed {
                failures: vec![ItemFailure {
                    item_id: "k1".to_string(),
                    class: FailureClass::Permanent,
                }],
            },
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"tier_completed\""));
        assert!(json.contains("\"status\":\"failed\""));
        assert!(json.contains("\"class\":\"permanent\""));

        let parsed: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_serialize_run_failed_without_tier() {
        let event = DomainEvent::RunFailed {
            run_id: "run-1".to_string(),
            reason: "registration rejected".to_string(),
            class: FailureClass::Invalid,
            tier_id: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("tier_id"));
        assert_eq!(event.event_type(), "run_failed");
    }

    #[test]
    fn test_event_record_serialize() {
        let record = EventRecord {
            id: 1,
            timestamp: Utc::now(),
            event_type: "run_completed".to_string(),
            run_id: Some("run-1".to_string()),
            data: DomainEvent::RunCompleted {
                run_id: "run-1".to_string(),
                artifact_ref: "/out/c/run-1.json".to_string(),
            },
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"event_type\":\"run_completed\""));
    }
}
