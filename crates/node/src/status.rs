//! Read-only status snapshot of the guard.

use serde::Serialize;

/// Point-in-time projection of the guard's state for external health checks.
///
/// `critical` is an empty string when the guard considers itself healthy;
/// otherwise it carries a single operator-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Last accepted report of the validator's presence in the active set.
    pub validator_online: bool,
    /// Summary transaction state: "unknown", "invalid" or "valid".
    pub transaction_status: String,
    /// Guard state machine position.
    pub guard_state: String,
    /// Highest block height observed via signature reports.
    pub current_height: i64,
    /// Number of configured watchers that have reported at least once.
    pub watchers_count: usize,
    /// Number of watchers currently in the watching state.
    pub watchers_watching: usize,
    /// Reason the guard is unhealthy, or empty.
    pub critical: String,
}

impl StatusSnapshot {
    /// Whether the snapshot reports a healthy guard.
    pub fn is_healthy(&self) -> bool {
        self.critical.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_all_fields() {
        let snap = StatusSnapshot {
            validator_online: true,
            transaction_status: "valid".to_string(),
            guard_state: "watching".to_string(),
            current_height: 42,
            watchers_count: 2,
            watchers_watching: 1,
            critical: String::new(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&snap).unwrap()).unwrap();
        assert_eq!(json["validator_online"], true);
        assert_eq!(json["transaction_status"], "valid");
        assert_eq!(json["current_height"], 42);
        assert_eq!(json["watchers_count"], 2);
        assert_eq!(json["watchers_watching"], 1);
        assert_eq!(json["critical"], "");
        assert!(snap.is_healthy());
    }
}
