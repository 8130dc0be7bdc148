//! Scripted conformance sequence

use super::outcome::Outcome;
use crate::common::HarnessConfig;
use crate::protocol::Status;
use std::time::Duration;

/// One client run and what it must report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: &'static str,
    /// Wait before starting the client
    pub delay: Duration,
    pub command: String,
    pub expect_status: Status,
    pub expect_value: Option<String>,
}

impl Step {
    fn new(name: &'static str, command: String, expect_status: Status) -> Self {
        Self {
            name,
            delay: Duration::ZERO,
            command,
            expect_status,
            expect_value: None,
        }
    }

    fn after(mut self, secs: u64) -> Self {
        self.delay = Duration::from_secs(secs);
        self
    }

    fn value(mut self, value: &str) -> Self {
        self.expect_value = Some(value.to_string());
        self
    }

    pub fn check(&self, outcome: &Outcome) -> bool {
        if outcome.status != Some(self.expect_status.code()) {
            return false;
        }
        match &self.expect_value {
            Some(expected) => outcome.value.as_deref() == Some(expected.as_str()),
            None => true,
        }
    }
}

/// The full state-transition sequence for one key, including TTL windows.
pub fn conformance_script(key: &str, value: &str, timing: &HarnessConfig) -> Vec<Step> {
    let ttl = timing.ttl_secs;
    vec![
        Step::new("get key from empty KV", format!("get {}", key), Status::NoSuchKey),
        Step::new("set key", format!("set {} {}", key, value), Status::Ok),
        Step::new("verify key", format!("get {}", key), Status::Ok).value(value),
        Step::new("delete key", format!("delete {}", key), Status::Ok),
        Step::new("get deleted key", format!("get {}", key), Status::NoSuchKey),
        Step::new(
            "set key with ttl",
            format!("set {} {} EX {}", key, value, ttl),
            Status::Ok,
        ),
        Step::new("verify key before expiry", format!("get {}", key), Status::Ok)
            .after(timing.pre_expiry_check_secs)
            .value(value),
        Step::new("get key after expiry", format!("get {}", key), Status::NoSuchKey)
            .after(timing.post_expiry_check_secs),
        Step::new("set key without ttl", format!("set {} {}", key, value), Status::Ok),
        Step::new("verify key survives", format!("get {}", key), Status::Ok)
            .after(timing.long_wait_secs)
            .value(value),
        Step::new(
            "expire key",
            format!("expire {} {}", key, ttl),
            Status::Ok,
        ),
        Step::new("get key after expire", format!("get {}", key), Status::NoSuchKey)
            .after(timing.long_wait_secs),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_shape() {
        let script = conformance_script("123", "456", &HarnessConfig::default());
        assert_eq!(script.len(), 12);

        let expected: Vec<u16> = script.iter().map(|s| s.expect_status.code()).collect();
        assert_eq!(
            expected,
            vec![262, 0, 0, 0, 262, 0, 0, 262, 0, 0, 0, 262]
        );
        assert_eq!(script[5].command, "set 123 456 EX 5");
        assert_eq!(script[10].command, "expire 123 5");
    }

    #[test]
    fn test_ttl_windows_keep_margins() {
        let timing = HarnessConfig::default();
        let script = conformance_script("123", "456", &timing);

        // hit check lands inside the TTL, miss check well after it
        let hit_at = script[6].delay.as_secs();
        let miss_at = hit_at + script[7].delay.as_secs();
        assert!(hit_at + 1 < timing.ttl_secs);
        assert!(miss_at > timing.ttl_secs + 1);
        assert!(script[11].delay.as_secs() > timing.ttl_secs + 1);
    }

    #[test]
    fn test_check() {
        let step = Step::new("verify", "get 1".into(), Status::Ok).value("456");
        assert!(step.check(&Outcome {
            status: Some(0),
            value: Some("456".into())
        }));
        assert!(!step.check(&Outcome {
            status: Some(0),
            value: Some("457".into())
        }));
        assert!(!step.check(&Outcome {
            status: None,
            value: Some("456".into())
        }));
    }
}
