//! Scheduler job-lifecycle event as received from the broker.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Exit code recorded when no valid `(return value N)` clause was found.
///
/// Kept distinct from `0` so that a successful job is never confused with a
/// job whose exit code is unknown.
pub const EXIT_CODE_NOT_SET: i32 = -9000;

/// Event number of a job terminating (normally or not).
pub const JOB_TERMINATED: &str = "005";

/// Event number of a job being aborted.
pub const JOB_ABORTED: &str = "009";

/// One parsed unit of scheduler activity.
///
/// Built from the JSON body of a broker message (which carries at least the
/// raw text and its content hash), then filled in by [`Event::parse`] and
/// enriched with correlation fields by the dispatch loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    /// Raw scheduler log text.
    #[serde(rename = "Event", alias = "event")]
    pub event: String,
    /// Content hash of the raw text; the dedup key.
    #[serde(rename = "Hash", alias = "hash")]
    pub hash: String,
    #[serde(rename = "EventNumber")]
    pub event_number: String,
    /// Scheduler-assigned `(cluster.proc.subproc)` identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// Cluster component of `id` without leading zeros.
    #[serde(rename = "CondorID")]
    pub condor_id: String,
    #[serde(rename = "AppID")]
    pub app_id: String,
    #[serde(rename = "InvocationID")]
    pub invocation_id: String,
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "EventName")]
    pub event_name: String,
    #[serde(rename = "ExitCode")]
    pub exit_code: i32,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Msg")]
    pub msg: String,
}

impl Event {
    /// Decode the JSON body of a broker message.
    ///
    /// Unknown keys are ignored and missing keys take their default.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Whether the event denotes a failed job.
    ///
    /// Error-in-executable, eviction, shadow exception, abort, suspension,
    /// hold and lost-connection events are failures by nature. A termination
    /// is a failure when its exit code is anything but `0`, which includes
    /// [`EXIT_CODE_NOT_SET`]. An unparsed event has no event number and is
    /// never a failure.
    pub fn is_failure(&self) -> bool {
        match self.event_number.as_str() {
            "002" | "004" | "007" | JOB_ABORTED | "010" | "012" | "022" => true,
            JOB_TERMINATED => self.exit_code != 0,
            _ => false,
        }
    }

    /// Whether the event ends the job run (terminated or aborted).
    pub fn is_terminal(&self) -> bool {
        matches!(self.event_number.as_str(), JOB_TERMINATED | JOB_ABORTED)
    }

    /// Whether the exit code came from a parsed `(return value N)` clause.
    pub fn has_exit_code(&self) -> bool {
        self.event_number == JOB_TERMINATED && self.exit_code != EXIT_CODE_NOT_SET
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventNumber: {}\tID: {}\tCondorID: {}\tDate: {}\tTime: {}\tSHA256: {}\tMsg: {}",
            self.event_number, self.id, self.condor_id, self.date, self.time, self.hash, self.msg
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(number: &str, exit_code: i32) -> Event {
        Event {
            event_number: number.to_string(),
            exit_code,
            ..Event::default()
        }
    }

    #[test]
    fn decodes_pascal_case_body_and_ignores_unknown_keys() {
        let body = br#"{"Event":"000 (1.0.0) 10/21 12:00:00 Job submitted\n","Hash":"abc","Extra":42}"#;
        let event = Event::from_json(body).unwrap();

        assert_eq!(event.event, "000 (1.0.0) 10/21 12:00:00 Job submitted\n");
        assert_eq!(event.hash, "abc");
        assert_eq!(event.exit_code, 0);
        assert!(event.event_number.is_empty());
    }

    #[test]
    fn decodes_lowercase_aliases() {
        let event = Event::from_json(br#"{"event":"x","hash":"h"}"#).unwrap();
        assert_eq!(event.event, "x");
        assert_eq!(event.hash, "h");
    }

    #[test]
    fn rejects_non_json_body() {
        assert!(Event::from_json(b"not json").is_err());
    }

    #[test]
    fn serializes_with_wire_names() {
        let event = Event {
            condor_id: "12".to_string(),
            invocation_id: "inv".to_string(),
            ..Event::default()
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["CondorID"], "12");
        assert_eq!(json["InvocationID"], "inv");
        assert_eq!(json["ExitCode"], 0);
    }

    #[test]
    fn inherently_abnormal_events_are_failures() {
        for number in ["002", "004", "007", "009", "010", "012", "022"] {
            assert!(numbered(number, 0).is_failure(), "{number} should be a failure");
        }
    }

    #[test]
    fn termination_failure_depends_on_exit_code() {
        assert!(!numbered(JOB_TERMINATED, 0).is_failure());
        assert!(numbered(JOB_TERMINATED, 1).is_failure());
        assert!(numbered(JOB_TERMINATED, EXIT_CODE_NOT_SET).is_failure());
    }

    #[test]
    fn routine_and_unparsed_events_are_not_failures() {
        assert!(!numbered("000", 0).is_failure());
        assert!(!numbered("001", 3).is_failure());
        assert!(!Event::default().is_failure());
    }

    #[test]
    fn sentinel_is_not_a_recorded_exit_code() {
        assert!(numbered(JOB_TERMINATED, 0).has_exit_code());
        assert!(!numbered(JOB_TERMINATED, EXIT_CODE_NOT_SET).has_exit_code());
        assert!(!numbered(JOB_ABORTED, 0).has_exit_code());
    }

    #[test]
    fn summary_lists_parsed_fields() {
        let event = Event {
            event_number: "001".to_string(),
            id: "(7.0.0)".to_string(),
            condor_id: "7".to_string(),
            hash: "deadbeef".to_string(),
            ..Event::default()
        };
        let summary = event.to_string();
        assert!(summary.starts_with("EventNumber: 001\tID: (7.0.0)\tCondorID: 7"));
        assert!(summary.contains("SHA256: deadbeef"));
    }
}
