//! Scan-session push hub.
//!
//! While a timesheet's QR code is on screen, the requesting client holds one
//! subscription keyed by the scan token. A session ends with exactly one
//! terminal outcome; the hub entry is dropped when it is published, so a
//! token can never deliver twice.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Success,
    Failure,
}

/// The single terminal message a scan subscription delivers.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub status: ScanStatus,
    pub timesheet_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ScanOutcome {
    pub fn success(timesheet_id: Uuid) -> Self {
        Self {
            status: ScanStatus::Success,
            timesheet_id,
            reason: None,
        }
    }

    pub fn failure(timesheet_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            status: ScanStatus::Failure,
            timesheet_id,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct ScanHub {
    sessions: Mutex<HashMap<String, broadcast::Sender<ScanOutcome>>>,
}

impl ScanHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the session for `token`, opening it if this is the
    /// first subscriber. Repeat calls share the one session per token.
    pub fn subscribe(&self, token: &str) -> broadcast::Receiver<ScanOutcome> {
        let mut sessions = self.sessions.lock().expect("scan hub lock poisoned");
        sessions
            .entry(token.to_string())
            .or_insert_with(|| broadcast::channel(4).0)
            .subscribe()
    }

    /// Publish the terminal outcome and close the session. Returns how many
    /// subscribers were listening; the caller does not care about misses
    /// because the persisted status answers late subscribers.
    pub fn publish(&self, token: &str, outcome: ScanOutcome) -> usize {
        let sender = {
            let mut sessions = self.sessions.lock().expect("scan hub lock poisoned");
            sessions.remove(token)
        };
        match sender {
            Some(sender) => sender.send(outcome).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop a session without an outcome (requester cancelled or went away).
    pub fn close(&self, token: &str) {
        let mut sessions = self.sessions.lock().expect("scan hub lock poisoned");
        sessions.remove(token);
    }

    pub fn is_open(&self, token: &str) -> bool {
        let sessions = self.sessions.lock().expect("scan hub lock poisoned");
        sessions.contains_key(token)
    }
}
