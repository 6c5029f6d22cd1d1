//! Task records exchanged with the queue service.
//!
//! - `SendTask`: producer → queue（batch で送る）
//! - `Task`: queue → consumer
//! - `ListenRequest` / `ListenReply`: streaming 接続上のメッセージ

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outbound task: a serialized invocation plus an optional earliest run time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendTask {
    pub payload: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_eta: Option<DateTime<Utc>>,
}

impl SendTask {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            min_eta: None,
        }
    }

    /// Ask the queue not to deliver this task before `eta`.
    pub fn with_min_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.min_eta = Some(eta);
        self
    }
}

/// Inbound task as delivered by the queue. Read-only to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub code: String,
    pub payload: Vec<u8>,
    pub created: DateTime<Utc>,
    pub retry_count: u32,
    pub project: String,
    pub queue_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_eta: Option<DateTime<Utc>>,
}

/// Subscription handshake for the streaming transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenInitial {
    pub project: String,
    pub queue_name: String,
}

/// Per-task acknowledgment (streaming transport only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub code: String,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenRequest {
    Initial(ListenInitial),
    Ack(Ack),
}

impl ListenRequest {
    pub fn initial(project: impl Into<String>, queue_name: impl Into<String>) -> Self {
        ListenRequest::Initial(ListenInitial {
            project: project.into(),
            queue_name: queue_name.into(),
        })
    }

    pub fn ack(code: impl Into<String>, success: bool) -> Self {
        ListenRequest::Ack(Ack {
            code: code.into(),
            success,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenReply {
    pub task: Task,
}
