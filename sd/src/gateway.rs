//! Gateway seam
//!
//! The session client that delivers inbound invocations and owns the
//! externally visible status lives outside this crate. Workers only see it
//! through the [`Gateway`] trait. [`LogGateway`] is the stand-in used by the
//! daemon binary and by tests: it logs every call and keeps a short history.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Maximum status changes remembered by [`LogGateway`]
const STATUS_HISTORY: usize = 64;

/// Presence shown next to the status text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Idle,
    #[default]
    Dnd,
    Invisible,
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Presence::Online => "online",
            Presence::Idle => "idle",
            Presence::Dnd => "dnd",
            Presence::Invisible => "invisible",
        };
        f.write_str(s)
    }
}

/// An inbound request for a handler, as delivered by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Handler identifier or alias
    pub name: String,
    pub args: Vec<String>,
    pub channel: String,
    pub author: String,
}

impl Invocation {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
            channel: String::new(),
            author: String::new(),
        }
    }
}

/// Outbound calls a worker makes on the session client
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Replace the visible status
    fn set_status(&self, presence: Presence, text: &str);

    /// Answer an invocation
    async fn reply(&self, invocation: &Invocation, content: &str) -> Result<()>;
}

/// Gateway that logs instead of talking to a remote session
#[derive(Debug)]
pub struct LogGateway {
    label: String,
    statuses: Mutex<VecDeque<(Presence, String)>>,
    replies: Mutex<Vec<(String, String)>>,
}

impl LogGateway {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            statuses: Mutex::new(VecDeque::new()),
            replies: Mutex::new(Vec::new()),
        }
    }

    /// Most recent status text, if any was set
    pub fn current_status(&self) -> Option<String> {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .map(|(_, text)| text.clone())
    }

    /// Status texts in the order they were set (bounded)
    pub fn status_history(&self) -> Vec<String> {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Replies sent so far as (handler name, content)
    pub fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Gateway for LogGateway {
    fn set_status(&self, presence: Presence, text: &str) {
        info!(gateway = %self.label, %presence, status = %text, "Status updated");
        let mut statuses = self.statuses.lock().unwrap_or_else(PoisonError::into_inner);
        if statuses.len() == STATUS_HISTORY {
            statuses.pop_front();
        }
        statuses.push_back((presence, text.to_string()));
    }

    async fn reply(&self, invocation: &Invocation, content: &str) -> Result<()> {
        debug!(gateway = %self.label, name = %invocation.name, "LogGateway::reply: called");
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((invocation.name.clone(), content.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_serde_lowercase() {
        let json = serde_json::to_string(&Presence::Dnd).unwrap();
        assert_eq!(json, r#""dnd""#);
        let parsed: Presence = serde_json::from_str(r#""idle""#).unwrap();
        assert_eq!(parsed, Presence::Idle);
    }

    #[test]
    fn test_log_gateway_history_is_bounded() {
        let gateway = LogGateway::new("test");
        for i in 0..(STATUS_HISTORY + 5) {
            gateway.set_status(Presence::Dnd, &format!("status {i}"));
        }
        let history = gateway.status_history();
        assert_eq!(history.len(), STATUS_HISTORY);
        assert_eq!(gateway.current_status().unwrap(), format!("status {}", STATUS_HISTORY + 4));
    }

    #[tokio::test]
    async fn test_log_gateway_records_replies() {
        let gateway = LogGateway::new("test");
        let inv = Invocation::new("ping", vec![]);
        gateway.reply(&inv, "pong").await.unwrap();
        assert_eq!(gateway.replies(), vec![("ping".to_string(), "pong".to_string())]);
    }
}
