use crate::types::{EventDetail, LogEvent, Severity};
use ::time::{format_description::well_known, OffsetDateTime};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const HISTORY: usize = 500;

/// Fan-out of structured log events to subscribers, plus a bounded history for pollers.
///
/// Every event is mirrored to `tracing` at the matching level.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<LogEvent>,
    history: Arc<Mutex<VecDeque<LogEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            tx,
            history: Arc::new(Mutex::new(VecDeque::with_capacity(HISTORY))),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.tx.subscribe()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(Severity::Info, message, None);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(Severity::Success, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(Severity::Error, message, None);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(Severity::Debug, message, None);
    }

    pub fn emit(&self, severity: Severity, message: impl Into<String>, detail: Option<EventDetail>) {
        let event = LogEvent {
            message: message.into(),
            severity,
            timestamp: now_iso_like(),
            detail,
        };
        match severity {
            Severity::Error => tracing::error!("{}", event.message),
            Severity::Debug => tracing::debug!("{}", event.message),
            Severity::Info | Severity::Success => tracing::info!("{}", event.message),
        }
        if let Ok(mut h) = self.history.lock() {
            if h.len() == HISTORY {
                h.pop_front();
            }
            h.push_back(event.clone());
        }
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Most recent events, oldest first.
    pub fn history(&self) -> Vec<LogEvent> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn now_iso_like() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
