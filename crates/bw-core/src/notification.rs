//! Operator notifications
//!
//! In-memory sink for messages meant for the person operating the engine:
//! aborted executions, failed reloads and output of debug blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::RwLock;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

/// Default number of notifications kept before the oldest are dropped
pub const DEFAULT_CAPACITY: usize = 200;

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// A single operator notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Unique notification ID
    pub id: String,
    /// Severity
    pub level: NotificationLevel,
    /// Tab the notification relates to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,
    /// Human readable message
    pub message: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Bounded, thread-safe notification store
#[derive(Debug)]
pub struct Notifications {
    entries: RwLock<VecDeque<Notification>>,
    capacity: usize,
}

impl Default for Notifications {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifications {
    /// Create a store with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a store keeping at most `capacity` notifications
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Record an informational message
    pub fn info(&self, tab: Option<&str>, message: impl Into<String>) -> Notification {
        self.push(NotificationLevel::Info, tab, message.into())
    }

    /// Record a warning
    pub fn warn(&self, tab: Option<&str>, message: impl Into<String>) -> Notification {
        self.push(NotificationLevel::Warning, tab, message.into())
    }

    /// Record an error
    pub fn error(&self, tab: Option<&str>, message: impl Into<String>) -> Notification {
        self.push(NotificationLevel::Error, tab, message.into())
    }

    fn push(&self, level: NotificationLevel, tab: Option<&str>, message: String) -> Notification {
        let notification = Notification {
            id: Ulid::new().to_string(),
            level,
            tab: tab.map(str::to_string),
            message,
            created_at: Utc::now(),
        };

        match level {
            NotificationLevel::Info => info!(tab = ?tab, "{}", notification.message),
            NotificationLevel::Warning => warn!(tab = ?tab, "{}", notification.message),
            NotificationLevel::Error => error!(tab = ?tab, "{}", notification.message),
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(notification.clone());
        notification
    }

    /// All notifications, oldest first
    pub fn list(&self) -> Vec<Notification> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    /// Notifications of one severity, oldest first
    pub fn with_level(&self, level: NotificationLevel) -> Vec<Notification> {
        self.list()
            .into_iter()
            .filter(|n| n.level == level)
            .collect()
    }

    /// Dismiss a notification by id
    pub fn dismiss(&self, id: &str) -> Option<Notification> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let position = entries.iter().position(|n| n.id == id)?;
        debug!("Dismissed notification: {}", id);
        entries.remove(position)
    }

    /// Remove every notification
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Number of stored notifications
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no notification is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
