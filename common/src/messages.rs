// User-visible message surface
// Per-role FIFO queues polled by the message feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Maximum number of pending messages kept per role
pub const DEFAULT_ROLE_CAPACITY: usize = 1000;

/// Severity channel a message is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Plugin,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "plugin" => Ok(Role::Plugin),
            other => Err(format!("unknown message role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub title: String,
    pub text: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// In-memory message queue, one FIFO per role
#[derive(Debug)]
pub struct MessageQueue {
    queues: Mutex<HashMap<Role, VecDeque<Message>>>,
    capacity: usize,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_ROLE_CAPACITY)
    }
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<Role, VecDeque<Message>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message; the oldest message of the role is dropped when full
    pub fn put(&self, title: impl Into<String>, text: impl Into<String>, role: Role) {
        let message = Message {
            id: Uuid::new_v4(),
            title: title.into(),
            text: text.into(),
            role,
            created_at: Utc::now(),
        };
        let mut queues = self.queues();
        let queue = queues.entry(role).or_default();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(message);
    }

    /// Take the oldest pending message for `role`
    pub fn get(&self, role: Role) -> Option<Message> {
        self.queues().get_mut(&role).and_then(VecDeque::pop_front)
    }

    pub fn len(&self, role: Role) -> usize {
        self.queues().get(&role).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, role: Role) -> bool {
        self.len(role) == 0
    }

    /// Copy of the pending messages for `role`, oldest first
    pub fn pending(&self, role: Role) -> Vec<Message> {
        self.queues()
            .get(&role)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.queues().clear();
    }
}
