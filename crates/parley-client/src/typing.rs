use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use parley_shared::types::UserId;

/// Remote users currently typing in the active channel.
#[derive(Debug)]
pub struct TypingSet {
    timeout: Duration,
    expires_at: HashMap<UserId, Instant>,
}

impl TypingSet {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            expires_at: HashMap::new(),
        }
    }

    /// Insert or refresh a user. Returns true if they were not typing before.
    pub fn start(&mut self, user: UserId, now: Instant) -> bool {
        self.expires_at.insert(user, now + self.timeout).is_none()
    }

    pub fn stop(&mut self, user: UserId) -> bool {
        self.expires_at.remove(&user).is_some()
    }

    /// Drop every entry whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<UserId> {
        let mut expired: Vec<UserId> = self
            .expires_at
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .map(|(&user, _)| user)
            .collect();
        expired.sort();
        for user in &expired {
            self.expires_at.remove(user);
        }
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.expires_at.values().min().copied()
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.expires_at.contains_key(&user)
    }

    pub fn users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.expires_at.keys().copied().collect();
        users.sort();
        users
    }

    pub fn is_empty(&self) -> bool {
        self.expires_at.is_empty()
    }

    pub fn clear(&mut self) {
        self.expires_at.clear();
    }
}

/// Whether the local user is currently announced as typing.
#[derive(Debug, Default)]
pub struct LocalTyping {
    typing: bool,
}

impl LocalTyping {
    /// Feed the composer contents; returns the flag to announce, if any.
    pub fn on_input(&mut self, text: &str) -> Option<bool> {
        let typing = !text.is_empty();
        if typing == self.typing {
            return None;
        }
        self.typing = typing;
        Some(typing)
    }

    /// Forget the typing state. Returns true if a stop should be announced.
    pub fn reset(&mut self) -> bool {
        std::mem::take(&mut self.typing)
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }
}
