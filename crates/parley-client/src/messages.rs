//! Ordered per-channel message store.
//!
//! Entries are kept sorted by snowflake ID, which is also creation order.
//! Each entry knows whether it opens a new calendar day so the view can draw
//! date separators without rescanning.

use std::collections::BTreeMap;

use parley_shared::protocol::Message;
use parley_shared::types::MessageId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message: Message,
    /// Locally fabricated placeholder for a message still in flight.
    pub ghost: bool,
    /// First message of its UTC day (or first message loaded at all).
    pub first_of_day: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duplicate(pub MessageId);

/// Outcome of merging one history page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub inserted: usize,
    pub duplicates: usize,
}

/// A neighbour whose day-grouping flag changed after a removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Regrouped {
    pub id: MessageId,
    pub first_of_day: bool,
}

#[derive(Debug, Default)]
pub struct MessageStore {
    entries: BTreeMap<MessageId, StoredMessage>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Messages confirmed by the server (ghosts excluded).
    pub fn loaded_count(&self) -> usize {
        self.entries.values().filter(|e| !e.ghost).count()
    }

    pub fn ghost_count(&self) -> usize {
        self.entries.values().filter(|e| e.ghost).count()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: MessageId) -> Option<&StoredMessage> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoredMessage> {
        self.entries.values()
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.entries.keys().copied().collect()
    }

    /// Oldest server-confirmed message, the cursor for paging backwards.
    pub fn oldest_id(&self) -> Option<MessageId> {
        self.entries
            .values()
            .find(|e| !e.ghost)
            .map(|e| e.message.id)
    }

    pub fn newest_id(&self) -> Option<MessageId> {
        self.entries.keys().next_back().copied()
    }

    pub fn insert(&mut self, message: Message, ghost: bool) -> Result<(), Duplicate> {
        let id = message.id;
        if self.entries.contains_key(&id) {
            return Err(Duplicate(id));
        }
        self.entries.insert(
            id,
            StoredMessage {
                message,
                ghost,
                first_of_day: false,
            },
        );
        self.refresh_day_flag(id);
        if let Some(next) = self.next_id(id) {
            self.refresh_day_flag(next);
        }
        Ok(())
    }

    /// Merge a history page. The page is sorted first; IDs already present
    /// are skipped and counted.
    pub fn merge_history(&mut self, mut messages: Vec<Message>) -> MergeReport {
        messages.sort_by_key(|m| m.id);
        let mut report = MergeReport::default();
        for message in messages {
            match self.insert(message, false) {
                Ok(()) => report.inserted += 1,
                Err(Duplicate(_)) => report.duplicates += 1,
            }
        }
        report
    }

    /// Remove an entry. When the following entry's day flag changes as a
    /// result, it is returned alongside the removed entry.
    pub fn remove(&mut self, id: MessageId) -> Option<(StoredMessage, Option<Regrouped>)> {
        let removed = self.entries.remove(&id)?;
        let next = self.entries.range(id..).next().map(|(&next, _)| next);
        let regrouped = next.and_then(|next| {
            let before = self.entries.get(&next).map(|e| e.first_of_day);
            let after = self.refresh_day_flag(next);
            (before != Some(after)).then_some(Regrouped {
                id: next,
                first_of_day: after,
            })
        });
        Some((removed, regrouped))
    }

    /// Replace the text of a message. Returns false if it is not loaded.
    pub fn edit(&mut self, id: MessageId, text: String) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.message.text = text;
                entry.message.edited = true;
                true
            }
            None => false,
        }
    }

    pub fn remove_oldest_ghost(&mut self) -> Option<StoredMessage> {
        let id = self.entries.values().find(|e| e.ghost)?.message.id;
        self.remove(id).map(|(entry, _)| entry)
    }

    /// An unused ID that sorts after everything loaded, close to "now".
    pub fn next_ghost_id(&self) -> MessageId {
        let now = MessageId::now();
        match self.newest_id() {
            Some(newest) if newest >= now => MessageId(newest.0 + 1),
            _ => now,
        }
    }

    fn next_id(&self, id: MessageId) -> Option<MessageId> {
        use std::ops::Bound::{Excluded, Unbounded};
        self.entries
            .range((Excluded(id), Unbounded))
            .next()
            .map(|(&next, _)| next)
    }

    fn refresh_day_flag(&mut self, id: MessageId) -> bool {
        let prev_day = self.entries.range(..id).next_back().map(|(&prev, _)| prev.day());
        let first = match prev_day {
            Some(day) => day != id.day(),
            None => true,
        };
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.first_of_day = first;
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use parley_shared::types::{ChannelId, UserId};

    use super::*;

    const DAY_MS: u64 = 86_400_000;
    // 2023-11-14T00:00:00Z
    const BASE_MS: u64 = 1_699_920_000_000;

    fn msg(id: MessageId) -> Message {
        Message {
            id,
            channel_id: ChannelId(55),
            user_id: UserId(9),
            text: format!("m{}", id.0),
            attachments: Vec::new(),
            edited: false,
            reply_to: MessageId::NONE,
        }
    }

    fn at(day: u64, minute: u64) -> MessageId {
        MessageId::from_timestamp_ms(BASE_MS + day * DAY_MS + minute * 60_000)
    }

    fn flags(store: &MessageStore) -> Vec<bool> {
        store.iter().map(|e| e.first_of_day).collect()
    }

    #[test]
    fn test_history_is_sorted_and_deduplicated() {
        let mut store = MessageStore::new();
        let report = store.merge_history(vec![msg(at(0, 3)), msg(at(0, 1)), msg(at(0, 2))]);
        assert_eq!(report, MergeReport { inserted: 3, duplicates: 0 });

        let report = store.merge_history(vec![msg(at(0, 2)), msg(at(0, 0))]);
        assert_eq!(report, MergeReport { inserted: 1, duplicates: 1 });

        let ids = store.ids();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(store.len(), 4);
        assert_eq!(store.oldest_id(), Some(at(0, 0)));
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let mut store = MessageStore::new();
        store.insert(msg(MessageId(5)), false).unwrap();
        assert_eq!(store.insert(msg(MessageId(5)), false), Err(Duplicate(MessageId(5))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_day_flags() {
        let mut store = MessageStore::new();
        store.merge_history(vec![msg(at(0, 1)), msg(at(0, 2)), msg(at(1, 0))]);
        assert_eq!(flags(&store), [true, false, true]);

        // prepending an older page from the same day moves the day start
        store.merge_history(vec![msg(at(0, 0))]);
        assert_eq!(flags(&store), [true, false, false, true]);
    }

    #[test]
    fn test_remove_reports_regrouping() {
        let mut store = MessageStore::new();
        store.merge_history(vec![msg(at(0, 0)), msg(at(0, 5)), msg(at(1, 0))]);

        let (_, regrouped) = store.remove(at(0, 5)).unwrap();
        assert_eq!(regrouped, None);

        let (_, regrouped) = store.remove(at(0, 0)).unwrap();
        assert_eq!(regrouped, None, "next entry already opened its day");

        store.merge_history(vec![msg(at(1, 1))]);
        let (_, regrouped) = store.remove(at(1, 0)).unwrap();
        assert_eq!(
            regrouped,
            Some(Regrouped {
                id: at(1, 1),
                first_of_day: true
            })
        );
        assert!(store.remove(at(1, 0)).is_none());
    }

    #[test]
    fn test_edit() {
        let mut store = MessageStore::new();
        store.insert(msg(MessageId(5)), false).unwrap();
        assert!(store.edit(MessageId(5), "changed".into()));
        let entry = store.get(MessageId(5)).unwrap();
        assert_eq!(entry.message.text, "changed");
        assert!(entry.message.edited);
        assert!(!store.edit(MessageId(6), "nope".into()));
    }

    #[test]
    fn test_ghosts() {
        let mut store = MessageStore::new();
        store.insert(msg(at(0, 0)), false).unwrap();
        let first = store.next_ghost_id();
        store.insert(msg(first), true).unwrap();
        let second = store.next_ghost_id();
        assert!(second > first);
        store.insert(msg(second), true).unwrap();

        assert_eq!(store.ghost_count(), 2);
        assert_eq!(store.loaded_count(), 1);
        assert_eq!(store.oldest_id(), Some(at(0, 0)));

        let removed = store.remove_oldest_ghost().unwrap();
        assert_eq!(removed.message.id, first);
        assert_eq!(store.ghost_count(), 1);
    }
}
