//! Typed local cache on top of the key-value table.
//!
//! Reads never fail: a missing, unreadable or corrupt entry is reported as
//! "no cached value". Writes return errors so callers can log them.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use parley_shared::types::{ChannelId, ServerId};

use crate::database::Database;
use crate::error::Result;

pub const KEY_LAST_CHANNELS: &str = "last_channels";
pub const KEY_LAST_SERVER: &str = "last_server";
pub const KEY_SERVER_COUNT: &str = "server_count";
pub const KEY_LANGUAGE: &str = "language";

/// Persistent client-side cache (last channel per server, placeholder hints).
pub struct LocalCache {
    db: Database,
}

impl LocalCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.db.get_value(key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "ignoring corrupt cache entry");
                None
            }
        }
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.db.put_value(key, &json)
    }

    // ------------------------------------------------------------------
    // Last channel per server
    // ------------------------------------------------------------------

    pub fn last_channels(&self) -> BTreeMap<ServerId, ChannelId> {
        self.read(KEY_LAST_CHANNELS).unwrap_or_default()
    }

    pub fn last_channel(&self, server: ServerId) -> Option<ChannelId> {
        self.last_channels().get(&server).copied()
    }

    pub fn set_last_channel(&self, server: ServerId, channel: ChannelId) -> Result<()> {
        let mut map = self.last_channels();
        if map.get(&server) == Some(&channel) {
            return Ok(());
        }
        map.insert(server, channel);
        self.write(KEY_LAST_CHANNELS, &map)
    }

    /// Drop entries for servers not in `present`. Returns how many were removed.
    pub fn prune_last_channels(&self, present: &[ServerId]) -> Result<usize> {
        let mut map = self.last_channels();
        let before = map.len();
        map.retain(|server, _| present.contains(server));
        let removed = before - map.len();
        if removed > 0 {
            self.write(KEY_LAST_CHANNELS, &map)?;
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Last server, server count, language
    // ------------------------------------------------------------------

    pub fn last_server(&self) -> Option<ServerId> {
        self.read(KEY_LAST_SERVER)
    }

    pub fn set_last_server(&self, server: ServerId) -> Result<()> {
        self.write(KEY_LAST_SERVER, &server)
    }

    /// Rough count used only for placeholder rendering before connecting.
    pub fn server_count(&self) -> Option<usize> {
        self.read(KEY_SERVER_COUNT)
    }

    pub fn set_server_count(&self, count: usize) -> Result<()> {
        self.write(KEY_SERVER_COUNT, &count)
    }

    pub fn language(&self) -> Option<String> {
        self.read(KEY_LANGUAGE)
    }

    pub fn set_language(&self, language: &str) -> Result<()> {
        self.write(KEY_LANGUAGE, language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_values_are_none() {
        let cache = LocalCache::in_memory().unwrap();
        assert!(cache.last_channels().is_empty());
        assert_eq!(cache.last_channel(ServerId(1)), None);
        assert_eq!(cache.last_server(), None);
        assert_eq!(cache.server_count(), None);
        assert_eq!(cache.language(), None);
    }

    #[test]
    fn last_channel_per_server() {
        let cache = LocalCache::in_memory().unwrap();
        cache.set_last_channel(ServerId(10), ChannelId(55)).unwrap();
        cache.set_last_channel(ServerId(11), ChannelId(56)).unwrap();
        cache.set_last_channel(ServerId(10), ChannelId(57)).unwrap();

        assert_eq!(cache.last_channel(ServerId(10)), Some(ChannelId(57)));
        assert_eq!(cache.last_channel(ServerId(11)), Some(ChannelId(56)));
    }

    #[test]
    fn prune_drops_missing_servers() {
        let cache = LocalCache::in_memory().unwrap();
        cache.set_last_channel(ServerId(10), ChannelId(55)).unwrap();
        cache.set_last_channel(ServerId(11), ChannelId(56)).unwrap();

        assert_eq!(cache.prune_last_channels(&[ServerId(11)]).unwrap(), 1);
        assert_eq!(cache.last_channel(ServerId(10)), None);
        assert_eq!(cache.last_channel(ServerId(11)), Some(ChannelId(56)));
        assert_eq!(cache.prune_last_channels(&[ServerId(11)]).unwrap(), 0);
    }

    #[test]
    fn corrupt_entry_reads_as_absent() {
        let cache = LocalCache::in_memory().unwrap();
        cache.db.put_value(KEY_LAST_CHANNELS, "{oops").unwrap();
        cache.db.put_value(KEY_SERVER_COUNT, "\"many\"").unwrap();

        assert!(cache.last_channels().is_empty());
        assert_eq!(cache.server_count(), None);

        // a write replaces the corrupt value
        cache.set_last_channel(ServerId(1), ChannelId(2)).unwrap();
        assert_eq!(cache.last_channel(ServerId(1)), Some(ChannelId(2)));
    }

    #[test]
    fn scalar_values_roundtrip() {
        let cache = LocalCache::in_memory().unwrap();
        cache.set_last_server(ServerId(u64::MAX)).unwrap();
        cache.set_server_count(4).unwrap();
        cache.set_language("fr").unwrap();

        assert_eq!(cache.last_server(), Some(ServerId(u64::MAX)));
        assert_eq!(cache.server_count(), Some(4));
        assert_eq!(cache.language().as_deref(), Some("fr"));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = LocalCache::new(Database::new(Some(dir.path())).unwrap());
            cache.set_last_channel(ServerId(10), ChannelId(55)).unwrap();
        }
        let cache = LocalCache::new(Database::new(Some(dir.path())).unwrap());
        assert_eq!(cache.last_channel(ServerId(10)), Some(ChannelId(55)));
    }
}
