use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::SNOWFLAKE_TIMESTAMP_SHIFT;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }
    };
}

id_type!(
    /// Account identifier assigned by the backend
    UserId
);
id_type!(ServerId);
id_type!(ChannelId);
id_type!(
    /// Snowflake message identifier. The high bits hold the creation time in
    /// Unix milliseconds, the low 22 bits a per-millisecond sequence.
    MessageId
);

impl MessageId {
    /// `MessageId(0)` stands for "no message" (e.g. `ReplyTo` without a reply).
    pub const NONE: MessageId = MessageId(0);

    /// Fabricate an ID for a given creation time with a zero sequence.
    pub fn from_timestamp_ms(ms: u64) -> Self {
        Self(ms << SNOWFLAKE_TIMESTAMP_SHIFT)
    }

    pub fn now() -> Self {
        Self::from_timestamp_ms(Utc::now().timestamp_millis().max(0) as u64)
    }

    pub fn timestamp_ms(self) -> u64 {
        self.0 >> SNOWFLAKE_TIMESTAMP_SHIFT
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn created_at(self) -> Option<DateTime<Utc>> {
        let ms = i64::try_from(self.timestamp_ms()).ok()?;
        DateTime::from_timestamp_millis(ms)
    }

    /// UTC calendar day the message was created on.
    pub fn day(self) -> Option<NaiveDate> {
        self.created_at().map(|t| t.date_naive())
    }
}

/// Presence status as broadcast by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum UserStatus {
    #[default]
    Offline,
    Online,
    Away,
    DoNotDisturb,
    Other(u8),
}

impl From<u8> for UserStatus {
    fn from(b: u8) -> Self {
        match b {
            0 => Self::Offline,
            1 => Self::Online,
            2 => Self::Away,
            3 => Self::DoNotDisturb,
            other => Self::Other(other),
        }
    }
}

impl From<UserStatus> for u8 {
    fn from(s: UserStatus) -> Self {
        match s {
            UserStatus::Offline => 0,
            UserStatus::Online => 1,
            UserStatus::Away => 2,
            UserStatus::DoNotDisturb => 3,
            UserStatus::Other(b) => b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snowflake_timestamp() {
        let id = MessageId::from_timestamp_ms(1_700_000_000_000);
        assert_eq!(id.timestamp_ms(), 1_700_000_000_000);
        assert_eq!(id.0 & ((1 << SNOWFLAKE_TIMESTAMP_SHIFT) - 1), 0);

        // sequence bits never leak into the timestamp
        let with_seq = MessageId(id.0 | 0x3F_FFFF);
        assert_eq!(with_seq.timestamp_ms(), 1_700_000_000_000);
    }

    #[test]
    fn test_snowflake_day() {
        // 2023-11-14T22:13:20Z
        let id = MessageId::from_timestamp_ms(1_700_000_000_000);
        assert_eq!(id.day(), NaiveDate::from_ymd_opt(2023, 11, 14));
    }

    #[test]
    fn test_ids_serialize_as_numbers() {
        let json = serde_json::to_string(&ChannelId(u64::MAX)).unwrap();
        assert_eq!(json, "18446744073709551615");
        let back: ChannelId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ChannelId(u64::MAX));
    }

    #[test]
    fn test_status_byte_mapping() {
        assert_eq!(UserStatus::from(2), UserStatus::Away);
        assert_eq!(u8::from(UserStatus::Other(9)), 9);
        let s: UserStatus = serde_json::from_str("3").unwrap();
        assert_eq!(s, UserStatus::DoNotDisturb);
    }
}
