//! Channel key codec.
//!
//! A channel key is the wire routing tag `name#cursor` that every event
//! delivery carries. It is derivable from a (feed name, cursor) pair and
//! never from the name alone, so two subscriptions to the same feed always
//! route independently.

use std::fmt;

use crate::errors::{LiveError, Result};
use crate::ids::{Cursor, FeedName};

/// Separator between the feed name and the cursor.
pub const CHANNEL_SEPARATOR: char = '#';

/// Routing key for one subscription instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelKey(String);

impl ChannelKey {
    /// Derive the key for a (name, cursor) pair.
    #[must_use]
    pub fn new(name: &FeedName, cursor: &Cursor) -> Self {
        Self(format!("{name}{CHANNEL_SEPARATOR}{cursor}"))
    }

    /// Split a raw key back into its feed name and cursor.
    ///
    /// Feed names never contain the separator, so the split happens at the
    /// first `#`; anything after it belongs to the cursor.
    pub fn parse(raw: &str) -> Result<(FeedName, Cursor)> {
        let Some((name, cursor)) = raw.split_once(CHANNEL_SEPARATOR) else {
            return Err(LiveError::InvalidChannelKey(raw.to_owned()));
        };
        if cursor.is_empty() {
            return Err(LiveError::InvalidChannelKey(raw.to_owned()));
        }
        let name = FeedName::new(name).map_err(|_| LiveError::InvalidChannelKey(raw.to_owned()))?;
        Ok((name, Cursor::from(cursor)))
    }

    /// The raw key as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for ChannelKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
