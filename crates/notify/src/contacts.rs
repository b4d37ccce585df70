//! Rule owner → channel → address book.
//!
//! A channel counts as configured for an owner only when the owner has a
//! non-empty address for it. File format:
//!
//! ```json
//! {
//!   "dana@example.com": {
//!     "whatsapp": "+972501234567",
//!     "email": "dana@example.com",
//!     "telegram": "118822"
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use crate::traits::NotifyError;

/// Per-owner delivery addresses keyed by channel name.
#[derive(Debug, Clone, Default)]
pub struct ContactBook {
    owners: HashMap<String, HashMap<String, String>>,
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a contact book from JSON. Blank addresses are dropped.
    pub fn from_json_str(json: &str) -> Result<Self, NotifyError> {
        let raw: HashMap<String, HashMap<String, String>> = serde_json::from_str(json)
            .map_err(|e| NotifyError::Config(format!("invalid contact book: {e}")))?;

        let mut book = Self::new();
        for (owner, channels) in raw {
            for (channel, address) in channels {
                book.insert(&owner, &channel, &address);
            }
        }
        Ok(book)
    }

    /// Load a contact book file. A missing file yields an empty book.
    pub async fn load(path: &Path) -> Result<Self, NotifyError> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) if json.trim().is_empty() => Ok(Self::new()),
            Ok(json) => {
                let book = Self::from_json_str(&json)?;
                tracing::info!(path = %path.display(), owners = book.len(), "Loaded contact book");
                Ok(book)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Contact book not found, no owner can be notified");
                Ok(Self::new())
            }
            Err(e) => Err(NotifyError::Config(format!(
                "failed to read contact book {}: {e}",
                path.display()
            ))),
        }
    }

    /// Set an owner's address for a channel. Blank addresses are ignored.
    pub fn insert(&mut self, owner: &str, channel: &str, address: &str) {
        let address = address.trim();
        if address.is_empty() {
            return;
        }
        self.owners
            .entry(owner.to_string())
            .or_default()
            .insert(channel.to_ascii_lowercase(), address.to_string());
    }

    /// Builder form of [`ContactBook::insert`].
    pub fn with(mut self, owner: &str, channel: &str, address: &str) -> Self {
        self.insert(owner, channel, address);
        self
    }

    pub fn address(&self, owner: &str, channel: &str) -> Option<&str> {
        self.owners
            .get(owner)
            .and_then(|channels| channels.get(&channel.to_ascii_lowercase()))
            .map(String::as_str)
    }

    /// Number of owners with at least one address.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
