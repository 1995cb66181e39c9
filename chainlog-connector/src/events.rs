use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// A 32-byte log topic.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic(pub [u8; 32]);

impl Topic {
    /// Computes the primary topic of an event from its canonical signature,
    /// e.g. `Transfer(address,address,uint256)`.
    pub fn from_signature(signature: &str) -> Self {
        let canonical: String = signature.chars().filter(|c| !c.is_whitespace()).collect();
        Self(Keccak256::digest(canonical.as_bytes()).into())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Topic {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let mut out = [0u8; 32];
        hex::decode_to_slice(raw, &mut out)?;
        Ok(Self(out))
    }
}

/// A log entry as returned by the ledger, before name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub block_height: u64,
    pub log_index: u64,
    pub tx_hash: String,
    pub topics: Vec<Topic>,
    /// Stringified arguments in emission order.
    pub args: Vec<String>,
}

impl RawEvent {
    pub fn primary_topic(&self) -> Option<&Topic> {
        self.topics.first()
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            block_height: self.block_height,
            log_index: self.log_index,
        }
    }
}

/// Position of a log inside one (ledger, source) scope. Together with the
/// scope it forms the uniqueness key of an [`EventRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub block_height: u64,
    pub log_index: u64,
}

/// A persisted event. Records are written once per uniqueness key and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub ledger_id: String,
    pub source_id: String,
    pub block_height: u64,
    pub log_index: u64,
    pub tx_hash: String,
    /// `None` when the primary topic matched no configured event definition.
    pub event_name: Option<String>,
    pub args: Vec<String>,
}

impl EventRecord {
    pub fn key(&self) -> EventKey {
        EventKey {
            block_height: self.block_height,
            log_index: self.log_index,
        }
    }
}

/// How an event of a source is recognised on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDefinition {
    pub name: String,
    /// Either a signature such as `Approval(address,address,uint256)` or a
    /// literal `0x`-prefixed 32-byte topic.
    pub selector: String,
}

impl EventDefinition {
    pub fn new(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
        }
    }

    fn primary_topic(&self) -> Result<Topic, SyncError> {
        if self.selector.starts_with("0x") {
            return self.selector.parse().map_err(|e| {
                SyncError::Configuration(format!(
                    "event '{}' has an invalid topic '{}': {}",
                    self.name, self.selector, e
                ))
            });
        }
        if !self.selector.contains('(') || !self.selector.ends_with(')') {
            return Err(SyncError::Configuration(format!(
                "event '{}' has an invalid signature '{}'",
                self.name, self.selector
            )));
        }
        Ok(Topic::from_signature(&self.selector))
    }
}

/// The resolved topic filters of one source: a lookup table from primary topic
/// to event name, plus the flattened topic list sent to the ledger.
#[derive(Debug, Clone, Default)]
pub struct TopicFilterSet {
    names: HashMap<Topic, String>,
    topics: Vec<Topic>,
}

impl TopicFilterSet {
    pub fn resolve(definitions: &[EventDefinition]) -> Result<Self, SyncError> {
        let mut names = HashMap::with_capacity(definitions.len());
        let mut topics = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let topic = definition.primary_topic()?;
            if let Some(existing) = names.get(&topic) {
                return Err(SyncError::Configuration(format!(
                    "events '{}' and '{}' share the topic {}",
                    existing, definition.name, topic
                )));
            }
            topics.push(topic);
            names.insert(topic, definition.name.clone());
        }

        Ok(Self { names, topics })
    }

    /// Topics to request from the ledger, in definition order.
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Topic-set membership of the event's primary topic.
    pub fn matches(&self, event: &RawEvent) -> bool {
        event
            .primary_topic()
            .is_some_and(|topic| self.names.contains_key(topic))
    }

    pub fn event_name(&self, topic: &Topic) -> Option<&str> {
        self.names.get(topic).map(String::as_str)
    }
}
