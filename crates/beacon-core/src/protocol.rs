//! Subprotocol negotiation.
//!
//! Every connection selects one tag from an ordered list during the
//! WebSocket handshake. The tag is fixed for the connection's lifetime and
//! decides which heartbeat strategy governs it.
//!
//! Selection policy: walk the server's list in its declared preference order
//! and return the first tag the peer also advertised. The peer's own order
//! is ignored.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag every server accepts. Peers that know nothing about heartbeats
/// advertise it and get the legacy behavior.
pub const LEGACY_SENTINEL: &str = "beacon-unsupported";

/// Heartbeat behavior selected by a negotiated tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Server pings unconditionally; liveness is left to the transport.
    Legacy,
    /// Staleness is judged from received pongs only.
    Pong,
    /// Staleness is judged from any inbound frame.
    AnyMessage,
}

impl StrategyKind {
    /// Wire-friendly name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Pong => "pong",
            Self::AnyMessage => "any_message",
        }
    }

    /// Whether peers on this strategy are expected to answer pings.
    pub fn expects_pong(self) -> bool {
        !matches!(self, Self::Legacy)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One supported subprotocol and the strategy it selects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEntry {
    /// Subprotocol tag as sent in `Sec-WebSocket-Protocol`.
    pub tag: String,
    /// Strategy governing connections that negotiate this tag.
    pub strategy: StrategyKind,
}

impl ProtocolEntry {
    /// Convenience constructor.
    pub fn new(tag: impl Into<String>, strategy: StrategyKind) -> Self {
        Self {
            tag: tag.into(),
            strategy,
        }
    }
}

/// The built-in preference list, most preferred first.
pub fn default_entries() -> Vec<ProtocolEntry> {
    vec![
        ProtocolEntry::new("beacon-v1.2-json", StrategyKind::AnyMessage),
        ProtocolEntry::new("beacon-v1.1-json", StrategyKind::Pong),
        ProtocolEntry::new("beacon-v1-json", StrategyKind::Legacy),
        ProtocolEntry::new(LEGACY_SENTINEL, StrategyKind::Legacy),
    ]
}

/// Negotiation and protocol-list errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// The peer advertised nothing the server supports.
    #[error("no common subprotocol, peer offered [{}]", offered.join(", "))]
    NoCommonProtocol {
        /// Tags the peer advertised.
        offered: Vec<String>,
    },
    /// A protocol list contained the same tag twice.
    #[error("duplicate subprotocol tag: {0}")]
    DuplicateTag(String),
    /// A protocol list contained an empty tag.
    #[error("subprotocol tag must not be empty")]
    EmptyTag,
}

/// Pick the server's most preferred tag that the peer also advertised.
pub fn negotiate<'s, P, S>(peer: &[P], server: &'s [S]) -> Result<&'s str, NegotiationError>
where
    P: AsRef<str>,
    S: AsRef<str>,
{
    server
        .iter()
        .map(|tag| tag.as_ref())
        .find(|tag| peer.iter().any(|offered| offered.as_ref() == *tag))
        .ok_or_else(|| NegotiationError::NoCommonProtocol {
            offered: peer.iter().map(|p| p.as_ref().to_owned()).collect(),
        })
}

/// Split a `Sec-WebSocket-Protocol` header value into tags.
pub fn parse_protocol_header(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Result of a successful negotiation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedProtocol {
    /// Selected tag.
    pub tag: String,
    /// Strategy the tag maps to.
    pub strategy: StrategyKind,
}

impl NegotiatedProtocol {
    /// The legacy sentinel selection.
    pub fn legacy() -> Self {
        Self {
            tag: LEGACY_SENTINEL.to_owned(),
            strategy: StrategyKind::Legacy,
        }
    }

    /// Whether the legacy sentinel was selected.
    pub fn is_sentinel(&self) -> bool {
        self.tag == LEGACY_SENTINEL
    }
}

/// Validated, ordered list of supported subprotocols.
///
/// The legacy sentinel is always present; it is appended when the
/// configured list omits it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolSet {
    entries: Vec<ProtocolEntry>,
}

impl ProtocolSet {
    /// Build a set, rejecting empty and duplicate tags.
    pub fn new(mut entries: Vec<ProtocolEntry>) -> Result<Self, NegotiationError> {
        for (i, entry) in entries.iter().enumerate() {
            if entry.tag.trim().is_empty() {
                return Err(NegotiationError::EmptyTag);
            }
            if entries[..i].iter().any(|e| e.tag == entry.tag) {
                return Err(NegotiationError::DuplicateTag(entry.tag.clone()));
            }
        }
        if !entries.iter().any(|e| e.tag == LEGACY_SENTINEL) {
            entries.push(ProtocolEntry::new(LEGACY_SENTINEL, StrategyKind::Legacy));
        }
        Ok(Self { entries })
    }

    /// Entries in preference order.
    pub fn entries(&self) -> &[ProtocolEntry] {
        &self.entries
    }

    /// Tags in preference order.
    pub fn tags(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.tag.as_str()).collect()
    }

    /// Whether `tag` is in the set.
    pub fn supports(&self, tag: &str) -> bool {
        self.strategy_for(tag).is_some()
    }

    /// Strategy for a tag, if supported.
    pub fn strategy_for(&self, tag: &str) -> Option<StrategyKind> {
        self.entries
            .iter()
            .find(|e| e.tag == tag)
            .map(|e| e.strategy)
    }

    /// Negotiate against a peer's advertised tags.
    pub fn negotiate<P: AsRef<str>>(
        &self,
        peer: &[P],
    ) -> Result<NegotiatedProtocol, NegotiationError> {
        let tags = self.tags();
        let tag = negotiate(peer, &tags)?;
        let strategy = self.strategy_for(tag).unwrap_or(StrategyKind::Legacy);
        Ok(NegotiatedProtocol {
            tag: tag.to_owned(),
            strategy,
        })
    }

    /// Value for a client's `Sec-WebSocket-Protocol` request header.
    pub fn header_value(&self) -> String {
        self.tags().join(", ")
    }
}

impl Default for ProtocolSet {
    fn default() -> Self {
        Self {
            entries: default_entries(),
        }
    }
}
