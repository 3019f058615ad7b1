//! Strongly-typed identifiers used across the runtime.
//!
//! Newtypes prevent the usual string/uuid mixups between channels,
//! messages, and correlation ids.

use nutype::nutype;
use uuid::Uuid;

/// Logical conversation stream identifier, globally unique and prefixed
/// with the originating gateway's tag (e.g. `term-session`, `sock-<uuid>`).
#[nutype(
    validate(len_char_min = 1),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct ChannelId(String);

impl ChannelId {
    /// Derive a filesystem-safe storage key: any character outside
    /// `[A-Za-z0-9_-]` is replaced with `_`.
    pub fn storage_key(&self) -> String {
        self.as_ref()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

/// Unique identifier for an inbound or outbound message.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Correlation identifier propagated from an inbound message to its
/// outbound response for end-to-end tracing.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Creates a new random correlation ID.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}
