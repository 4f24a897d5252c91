//! Change events denoting filesystem mutations observed by the indexer.

use std::fmt;

/// The three kinds of change the indexer observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Deleted,
    Modified,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Deleted => "deleted",
            EventKind::Modified => "modified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(EventKind::Created),
            "deleted" => Some(EventKind::Deleted),
            "modified" => Some(EventKind::Modified),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded change: `(kind, src, is_dir)`. Never merged or
/// deduplicated: a run of modifications to the same path produces one
/// `Modified` event per scan that observes a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub src: String,
    pub is_dir: bool,
}

impl ChangeEvent {
    pub fn created(src: impl Into<String>, is_dir: bool) -> Self {
        ChangeEvent { kind: EventKind::Created, src: src.into(), is_dir }
    }

    pub fn deleted(src: impl Into<String>, is_dir: bool) -> Self {
        ChangeEvent { kind: EventKind::Deleted, src: src.into(), is_dir }
    }

    pub fn modified(src: impl Into<String>, is_dir: bool) -> Self {
        ChangeEvent { kind: EventKind::Modified, src: src.into(), is_dir }
    }
}

/// A `ChangeEvent` as it comes back out of the queue, carrying the
/// auto-increment `id` that fixes its position in enqueue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    pub id: i64,
    pub event: ChangeEvent,
}
