//! Handle generation and short-lived state caching.
//!
//! Every in-flight exchange is identified by a `u32` handle: send
//! handles and wire ids from one number space, security state
//! references from a smaller one. [`StateCache`] parks state under a
//! handle between the request and response halves of an exchange, with
//! exactly-once retrieval and optional deadline sweeping.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Ceiling for send handles, msg-ids, and request-ids (RFC 3412 range).
pub const REQUEST_HANDLE_CEILING: u32 = 0x7FFF_FFFF;

/// Ceiling for security state references.
pub const STATE_REFERENCE_CEILING: u32 = 0x00FF_FFFF;

/// Bounded wrapping counter for protocol identifiers.
///
/// Values run 1..=ceiling and wrap back to 1, so 0 is never issued and
/// stays available as a sentinel.
#[derive(Debug, Clone)]
pub struct HandleGenerator {
    value: u32,
    ceiling: u32,
}

impl HandleGenerator {
    /// Create a generator counting from 1.
    pub fn new(ceiling: u32) -> Self {
        debug_assert!(ceiling > 0);
        Self { value: 0, ceiling }
    }

    /// Create a generator starting at a random point in the range, so
    /// wire ids do not restart at 1 on every engine start.
    pub fn randomized(ceiling: u32) -> Self {
        let mut seed = [0u8; 4];
        if getrandom::fill(&mut seed).is_err() {
            // no system entropy; clock bits are enough for an id offset
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.subsec_nanos())
                .unwrap_or(0);
            seed = nanos.to_be_bytes();
        }
        Self {
            value: u32::from_be_bytes(seed) % ceiling,
            ceiling,
        }
    }

    /// The next identifier.
    pub fn next(&mut self) -> u32 {
        self.value = if self.value >= self.ceiling {
            1
        } else {
            self.value + 1
        };
        self.value
    }
}

struct Entry<V> {
    value: V,
    /// Tick after which the entry is expired, if any.
    deadline: Option<u64>,
}

/// Keyed cache for request-scoped state.
///
/// `push` stores a value and returns the handle to retrieve it with;
/// `pop` consumes it. Popping a handle twice, or one that was never
/// issued, is a hard [`Error::CacheMiss`]: state handed out must come
/// back exactly once.
pub struct StateCache<V> {
    entries: HashMap<u32, Entry<V>>,
    handles: HandleGenerator,
}

impl<V> StateCache<V> {
    /// Create a cache issuing handles up to `ceiling`.
    pub fn new(ceiling: u32) -> Self {
        Self {
            entries: HashMap::new(),
            handles: HandleGenerator::new(ceiling),
        }
    }

    fn vacant_handle(&mut self) -> u32 {
        // occupied slots are skipped; the range dwarfs any realistic
        // number of concurrent exchanges
        let mut handle = self.handles.next();
        while self.entries.contains_key(&handle) {
            handle = self.handles.next();
        }
        handle
    }

    /// Store a value without a deadline.
    pub fn push(&mut self, value: V) -> u32 {
        let handle = self.vacant_handle();
        self.entries.insert(
            handle,
            Entry {
                value,
                deadline: None,
            },
        );
        handle
    }

    /// Store a value that expires after `deadline_tick`.
    pub fn push_with_deadline(&mut self, value: V, deadline_tick: u64) -> u32 {
        let handle = self.vacant_handle();
        self.entries.insert(
            handle,
            Entry {
                value,
                deadline: Some(deadline_tick),
            },
        );
        handle
    }

    /// Retrieve and remove the value stored under `handle`.
    pub fn pop(&mut self, handle: u32) -> Result<V> {
        match self.entries.remove(&handle) {
            Some(entry) => Ok(entry.value),
            None => Err(Error::CacheMiss { handle }.boxed()),
        }
    }

    /// Borrow the value stored under `handle`, if present.
    pub fn get(&self, handle: u32) -> Option<&V> {
        self.entries.get(&handle).map(|e| &e.value)
    }

    /// Mutably borrow the value stored under `handle`, if present.
    pub fn get_mut(&mut self, handle: u32) -> Option<&mut V> {
        self.entries.get_mut(&handle).map(|e| &mut e.value)
    }

    /// Whether a value is stored under `handle`.
    pub fn contains(&self, handle: u32) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Remove and return every entry whose deadline has passed.
    pub fn sweep(&mut self, now_tick: u64) -> Vec<(u32, V)> {
        let expired: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline.is_some_and(|d| d <= now_tick))
            .map(|(&h, _)| h)
            .collect();

        expired
            .into_iter()
            .filter_map(|h| self.entries.remove(&h).map(|e| (h, e.value)))
            .collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over live entries.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &V)> {
        self.entries.iter().map(|(&h, e)| (h, &e.value))
    }
}
