//! Where audit events go: the sink capability and its in-memory and
//! discarding implementations. The production file sink lives in
//! [`crate::file`].

use crate::error::AuditError;
use crate::event::Event;
use crate::query::AuditFilter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation handle, cloneable across threads.
///
/// Sinks check it at coarse points (before a write, between files); a
/// cancelled token makes the operation return [`AuditError::Cancelled`]
/// without touching the log.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag the token; every holder observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error out if the token was cancelled.
    pub fn check(&self) -> Result<(), AuditError> {
        if self.is_cancelled() {
            Err(AuditError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Sink trait
// ---------------------------------------------------------------------------

/// A persistence target for audit events.
///
/// Synchronous by design: producers are ordinary threads and writes must
/// serialise anyway (the hash chain orders them totally). Queries return
/// events newest first, truncated to `filter.limit` when non-zero.
pub trait AuditSink: Send + Sync {
    fn log(&self, cancel: &CancelToken, event: Event) -> Result<(), AuditError>;
    fn query(&self, cancel: &CancelToken, filter: &AuditFilter) -> Result<Vec<Event>, AuditError>;
    fn close(&self) -> Result<(), AuditError>;
}

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

/// Keeps events in a growable vec. For tests and ephemeral use.
///
/// Readers (`query`, `events`) share the lock; writers (`log`, `clear`)
/// take it exclusively.
#[derive(Default)]
pub struct MemorySink {
    events: RwLock<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged, in insertion order.
    pub fn events(&self) -> Vec<Event> {
        self.events.read().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemorySink {
    fn log(&self, cancel: &CancelToken, event: Event) -> Result<(), AuditError> {
        cancel.check()?;
        self.events.write().unwrap().push(event);
        Ok(())
    }

    fn query(&self, cancel: &CancelToken, filter: &AuditFilter) -> Result<Vec<Event>, AuditError> {
        cancel.check()?;
        let events = self.events.read().unwrap();
        let mut matches = Vec::new();
        for event in events.iter().rev() {
            if filter.matches(event) {
                matches.push(event.clone());
                if filter.limit > 0 && matches.len() >= filter.limit {
                    break;
                }
            }
        }
        Ok(matches)
    }

    fn close(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Null sink
// ---------------------------------------------------------------------------

/// Accepts and discards every write; queries are empty. Used when auditing
/// is disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl NullSink {
    pub fn new() -> Self {
        Self
    }
}

impl AuditSink for NullSink {
    fn log(&self, cancel: &CancelToken, _event: Event) -> Result<(), AuditError> {
        cancel.check()
    }

    fn query(&self, cancel: &CancelToken, _filter: &AuditFilter) -> Result<Vec<Event>, AuditError> {
        cancel.check()?;
        Ok(Vec::new())
    }

    fn close(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
