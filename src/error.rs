//! Error types for the audit core.

use std::fmt;

// ---------------------------------------------------------------------------
// Top-level audit error
// ---------------------------------------------------------------------------

/// Everything the audit core can fail with.
///
/// The core never retries internally; it reports once and lets the caller
/// decide. Producers should log audit-write failures but must not abort the
/// underlying user operation because auditing failed.
#[derive(Debug)]
pub enum AuditError {
    /// An event is missing a required field. Carries the field name.
    InvalidEvent(&'static str),
    /// The event could not be encoded as JSON (an unserializable `details`
    /// value). The event was not written; the hash chain is unchanged.
    Serialize(serde_json::Error),
    /// A filesystem operation failed. `op` names the originating operation.
    Io {
        op: &'static str,
        source: std::io::Error,
    },
    /// The hash chain did not verify.
    Integrity(IntegrityError),
    /// The caller's cancel token was observed cancelled.
    Cancelled,
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEvent(field) => write!(f, "invalid event: missing {}", field),
            Self::Serialize(e) => write!(f, "serialize: {}", e),
            Self::Io { op, source } => write!(f, "{}: {}", op, source),
            Self::Integrity(e) => e.fmt(f),
            Self::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for AuditError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serialize(e) => Some(e),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Integrity violations
// ---------------------------------------------------------------------------

/// A record that failed chain verification.
///
/// `chain_broken` distinguishes a broken link (`previous_hash` does not match
/// the predecessor) from a tampered body (`event_hash` does not match the
/// record's own content).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegrityError {
    /// Id of the offending record.
    pub event_id: String,
    /// The hash verification expected.
    pub expected: String,
    /// The hash actually found on the record.
    pub actual: String,
    /// True for a broken link, false for a mismatched body.
    pub chain_broken: bool,
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.chain_broken {
            write!(
                f,
                "chain broken at event {}: expected previous hash {:?}, found {:?}",
                self.event_id, self.expected, self.actual
            )
        } else {
            write!(
                f,
                "event {} tampered: computed hash {:?}, recorded {:?}",
                self.event_id, self.expected, self.actual
            )
        }
    }
}

impl std::error::Error for IntegrityError {}

impl From<IntegrityError> for AuditError {
    fn from(e: IntegrityError) -> Self {
        Self::Integrity(e)
    }
}
