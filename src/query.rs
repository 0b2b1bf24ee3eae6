//! Query filtering and summary aggregation over audit events.

use crate::event::{Event, EventKind, Severity};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Conjunctive match criteria over events.
///
/// Every criterion left at its default matches everything; the zero-value
/// filter matches every event. `catalog` / `plugin` / `user` are
/// case-insensitive substring matches.
#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    /// Match any of these kinds (empty = any).
    pub kinds: Vec<EventKind>,
    /// Match any of these severities (empty = any).
    pub severities: Vec<Severity>,
    pub catalog: String,
    pub plugin: String,
    pub user: String,
    /// Events at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Events at or before this instant.
    pub until: Option<DateTime<Utc>>,
    pub success_only: bool,
    pub failures_only: bool,
    /// Cap on result size; 0 means unlimited.
    pub limit: usize,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kinds(mut self, kinds: impl Into<Vec<EventKind>>) -> Self {
        self.kinds = kinds.into();
        self
    }

    pub fn with_severities(mut self, severities: impl Into<Vec<Severity>>) -> Self {
        self.severities = severities.into();
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = catalog.into();
        self
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = plugin.into();
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn since(mut self, instant: DateTime<Utc>) -> Self {
        self.since = Some(instant);
        self
    }

    pub fn until(mut self, instant: DateTime<Utc>) -> Self {
        self.until = Some(instant);
        self
    }

    /// Window the filter to the last `n` days.
    pub fn last_days(mut self, n: i64) -> Self {
        self.since = Some(Utc::now() - Duration::days(n));
        self
    }

    /// Window the filter to the last `n` hours.
    pub fn last_hours(mut self, n: i64) -> Self {
        self.since = Some(Utc::now() - Duration::hours(n));
        self
    }

    /// Keep only successful events. Clears `failures_only`.
    pub fn success_only(mut self) -> Self {
        self.success_only = true;
        self.failures_only = false;
        self
    }

    /// Keep only failed events. Clears `success_only`.
    pub fn failures_only(mut self) -> Self {
        self.failures_only = true;
        self.success_only = false;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Pure conjunctive predicate.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if !self.severities.is_empty() && !self.severities.contains(&event.severity) {
            return false;
        }
        if !contains_fold(&event.catalog, &self.catalog) {
            return false;
        }
        if !contains_fold(&event.plugin, &self.plugin) {
            return false;
        }
        if !contains_fold(&event.user, &self.user) {
            return false;
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp > until {
                return false;
            }
        }
        if self.success_only && !event.success {
            return false;
        }
        if self.failures_only && event.success {
            return false;
        }
        true
    }
}

/// Case-insensitive substring match; an empty needle matches anything.
fn contains_fold(haystack: &str, needle: &str) -> bool {
    needle.is_empty() || haystack.to_lowercase().contains(&needle.to_lowercase())
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Aggregate view over a slice of events.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AuditSummary {
    pub total: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub critical_count: u64,
    /// Events in the security category (capability denials, sandbox
    /// violations, signature failures, security audits).
    pub security_event_count: u64,
    pub by_severity: BTreeMap<Severity, u64>,
    pub by_kind: BTreeMap<EventKind, u64>,
    pub by_catalog: BTreeMap<String, u64>,
    pub by_plugin: BTreeMap<String, u64>,
    pub first_event: Option<DateTime<Utc>>,
    pub last_event: Option<DateTime<Utc>>,
}

impl AuditSummary {
    /// Aggregate `events` into a summary.
    pub fn of(events: &[Event]) -> Self {
        let mut summary = Self::default();
        for event in events {
            summary.total += 1;
            if event.success {
                summary.success_count += 1;
            } else {
                summary.failure_count += 1;
            }
            if event.severity == Severity::Critical {
                summary.critical_count += 1;
            }
            if event.kind.is_security_event() {
                summary.security_event_count += 1;
            }
            *summary.by_severity.entry(event.severity).or_insert(0) += 1;
            *summary.by_kind.entry(event.kind).or_insert(0) += 1;
            if !event.catalog.is_empty() {
                *summary.by_catalog.entry(event.catalog.clone()).or_insert(0) += 1;
            }
            if !event.plugin.is_empty() {
                *summary.by_plugin.entry(event.plugin.clone()).or_insert(0) += 1;
            }
            summary.first_event = match summary.first_event {
                Some(first) if first <= event.timestamp => Some(first),
                _ => Some(event.timestamp),
            };
            summary.last_event = match summary.last_event {
                Some(last) if last >= event.timestamp => Some(last),
                _ => Some(event.timestamp),
            };
        }
        summary
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
