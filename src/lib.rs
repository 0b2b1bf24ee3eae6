//! # Preflight Audit
//!
//! Durable, tamper-evident history of security-relevant operations in the
//! Preflight plugin toolchain: catalog installs, plugin executions, trust
//! changes, signature checks, capability decisions, sandbox violations.
//!
//! Records are appended as JSON lines, SHA-256 chained to their
//! predecessor (across rotations and restarts), rotated by size, pruned by
//! count and age, and queryable newest-first across every surviving file.
//!
//! ## Quick Start
//!
//! ```ignore
//! use preflight_audit::*;
//!
//! let audit = AuditService::with_file_sink(FileSinkConfig::default())?;
//!
//! // Collaborators report what they did
//! audit.catalog_installed("core", "https://plugins.example.com", "sha256:ab12", None)?;
//! audit.plugin_executed("fmt", std::time::Duration::from_millis(240), None)?;
//!
//! // And anyone can read back, filter, and verify
//! let recent = audit.recent(20)?;
//! let incidents = audit.security_events(7)?;
//! let checked = audit.verify_integrity()?;
//! ```

pub mod error;
pub mod event;
pub mod file;
pub mod query;
pub mod service;
pub mod sink;

// Re-export main types for convenience
pub use error::{AuditError, IntegrityError};
pub use event::{Event, EventBuilder, EventKind, Severity};
pub use file::{FileSink, FileSinkConfig};
pub use query::{AuditFilter, AuditSummary};
pub use service::AuditService;
pub use sink::{AuditSink, CancelToken, MemorySink, NullSink};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn file_service(dir: &TempDir) -> AuditService {
        AuditService::with_file_sink(FileSinkConfig::at(dir.path())).unwrap()
    }

    // === End-to-end through the facade ===

    #[test]
    fn file_backed_service_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let service = file_service(&tmp);

        service.catalog_installed("core", "registry", "sha256:12ab", None).unwrap();
        service.plugin_installed("fmt", "core", "registry", None).unwrap();
        service
            .plugin_executed("fmt", Duration::from_millis(1500), None)
            .unwrap();

        let events = service.recent(10).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, EventKind::PluginExecuted);
        assert_eq!(events[0].duration, Duration::from_millis(1500));
        assert_eq!(events[2].kind, EventKind::CatalogInstalled);

        assert_eq!(service.verify_integrity().unwrap(), 3);
        service.close().unwrap();
    }

    #[test]
    fn filter_composition_over_logged_events() {
        let tmp = TempDir::new().unwrap();
        let service = file_service(&tmp);

        service.catalog_installed("cat1", "src", "", None).unwrap();
        service.plugin_installed("plugin1", "cat1", "src", None).unwrap();
        service.catalog_installed("cat2", "src", "", None).unwrap();

        let catalogs = service
            .query(&AuditFilter::new().with_kinds([EventKind::CatalogInstalled]))
            .unwrap();
        assert_eq!(catalogs.len(), 2);

        service.trust_added("key-a", "verified").unwrap();
        service.trust_added("key-b", "community").unwrap();
        let limited = service.query(&AuditFilter::new().with_limit(3)).unwrap();
        assert_eq!(limited.len(), 3);
    }

    #[test]
    fn summary_through_the_facade() {
        let tmp = TempDir::new().unwrap();
        let service = file_service(&tmp);
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");

        service.catalog_installed("cat1", "src", "", None).unwrap();
        service.catalog_installed("cat2", "src", "", None).unwrap();
        service.plugin_installed("plugin1", "cat1", "src", Some(&err)).unwrap();
        service.sandbox_violation("plugin2", "strict", "escape").unwrap();

        let summary = service.summary(&AuditFilter::new()).unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.failure_count, 1);
        assert_eq!(summary.critical_count, 1);
        assert_eq!(summary.security_event_count, 1);

        let failures = service
            .summary(&AuditFilter::new().failures_only())
            .unwrap();
        assert_eq!(failures.total, 1);
    }

    // === Sink swapping ===

    #[test]
    fn memory_sink_behind_the_facade() {
        let sink = Arc::new(MemorySink::new());
        let service = AuditService::new(sink.clone());
        service.plugin_discovered("fmt", "~/.preflight/plugins").unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].kind, EventKind::PluginDiscovered);
    }

    #[test]
    fn custom_event_through_log_event() {
        let sink = Arc::new(MemorySink::new());
        let service = AuditService::new(sink.clone());
        let event = Event::builder(EventKind::SecurityAudit)
            .with_detail("scanner", "grype")
            .with_detail("cves", 3)
            .build_validated()
            .unwrap();
        service.log_event(event).unwrap();
        assert_eq!(sink.events()[0].details["scanner"], "grype");
    }
}
