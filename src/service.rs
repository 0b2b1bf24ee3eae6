//! The audit service: typed constructors for every domain event, dispatched
//! to a configured sink. This is the surface collaborators call; they never
//! build raw events unless they have something richer to say.

use crate::error::AuditError;
use crate::event::{Event, EventKind, Severity};
use crate::file::{FileSink, FileSinkConfig};
use crate::query::{AuditFilter, AuditSummary};
use crate::sink::{AuditSink, CancelToken, NullSink};
use std::env;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

/// Facade over an [`AuditSink`].
///
/// Each typed method stamps the current OS user, applies the per-operation
/// severity policy, and logs through the sink. Errors propagate unchanged;
/// callers should log a failed audit write but never abort the user's
/// operation because of one.
pub struct AuditService {
    sink: Arc<dyn AuditSink>,
    file: Option<Arc<FileSink>>,
    cancel: CancelToken,
}

impl AuditService {
    /// Audit into an arbitrary sink.
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            file: None,
            cancel: CancelToken::new(),
        }
    }

    /// Auditing switched off: every write is discarded.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NullSink::new()))
    }

    /// Production setup: a file sink in the configured directory.
    pub fn with_file_sink(config: FileSinkConfig) -> Result<Self, AuditError> {
        let file = Arc::new(FileSink::new(config)?);
        Ok(Self {
            sink: file.clone(),
            file: Some(file),
            cancel: CancelToken::new(),
        })
    }

    /// Best-effort OS user; empty when the environment does not say.
    fn current_user() -> String {
        env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .unwrap_or_default()
    }

    fn emit(&self, event: Event) -> Result<(), AuditError> {
        self.sink.log(&self.cancel, event)
    }

    /// Log a caller-assembled event as-is (for collaborators with richer
    /// payloads than the typed constructors cover).
    pub fn log_event(&self, event: Event) -> Result<(), AuditError> {
        self.emit(event)
    }

    // -----------------------------------------------------------------------
    // Catalog operations
    // -----------------------------------------------------------------------

    pub fn catalog_installed(
        &self,
        catalog: &str,
        source: &str,
        integrity: &str,
        error: Option<&dyn Error>,
    ) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::CatalogInstalled)
                .with_user(Self::current_user())
                .with_catalog(catalog)
                .with_source(source)
                .with_integrity(integrity)
                .with_error(error)
                .build(),
        )
    }

    pub fn catalog_removed(&self, catalog: &str, error: Option<&dyn Error>) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::CatalogRemoved)
                .with_user(Self::current_user())
                .with_catalog(catalog)
                .with_error(error)
                .build(),
        )
    }

    pub fn catalog_verified(
        &self,
        catalog: &str,
        signer: &str,
        verified: bool,
        error: Option<&dyn Error>,
    ) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::CatalogVerified)
                .with_user(Self::current_user())
                .with_catalog(catalog)
                .with_signer(signer)
                .with_signature_verified(verified)
                .with_error(error)
                .build(),
        )
    }

    pub fn catalog_updated(
        &self,
        catalog: &str,
        source: &str,
        error: Option<&dyn Error>,
    ) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::CatalogUpdated)
                .with_user(Self::current_user())
                .with_catalog(catalog)
                .with_source(source)
                .with_error(error)
                .build(),
        )
    }

    // -----------------------------------------------------------------------
    // Plugin operations
    // -----------------------------------------------------------------------

    pub fn plugin_installed(
        &self,
        plugin: &str,
        catalog: &str,
        source: &str,
        error: Option<&dyn Error>,
    ) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::PluginInstalled)
                .with_user(Self::current_user())
                .with_plugin(plugin)
                .with_catalog(catalog)
                .with_source(source)
                .with_error(error)
                .build(),
        )
    }

    pub fn plugin_uninstalled(&self, plugin: &str, error: Option<&dyn Error>) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::PluginUninstalled)
                .with_user(Self::current_user())
                .with_plugin(plugin)
                .with_error(error)
                .build(),
        )
    }

    pub fn plugin_discovered(&self, plugin: &str, source: &str) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::PluginDiscovered)
                .with_user(Self::current_user())
                .with_plugin(plugin)
                .with_source(source)
                .build(),
        )
    }

    pub fn plugin_executed(
        &self,
        plugin: &str,
        duration: Duration,
        error: Option<&dyn Error>,
    ) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::PluginExecuted)
                .with_user(Self::current_user())
                .with_plugin(plugin)
                .with_duration(duration)
                .with_error(error)
                .build(),
        )
    }

    pub fn plugin_validated(&self, plugin: &str, error: Option<&dyn Error>) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::PluginValidated)
                .with_user(Self::current_user())
                .with_plugin(plugin)
                .with_error(error)
                .build(),
        )
    }

    // -----------------------------------------------------------------------
    // Trust and signatures
    // -----------------------------------------------------------------------

    pub fn trust_added(&self, signer: &str, trust_level: &str) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::TrustAdded)
                .with_user(Self::current_user())
                .with_signer(signer)
                .with_trust_level(trust_level)
                .build(),
        )
    }

    pub fn trust_removed(&self, signer: &str, error: Option<&dyn Error>) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::TrustRemoved)
                .with_severity(Severity::Warning)
                .with_user(Self::current_user())
                .with_signer(signer)
                .with_error(error)
                .build(),
        )
    }

    pub fn signature_verified(&self, plugin: &str, signer: &str) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::SignatureVerified)
                .with_user(Self::current_user())
                .with_plugin(plugin)
                .with_signer(signer)
                .with_signature_verified(true)
                .build(),
        )
    }

    pub fn signature_failed(
        &self,
        plugin: &str,
        signer: &str,
        error: Option<&dyn Error>,
    ) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::SignatureFailed)
                .with_severity(Severity::Warning)
                .with_user(Self::current_user())
                .with_plugin(plugin)
                .with_signer(signer)
                .with_signature_verified(false)
                .with_error(error)
                .build(),
        )
    }

    // -----------------------------------------------------------------------
    // Capabilities and sandbox
    // -----------------------------------------------------------------------

    pub fn capability_granted(&self, plugin: &str, capabilities: Vec<String>) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::CapabilityGranted)
                .with_user(Self::current_user())
                .with_plugin(plugin)
                .with_capabilities_granted(capabilities)
                .build(),
        )
    }

    /// A denial is the policy working, so `success` stays true; the
    /// warning severity and the reason carry the signal.
    pub fn capability_denied(
        &self,
        plugin: &str,
        capabilities: Vec<String>,
        reason: &str,
    ) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::CapabilityDenied)
                .with_severity(Severity::Warning)
                .with_user(Self::current_user())
                .with_plugin(plugin)
                .with_capabilities_denied(capabilities)
                .with_detail("reason", reason)
                .build(),
        )
    }

    pub fn sandbox_violation(
        &self,
        plugin: &str,
        sandbox_mode: &str,
        detail: &str,
    ) -> Result<(), AuditError> {
        self.emit(
            Event::builder(EventKind::SandboxViolation)
                .with_severity(Severity::Critical)
                .with_user(Self::current_user())
                .with_plugin(plugin)
                .with_sandbox_mode(sandbox_mode)
                .with_error_message(detail)
                .build(),
        )
    }

    /// Findings roll up to the severity of the worst bucket: any critical
    /// finding makes the event critical, any high finding makes it a
    /// warning, everything else is informational.
    pub fn security_audit(
        &self,
        critical: u64,
        high: u64,
        medium: u64,
        low: u64,
    ) -> Result<(), AuditError> {
        let severity = if critical > 0 {
            Severity::Critical
        } else if high > 0 {
            Severity::Warning
        } else {
            Severity::Info
        };
        let mut builder = Event::builder(EventKind::SecurityAudit)
            .with_severity(severity)
            .with_user(Self::current_user())
            .with_detail("critical_findings", critical)
            .with_detail("high_findings", high)
            .with_detail("medium_findings", medium)
            .with_detail("low_findings", low);
        if critical > 0 {
            builder = builder.with_error_message(format!("{critical} critical findings"));
        }
        self.emit(builder.build())
    }

    // -----------------------------------------------------------------------
    // Reading back
    // -----------------------------------------------------------------------

    /// Matching events, newest first.
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<Event>, AuditError> {
        self.sink.query(&self.cancel, filter)
    }

    /// The `limit` newest events.
    pub fn recent(&self, limit: usize) -> Result<Vec<Event>, AuditError> {
        self.query(&AuditFilter::new().with_limit(limit))
    }

    /// Security-category events over the last `days` days.
    pub fn security_events(&self, days: i64) -> Result<Vec<Event>, AuditError> {
        self.query(
            &AuditFilter::new()
                .with_kinds(EventKind::SECURITY)
                .last_days(days),
        )
    }

    /// Aggregate the events matching `filter`.
    pub fn summary(&self, filter: &AuditFilter) -> Result<AuditSummary, AuditError> {
        Ok(AuditSummary::of(&self.query(filter)?))
    }

    /// Chain verification; trivially zero for sinks without persistence.
    pub fn verify_integrity(&self) -> Result<u64, AuditError> {
        match &self.file {
            Some(file) => file.verify_integrity(),
            None => Ok(0),
        }
    }

    pub fn close(&self) -> Result<(), AuditError> {
        self.sink.close()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
