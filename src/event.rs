//! The audit event model: one immutable record per security-relevant
//! operation, hash-chained to its predecessor by the file sink.

use crate::error::AuditError;
use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// What happened. Closed set; the wire value is the `snake_case` name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CatalogInstalled,
    CatalogRemoved,
    CatalogVerified,
    CatalogUpdated,
    PluginInstalled,
    PluginUninstalled,
    PluginDiscovered,
    PluginExecuted,
    PluginValidated,
    TrustAdded,
    TrustRemoved,
    SignatureVerified,
    SignatureFailed,
    CapabilityGranted,
    CapabilityDenied,
    SandboxViolation,
    SecurityAudit,
}

impl EventKind {
    /// The four security-category kinds.
    pub const SECURITY: [EventKind; 4] = [
        EventKind::CapabilityDenied,
        EventKind::SandboxViolation,
        EventKind::SignatureFailed,
        EventKind::SecurityAudit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CatalogInstalled => "catalog_installed",
            EventKind::CatalogRemoved => "catalog_removed",
            EventKind::CatalogVerified => "catalog_verified",
            EventKind::CatalogUpdated => "catalog_updated",
            EventKind::PluginInstalled => "plugin_installed",
            EventKind::PluginUninstalled => "plugin_uninstalled",
            EventKind::PluginDiscovered => "plugin_discovered",
            EventKind::PluginExecuted => "plugin_executed",
            EventKind::PluginValidated => "plugin_validated",
            EventKind::TrustAdded => "trust_added",
            EventKind::TrustRemoved => "trust_removed",
            EventKind::SignatureVerified => "signature_verified",
            EventKind::SignatureFailed => "signature_failed",
            EventKind::CapabilityGranted => "capability_granted",
            EventKind::CapabilityDenied => "capability_denied",
            EventKind::SandboxViolation => "sandbox_violation",
            EventKind::SecurityAudit => "security_audit",
        }
    }

    /// Whether this kind belongs to the security category
    /// (capability denials, sandbox violations, signature failures, audits).
    pub fn is_security_event(&self) -> bool {
        Self::SECURITY.contains(self)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// How bad it is. Ordered: info < warning < error < critical.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Event record
// ---------------------------------------------------------------------------

/// A single immutable audit record.
///
/// Field declaration order is the wire order; serde emits struct fields in
/// declaration order, which keeps the canonical JSON byte-stable for a given
/// logical content. `details` is a `serde_json::Map` (BTree-backed), so its
/// keys serialize sorted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique id: `YYYYMMDDhhmmss-xxxxxxxx` (UTC stamp + 8 hex chars).
    pub id: String,
    /// Creation instant, UTC.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    #[serde(rename = "event")]
    pub kind: EventKind,
    pub severity: Severity,
    /// Who did it (best-effort OS user; empty when unknown).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub catalog: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plugin: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub integrity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signer: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities_granted: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities_denied: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trust_level: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sandbox_mode: String,
    /// Elapsed span for execution events; integer milliseconds on the wire.
    #[serde(
        rename = "duration_ms",
        with = "duration_ms",
        default,
        skip_serializing_if = "duration_is_zero"
    )]
    pub duration: Duration,
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    /// `event_hash` of the immediately prior record; empty for the first
    /// record ever written to a log directory.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub previous_hash: String,
    /// SHA-256 of this record with `event_hash` excluded from its own input.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub event_hash: String,
}

fn duration_is_zero(d: &Duration) -> bool {
    d.is_zero()
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

impl Event {
    /// Start building an event of the given kind.
    pub fn builder(kind: EventKind) -> EventBuilder {
        EventBuilder::new(kind)
    }

    /// Check the representable required fields.
    ///
    /// `kind` and `severity` are closed enums and cannot be absent on a
    /// constructed event; the remaining holes are an empty id and a
    /// zero timestamp. Names the first missing field.
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.id.is_empty() {
            return Err(AuditError::InvalidEvent("id"));
        }
        if self.timestamp.timestamp() == 0 && self.timestamp.timestamp_subsec_nanos() == 0 {
            return Err(AuditError::InvalidEvent("timestamp"));
        }
        Ok(())
    }

    /// Lowercase-hex SHA-256 over the canonical JSON of this event with
    /// `event_hash` cleared.
    ///
    /// An empty `event_hash` is omitted from the serialization entirely, so
    /// the hash input never contains the `event_hash` key. Third parties can
    /// verify a record with nothing but a JSON library and SHA-256.
    pub fn compute_hash(&self) -> Result<String, AuditError> {
        let mut unsealed = self.clone();
        unsealed.event_hash = String::new();
        let canonical = serde_json::to_vec(&unsealed).map_err(AuditError::Serialize)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }

    /// True when `event_hash` is empty or matches a recomputation.
    pub fn verify_hash(&self) -> bool {
        if self.event_hash.is_empty() {
            return true;
        }
        match self.compute_hash() {
            Ok(h) => h == self.event_hash,
            Err(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Id generation
// ---------------------------------------------------------------------------

/// `YYYYMMDDhhmmss-xxxxxxxx`: UTC stamp plus 8 hex chars from the OS CSPRNG.
///
/// If the CSPRNG is unavailable the suffix falls back to the sub-second
/// nanos of the timestamp; ids stay well-formed, only their entropy drops.
fn generate_id(now: DateTime<Utc>) -> String {
    let mut suffix = [0u8; 4];
    let suffix = match OsRng.try_fill_bytes(&mut suffix) {
        Ok(()) => hex::encode(suffix),
        Err(_) => fallback_suffix(now),
    };
    format!("{}-{}", now.format("%Y%m%d%H%M%S"), suffix)
}

fn fallback_suffix(now: DateTime<Utc>) -> String {
    format!("{:08x}", now.timestamp_subsec_nanos())
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Event`].
///
/// Seeds id, timestamp, `severity = info`, `success = true`; every optional
/// field has a `with_*` setter. Attaching an error flips `success`.
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    pub fn new(kind: EventKind) -> Self {
        let now = Utc::now();
        Self {
            event: Event {
                id: generate_id(now),
                timestamp: now,
                kind,
                severity: Severity::Info,
                user: String::new(),
                catalog: String::new(),
                plugin: String::new(),
                source: String::new(),
                integrity: String::new(),
                signature_verified: None,
                signer: String::new(),
                capabilities_granted: Vec::new(),
                capabilities_denied: Vec::new(),
                trust_level: String::new(),
                sandbox_mode: String::new(),
                duration: Duration::ZERO,
                success: true,
                error: String::new(),
                details: Map::new(),
                previous_hash: String::new(),
                event_hash: String::new(),
            },
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.event.severity = severity;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.event.user = user.into();
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.event.catalog = catalog.into();
        self
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.event.plugin = plugin.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.event.source = source.into();
        self
    }

    pub fn with_integrity(mut self, integrity: impl Into<String>) -> Self {
        self.event.integrity = integrity.into();
        self
    }

    pub fn with_signature_verified(mut self, verified: bool) -> Self {
        self.event.signature_verified = Some(verified);
        self
    }

    pub fn with_signer(mut self, signer: impl Into<String>) -> Self {
        self.event.signer = signer.into();
        self
    }

    pub fn with_capabilities_granted(mut self, caps: Vec<String>) -> Self {
        self.event.capabilities_granted = caps;
        self
    }

    pub fn with_capabilities_denied(mut self, caps: Vec<String>) -> Self {
        self.event.capabilities_denied = caps;
        self
    }

    pub fn with_trust_level(mut self, level: impl Into<String>) -> Self {
        self.event.trust_level = level.into();
        self
    }

    pub fn with_sandbox_mode(mut self, mode: impl Into<String>) -> Self {
        self.event.sandbox_mode = mode.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.event.duration = duration;
        self
    }

    /// Attach an operation error: records its message and flips `success`.
    /// `None` is a no-op.
    pub fn with_error(self, err: Option<&dyn std::error::Error>) -> Self {
        match err {
            Some(e) => self.with_error_message(e.to_string()),
            None => self,
        }
    }

    /// Attach an error message directly; flips `success`.
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.event.error = message.into();
        self.event.success = false;
        self
    }

    /// Replace the whole `details` map.
    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.event.details = details;
        self
    }

    /// Add a single `details` entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.event.details.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Event {
        self.event
    }

    /// Build, rejecting events missing a required field.
    pub fn build_validated(self) -> Result<Event, AuditError> {
        self.event.validate()?;
        Ok(self.event)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn id_is_well_formed(id: &str) -> bool {
        let Some((stamp, suffix)) = id.split_once('-') else {
            return false;
        };
        stamp.len() == 14
            && stamp.chars().all(|c| c.is_ascii_digit())
            && suffix.len() == 8
            && suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    }

    #[test]
    fn builder_defaults() {
        let event = Event::builder(EventKind::CatalogInstalled).build();
        assert_eq!(event.severity, Severity::Info);
        assert!(event.success);
        assert!(id_is_well_formed(&event.id), "bad id: {}", event.id);
        let age = Utc::now() - event.timestamp;
        assert!(age < chrono::Duration::seconds(1));
        event.validate().unwrap();
    }

    #[test]
    fn fallback_suffix_is_well_formed() {
        let suffix = fallback_suffix(Utc::now());
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn ids_are_unique() {
        let a = Event::builder(EventKind::PluginExecuted).build();
        let b = Event::builder(EventKind::PluginExecuted).build();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn error_flips_success() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "checksum mismatch");
        let event = Event::builder(EventKind::PluginInstalled)
            .with_error(Some(&err))
            .build();
        assert!(!event.success);
        assert_eq!(event.error, "checksum mismatch");

        let ok = Event::builder(EventKind::PluginInstalled).with_error(None).build();
        assert!(ok.success);
        assert!(ok.error.is_empty());
    }

    #[test]
    fn validate_names_first_missing_field() {
        let mut event = Event::builder(EventKind::TrustAdded).build();
        event.id.clear();
        match event.validate() {
            Err(AuditError::InvalidEvent(field)) => assert_eq!(field, "id"),
            other => panic!("expected InvalidEvent, got {:?}", other.err()),
        }

        let mut event = Event::builder(EventKind::TrustAdded).build();
        event.timestamp = DateTime::from_timestamp(0, 0).unwrap();
        match event.validate() {
            Err(AuditError::InvalidEvent(field)) => assert_eq!(field, "timestamp"),
            other => panic!("expected InvalidEvent, got {:?}", other.err()),
        }
    }

    #[test]
    fn roundtrip_with_duration() {
        let event = Event::builder(EventKind::PluginExecuted)
            .with_plugin("test-plugin")
            .with_duration(Duration::from_millis(1500))
            .build();

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""duration_ms":1500"#), "wire: {}", json);

        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.plugin, "test-plugin");
        assert_eq!(back.duration, Duration::from_millis(1500));
        assert_eq!(back, event);
    }

    #[test]
    fn zero_duration_is_omitted_and_roundtrips() {
        let event = Event::builder(EventKind::PluginDiscovered).build();
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("duration_ms"));

        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.duration, Duration::ZERO);
    }

    #[test]
    fn empty_fields_are_omitted() {
        let event = Event::builder(EventKind::CatalogRemoved).build();
        let json = serde_json::to_string(&event).unwrap();
        for absent in ["user", "catalog", "plugin", "signer", "details", "previous_hash", "event_hash", "error"] {
            assert!(!json.contains(&format!("\"{}\"", absent)), "{} in {}", absent, json);
        }
        // success is always present, even at its default
        assert!(json.contains(r#""success":true"#));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let event = Event::builder(EventKind::CatalogInstalled).build();
        let mut value = serde_json::to_value(&event).unwrap();
        value["added_in_a_future_version"] = Value::from("whatever");
        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, event.id);
    }

    #[test]
    fn hash_is_deterministic() {
        let event = Event::builder(EventKind::CatalogVerified)
            .with_catalog("core")
            .with_detail("mirror", "https://example.com")
            .build();
        assert_eq!(event.compute_hash().unwrap(), event.compute_hash().unwrap());
    }

    #[test]
    fn hash_input_excludes_event_hash() {
        let mut event = Event::builder(EventKind::CatalogVerified).build();
        let before = event.compute_hash().unwrap();
        event.event_hash = before.clone();
        // sealing the record does not change what it hashes to
        assert_eq!(event.compute_hash().unwrap(), before);
    }

    #[test]
    fn tamper_detection() {
        let mut event = Event::builder(EventKind::CatalogInstalled)
            .with_catalog("test-catalog")
            .build();
        event.event_hash = event.compute_hash().unwrap();
        assert!(event.verify_hash());

        event.catalog = "tampered".to_string();
        assert!(!event.verify_hash());
    }

    #[test]
    fn any_field_mutation_changes_hash() {
        let base = Event::builder(EventKind::PluginExecuted)
            .with_plugin("fmt")
            .with_duration(Duration::from_millis(20))
            .build();
        let h = base.compute_hash().unwrap();

        let mut e = base.clone();
        e.plugin = "lint".into();
        assert_ne!(e.compute_hash().unwrap(), h);

        let mut e = base.clone();
        e.success = false;
        assert_ne!(e.compute_hash().unwrap(), h);

        let mut e = base.clone();
        e.previous_hash = "00".repeat(32);
        assert_ne!(e.compute_hash().unwrap(), h);

        let mut e = base;
        e.duration = Duration::from_millis(21);
        assert_ne!(e.compute_hash().unwrap(), h);
    }

    #[test]
    fn wire_kind_names() {
        assert_eq!(
            serde_json::to_string(&EventKind::SandboxViolation).unwrap(),
            r#""sandbox_violation""#
        );
        assert_eq!(EventKind::SecurityAudit.to_string(), "security_audit");
        assert_eq!(
            serde_json::from_str::<EventKind>(r#""capability_denied""#).unwrap(),
            EventKind::CapabilityDenied
        );
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), r#""critical""#);
    }

    #[test]
    fn security_category() {
        assert!(EventKind::CapabilityDenied.is_security_event());
        assert!(EventKind::SandboxViolation.is_security_event());
        assert!(EventKind::SignatureFailed.is_security_event());
        assert!(EventKind::SecurityAudit.is_security_event());
        assert!(!EventKind::CatalogInstalled.is_security_event());
        assert!(!EventKind::SignatureVerified.is_security_event());
    }

    #[test]
    fn details_single_key_and_replacement() {
        let event = Event::builder(EventKind::SecurityAudit)
            .with_detail("critical_findings", 2u64)
            .with_detail("tool", "grype")
            .build();
        assert_eq!(event.details.len(), 2);
        assert_eq!(event.details["critical_findings"], Value::from(2u64));

        let mut map = Map::new();
        map.insert("replaced".into(), Value::Bool(true));
        let event = Event::builder(EventKind::SecurityAudit)
            .with_detail("dropped", 1)
            .with_details(map)
            .build();
        assert_eq!(event.details.len(), 1);
        assert!(event.details.contains_key("replaced"));
    }
}
