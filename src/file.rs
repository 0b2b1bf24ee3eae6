//! Append-only JSONL file sink: size-based rotation, count and age
//! retention, and a SHA-256 hash chain that spans rotations and process
//! restarts.

use crate::error::{AuditError, IntegrityError};
use crate::event::Event;
use crate::query::AuditFilter;
use crate::sink::{AuditSink, CancelToken};
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Name of the active log file.
const CURRENT_LOG: &str = "audit.jsonl";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// File sink tuning. The defaults match production use: 10 MiB per file,
/// ten rotated files kept, ninety days of retention.
#[derive(Clone, Debug)]
pub struct FileSinkConfig {
    /// Directory holding `audit.jsonl` and its rotated siblings.
    pub dir: PathBuf,
    /// Rotate once the active file reaches this many bytes.
    pub max_size: u64,
    /// `cleanup` removes files whose mtime is older than this.
    pub max_age: Duration,
    /// Keep at most this many rotated files.
    pub max_rotations: usize,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        let dir = dirs::home_dir()
            .map(|home| home.join(".preflight").join("audit"))
            .unwrap_or_else(|| PathBuf::from(".preflight/audit"));
        Self {
            dir,
            max_size: 10 * 1024 * 1024,
            max_age: Duration::from_secs(90 * 24 * 60 * 60),
            max_rotations: 10,
        }
    }
}

impl FileSinkConfig {
    /// Default limits, custom directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// File sink
// ---------------------------------------------------------------------------

struct SinkState {
    /// Open handle on the active file; `None` after `close` (a later `log`
    /// reopens it).
    file: Option<File>,
    /// Bytes accumulated in the active file.
    bytes: u64,
    /// `event_hash` of the most recently persisted record; empty before the
    /// first write into a fresh directory.
    last_hash: String,
}

/// Append-only journal of audit events, one JSON object per line.
///
/// A single mutex guards the file handle, the byte counter, and the chain
/// head, so concurrent producers are totally ordered: whichever thread wins
/// the lock writes first and its hash becomes the next writer's
/// `previous_hash`. Timestamps are captured before the lock and may be
/// non-monotonic across threads.
pub struct FileSink {
    config: FileSinkConfig,
    current_path: PathBuf,
    state: Mutex<SinkState>,
}

impl FileSink {
    /// Open (or create) the sink directory and seed the chain head from the
    /// newest persisted record, so continuity survives restarts.
    pub fn new(config: FileSinkConfig) -> Result<Self, AuditError> {
        create_private_dir(&config.dir)?;
        let current_path = config.dir.join(CURRENT_LOG);
        let file = open_append(&current_path)?;
        let bytes = file
            .metadata()
            .map_err(|e| AuditError::Io { op: "stat", source: e })?
            .len();
        let last_hash = recover_last_hash(&config.dir)?;
        Ok(Self {
            config,
            current_path,
            state: Mutex::new(SinkState {
                file: Some(file),
                bytes,
                last_hash,
            }),
        })
    }

    pub fn config(&self) -> &FileSinkConfig {
        &self.config
    }

    /// Path of the active log file.
    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    /// Current chain head (for tests and diagnostics).
    pub fn last_hash(&self) -> String {
        self.state.lock().unwrap().last_hash.clone()
    }

    /// Walk every record in write order and check body hashes and chain
    /// links. Halts at the first violation; returns the number of records
    /// verified otherwise.
    ///
    /// The oldest surviving record is allowed any `previous_hash`: its
    /// predecessor may have been pruned away. Every later record must link
    /// exactly.
    pub fn verify_integrity(&self) -> Result<u64, AuditError> {
        let _state = self.state.lock().unwrap();
        let mut previous_hash: Option<String> = None;
        let mut verified = 0u64;
        for entry in list_log_files(&self.config.dir)? {
            for event in read_events(&entry.path)? {
                if !event.verify_hash() {
                    let expected = event.compute_hash().unwrap_or_default();
                    return Err(IntegrityError {
                        event_id: event.id,
                        expected,
                        actual: event.event_hash,
                        chain_broken: false,
                    }
                    .into());
                }
                if let Some(prev) = &previous_hash {
                    if event.previous_hash != *prev {
                        return Err(IntegrityError {
                            event_id: event.id,
                            expected: prev.clone(),
                            actual: event.previous_hash,
                            chain_broken: true,
                        }
                        .into());
                    }
                }
                previous_hash = Some(event.event_hash);
                verified += 1;
            }
        }
        Ok(verified)
    }

    /// Remove log files whose mtime is older than `max_age`. The active
    /// file is exempt, so an idle system never loses its newest records.
    /// Returns how many files were removed.
    pub fn cleanup(&self) -> Result<usize, AuditError> {
        let _state = self.state.lock().unwrap();
        let cutoff = SystemTime::now() - self.config.max_age;
        let mut removed = 0;
        for entry in list_log_files(&self.config.dir)? {
            if entry.path == self.current_path {
                continue;
            }
            if entry.modified < cutoff {
                match fs::remove_file(&entry.path) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        warn!(file = %entry.path.display(), error = %e,
                            "failed to remove expired audit log");
                    }
                }
            }
        }
        Ok(removed)
    }

    fn ensure_open_locked(&self, state: &mut SinkState) -> Result<(), AuditError> {
        if state.file.is_some() {
            return Ok(());
        }
        let file = open_append(&self.current_path)?;
        state.bytes = file
            .metadata()
            .map_err(|e| AuditError::Io { op: "stat", source: e })?
            .len();
        state.file = Some(file);
        Ok(())
    }

    /// Close the active file, rename it to its timestamped slot, prune the
    /// rotated set, and start a fresh file. `last_hash` is retained: the
    /// chain crosses the boundary.
    fn rotate_locked(&self, state: &mut SinkState) -> Result<(), AuditError> {
        state.file = None;
        let rotated = self.rotated_target();
        match fs::rename(&self.current_path, &rotated) {
            Ok(()) => debug!(to = %rotated.display(), "rotated audit log"),
            // already rotated by an earlier attempt
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(AuditError::Io { op: "rotate", source: e }),
        }
        self.prune_rotated()?;
        let file = open_append(&self.current_path)?;
        state.bytes = file
            .metadata()
            .map_err(|e| AuditError::Io { op: "stat", source: e })?
            .len();
        state.file = Some(file);
        Ok(())
    }

    /// Next free `audit-YYYYMMDD-hhmmss.jsonl` slot. Rotations within one
    /// wall-clock second bump the stamp forward rather than clobber an
    /// earlier rotation.
    fn rotated_target(&self) -> PathBuf {
        let mut stamp = Utc::now();
        loop {
            let name = format!("audit-{}.jsonl", stamp.format("%Y%m%d-%H%M%S"));
            let path = self.config.dir.join(name);
            if !path.exists() {
                return path;
            }
            stamp = stamp + chrono::Duration::seconds(1);
        }
    }

    /// Drop the oldest rotated files beyond `max_rotations`. The active
    /// file never counts toward the limit.
    fn prune_rotated(&self) -> Result<(), AuditError> {
        let mut rotated: Vec<LogFile> = list_log_files(&self.config.dir)?
            .into_iter()
            .filter(|f| f.path != self.current_path)
            .collect();
        if rotated.len() <= self.config.max_rotations {
            return Ok(());
        }
        let excess = rotated.len() - self.config.max_rotations;
        for entry in rotated.drain(..excess) {
            if let Err(e) = fs::remove_file(&entry.path) {
                warn!(file = %entry.path.display(), error = %e,
                    "failed to prune rotated audit log");
            }
        }
        Ok(())
    }
}

impl AuditSink for FileSink {
    fn log(&self, cancel: &CancelToken, mut event: Event) -> Result<(), AuditError> {
        let mut state = self.state.lock().unwrap();
        cancel.check()?;
        self.ensure_open_locked(&mut state)?;
        if state.bytes >= self.config.max_size {
            self.rotate_locked(&mut state)?;
        }

        event.previous_hash = state.last_hash.clone();
        event.event_hash = event.compute_hash()?;
        let mut line = serde_json::to_vec(&event).map_err(AuditError::Serialize)?;
        line.push(b'\n');

        if let Some(file) = state.file.as_mut() {
            file.write_all(&line)
                .map_err(|e| AuditError::Io { op: "write", source: e })?;
        }

        // only a fully successful write advances the chain head
        state.bytes += line.len() as u64;
        state.last_hash = event.event_hash;
        Ok(())
    }

    fn query(&self, cancel: &CancelToken, filter: &AuditFilter) -> Result<Vec<Event>, AuditError> {
        let _state = self.state.lock().unwrap();
        cancel.check()?;
        let mut files = list_log_files(&self.config.dir)?;
        files.reverse();

        let mut matches = Vec::new();
        for entry in files {
            cancel.check()?;
            let events = read_events(&entry.path)?;
            for event in events.iter().rev() {
                if filter.matches(event) {
                    matches.push(event.clone());
                    if filter.limit > 0 && matches.len() >= filter.limit {
                        return Ok(matches);
                    }
                }
            }
        }
        Ok(matches)
    }

    fn close(&self) -> Result<(), AuditError> {
        let mut state = self.state.lock().unwrap();
        if let Some(file) = state.file.take() {
            file.sync_all()
                .map_err(|e| AuditError::Io { op: "close", source: e })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Directory helpers
// ---------------------------------------------------------------------------

struct LogFile {
    path: PathBuf,
    modified: SystemTime,
}

fn create_private_dir(dir: &Path) -> Result<(), AuditError> {
    fs::create_dir_all(dir).map_err(|e| AuditError::Io { op: "create dir", source: e })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| AuditError::Io { op: "chmod", source: e })?;
    }
    Ok(())
}

fn open_append(path: &Path) -> Result<File, AuditError> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .map_err(|e| AuditError::Io { op: "open", source: e })
}

/// All `*.jsonl` files in `dir`, oldest first (mtime, then name, so the
/// active file sorts after same-second rotations).
fn list_log_files(dir: &Path) -> Result<Vec<LogFile>, AuditError> {
    let mut files = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| AuditError::Io { op: "read dir", source: e })?;
    for entry in entries {
        let entry = entry.map_err(|e| AuditError::Io { op: "read dir", source: e })?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .map_err(|e| AuditError::Io { op: "stat", source: e })?;
        files.push(LogFile { path, modified });
    }
    files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

/// Parse every record in `path`, skipping malformed lines. A torn or
/// hand-mangled line never aborts a read; only open/read failures escalate.
fn read_events(path: &Path) -> Result<Vec<Event>, AuditError> {
    let file = File::open(path).map_err(|e| AuditError::Io { op: "open", source: e })?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| AuditError::Io { op: "read", source: e })?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => events.push(event),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping malformed audit line");
            }
        }
    }
    Ok(events)
}

/// Seed the chain head from the newest record on disk: newest file by
/// mtime, last parseable record within it.
fn recover_last_hash(dir: &Path) -> Result<String, AuditError> {
    let mut files = list_log_files(dir)?;
    files.reverse();
    for entry in files {
        if let Some(event) = read_events(&entry.path)?.pop() {
            return Ok(event.event_hash);
        }
    }
    Ok(String::new())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
