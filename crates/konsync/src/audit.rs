//! Append-only audit trail of sync writes
//!
//! Every entity-level operation of a sync run is stored as one JSON object per
//! line. Appends take a process-wide lock and reopen the file each time, so
//! concurrent writers never interleave partial lines; readers take no lock.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use konsync_api::{EntityKind, FieldMap};

static AUDIT_LOCK: Mutex<()> = Mutex::new(());

static RELATIVE_SINCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+)([dhm])$").expect("relative since pattern is valid"));

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit log {path} is not accessible: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode audit entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid since format: '{0}' (expected <N>d, <N>h, <N>m or an ISO-8601 date)")]
    InvalidSince(String),
}

pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Push,
    Pull,
}

impl SyncOperation {
    /// `(source, target)` control plane names for this operation.
    pub fn endpoints(&self) -> (&'static str, &'static str) {
        match self {
            SyncOperation::Push => ("gateway", "konnect"),
            SyncOperation::Pull => ("konnect", "gateway"),
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOperation::Push => write!(f, "push"),
            SyncOperation::Pull => write!(f, "pull"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failed,
}

/// One entity-level operation of a sync run. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncAuditEntry {
    pub sync_id: String,
    pub timestamp: DateTime<Utc>,
    pub operation: SyncOperation,
    pub dry_run: bool,
    pub entity_type: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub entity_name: String,
    pub action: AuditAction,
    pub source: String,
    pub target: String,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_state: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_state: Option<FieldMap>,
}

impl SyncAuditEntry {
    pub fn with_entity_id(mut self, id: Option<String>) -> Self {
        self.entity_id = id;
        self
    }

    pub fn with_drift_fields(mut self, fields: Option<Vec<String>>) -> Self {
        self.drift_fields = fields;
        self
    }

    pub fn with_states(mut self, before: Option<FieldMap>, after: Option<FieldMap>) -> Self {
        self.before_state = before;
        self.after_state = after;
        self
    }

    /// Mark the entry failed with `error`.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = AuditStatus::Failed;
        self.error = Some(error.into());
        self
    }
}

/// Handle grouping the entries of one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRun {
    pub sync_id: String,
    pub operation: SyncOperation,
    pub dry_run: bool,
}

impl SyncRun {
    /// A successful entry stamped with the current time.
    pub fn entry(
        &self,
        entity_type: EntityKind,
        entity_name: impl Into<String>,
        action: AuditAction,
    ) -> SyncAuditEntry {
        let (source, target) = self.operation.endpoints();
        SyncAuditEntry {
            sync_id: self.sync_id.clone(),
            timestamp: Utc::now(),
            operation: self.operation,
            dry_run: self.dry_run,
            entity_type,
            entity_id: None,
            entity_name: entity_name.into(),
            action,
            source: source.to_string(),
            target: target.to_string(),
            status: AuditStatus::Success,
            error: None,
            drift_fields: None,
            before_state: None,
            after_state: None,
        }
    }
}

/// Per-sync aggregation of audit entries. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSummary {
    pub sync_id: String,
    pub operation: SyncOperation,
    pub dry_run: bool,
    /// Timestamp of the earliest entry of the sync.
    pub timestamp: DateTime<Utc>,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
    pub entity_types: BTreeSet<EntityKind>,
}

impl SyncSummary {
    fn from_entry(entry: &SyncAuditEntry) -> Self {
        Self {
            sync_id: entry.sync_id.clone(),
            operation: entry.operation,
            dry_run: entry.dry_run,
            timestamp: entry.timestamp,
            created: 0,
            updated: 0,
            deleted: 0,
            skipped: 0,
            errors: 0,
            entity_types: BTreeSet::new(),
        }
    }

    fn add(&mut self, entry: &SyncAuditEntry) {
        self.timestamp = self.timestamp.min(entry.timestamp);
        self.entity_types.insert(entry.entity_type);
        if entry.status == AuditStatus::Failed {
            self.errors += 1;
            return;
        }
        match entry.action {
            AuditAction::Create => self.created += 1,
            AuditAction::Update => self.updated += 1,
            AuditAction::Delete => self.deleted += 1,
            AuditAction::Skip => self.skipped += 1,
        }
    }
}

/// Reader and writer for one audit log file.
#[derive(Debug, Clone)]
pub struct SyncAuditService {
    path: PathBuf,
}

impl SyncAuditService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Allocate a sync id. Nothing is written until the first `record`.
    pub fn start_sync(&self, operation: SyncOperation, dry_run: bool) -> SyncRun {
        let run = SyncRun {
            sync_id: Uuid::new_v4().to_string(),
            operation,
            dry_run,
        };
        debug!(
            "[SyncAuditService] Started {} sync {} (dry_run={})",
            operation, run.sync_id, dry_run
        );
        run
    }

    /// Append one entry as a single JSON line.
    pub fn record(&self, entry: &SyncAuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = AUDIT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        file.write_all(line.as_bytes())
            .map_err(|source| self.io_error(source))?;
        Ok(())
    }

    /// Summaries of recorded syncs, most recent first.
    pub fn list_syncs(
        &self,
        since: Option<DateTime<Utc>>,
        operation: Option<SyncOperation>,
        limit: Option<usize>,
    ) -> Result<Vec<SyncSummary>> {
        let mut order: Vec<String> = Vec::new();
        let mut summaries: HashMap<String, SyncSummary> = HashMap::new();
        for entry in self.read_entries()? {
            let summary = summaries.entry(entry.sync_id.clone()).or_insert_with(|| {
                order.push(entry.sync_id.clone());
                SyncSummary::from_entry(&entry)
            });
            summary.add(&entry);
        }

        let mut result: Vec<SyncSummary> = order
            .into_iter()
            .filter_map(|id| summaries.remove(&id))
            .filter(|s| since.map_or(true, |since| s.timestamp >= since))
            .filter(|s| operation.map_or(true, |op| s.operation == op))
            .collect();
        result.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    /// Every entry of one sync, in file order.
    pub fn get_sync_details(&self, sync_id: &str) -> Result<Vec<SyncAuditEntry>> {
        Ok(self
            .read_entries()?
            .into_iter()
            .filter(|e| e.sync_id == sync_id)
            .collect())
    }

    /// Entries touching one entity across all syncs, most recent first.
    pub fn get_entity_history(
        &self,
        entity_type: EntityKind,
        entity_name: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SyncAuditEntry>> {
        let mut entries: Vec<SyncAuditEntry> = self
            .read_entries()?
            .into_iter()
            .filter(|e| e.entity_type == entity_type && e.entity_name == entity_name)
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    fn read_entries(&self) -> Result<Vec<SyncAuditEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };

        let mut entries = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SyncAuditEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(
                    "[SyncAuditService] Skipping malformed line {} in {}: {}",
                    index + 1,
                    self.path.display(),
                    err
                ),
            }
        }
        Ok(entries)
    }

    fn io_error(&self, source: std::io::Error) -> AuditError {
        AuditError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Parse a `--since` value relative to the current time.
pub fn parse_since(text: &str) -> Result<DateTime<Utc>> {
    parse_since_at(text, Utc::now())
}

/// Parse `<N>d`, `<N>h`, `<N>m` (measured back from `now`) or an ISO-8601
/// date or datetime. Datetimes without an offset are taken as UTC.
pub fn parse_since_at(text: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let text = text.trim();
    let invalid = || AuditError::InvalidSince(text.to_string());

    if let Some(caps) = RELATIVE_SINCE.captures(text) {
        let amount: i64 = caps[1].parse().map_err(|_| invalid())?;
        let delta = match caps[2].to_ascii_lowercase().as_str() {
            "d" => Duration::try_days(amount),
            "h" => Duration::try_hours(amount),
            _ => Duration::try_minutes(amount),
        };
        return delta
            .and_then(|delta| now.checked_sub_signed(delta))
            .ok_or_else(invalid);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }

    Err(invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    fn at(run: &SyncRun, ts: DateTime<Utc>, kind: EntityKind, name: &str, action: AuditAction) -> SyncAuditEntry {
        SyncAuditEntry {
            timestamp: ts,
            ..run.entry(kind, name, action)
        }
    }

    #[test]
    fn test_start_sync_writes_nothing() {
        let dir = tempdir().unwrap();
        let audit = SyncAuditService::new(dir.path().join("audit/sync.jsonl"));
        let run = audit.start_sync(SyncOperation::Push, false);

        assert_eq!(run.sync_id.len(), 36);
        assert_eq!(run.sync_id.matches('-').count(), 4);
        assert!(!audit.path().exists());
        assert!(audit.list_syncs(None, None, None).unwrap().is_empty());
    }

    #[test]
    fn test_summaries_count_by_action_and_status() {
        let dir = tempdir().unwrap();
        let audit = SyncAuditService::new(dir.path().join("nested/dir/sync.jsonl"));
        let run = audit.start_sync(SyncOperation::Push, true);

        audit.record(&run.entry(EntityKind::Service, "api", AuditAction::Create)).unwrap();
        audit.record(&run.entry(EntityKind::Route, "r1", AuditAction::Update)).unwrap();
        audit.record(&run.entry(EntityKind::Route, "r2", AuditAction::Skip)).unwrap();
        audit
            .record(&run.entry(EntityKind::Plugin, "cors", AuditAction::Create).failed("HTTP 400"))
            .unwrap();

        let syncs = audit.list_syncs(None, None, None).unwrap();
        assert_eq!(syncs.len(), 1);
        let summary = &syncs[0];
        assert_eq!(summary.sync_id, run.sync_id);
        assert!(summary.dry_run);
        assert_eq!((summary.created, summary.updated, summary.skipped, summary.errors), (1, 1, 1, 1));
        assert_eq!(summary.entity_types.len(), 3);
    }

    #[test]
    fn test_list_syncs_orders_filters_and_limits() {
        let dir = tempdir().unwrap();
        let audit = SyncAuditService::new(dir.path().join("sync.jsonl"));
        let day = |d| Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap();

        let first = audit.start_sync(SyncOperation::Push, false);
        let second = audit.start_sync(SyncOperation::Pull, false);
        let third = audit.start_sync(SyncOperation::Push, false);
        audit.record(&at(&first, day(1), EntityKind::Service, "a", AuditAction::Create)).unwrap();
        audit.record(&at(&second, day(2), EntityKind::Service, "a", AuditAction::Update)).unwrap();
        audit.record(&at(&third, day(3), EntityKind::Service, "a", AuditAction::Delete)).unwrap();

        let all = audit.list_syncs(None, None, None).unwrap();
        let ids: Vec<&str> = all.iter().map(|s| s.sync_id.as_str()).collect();
        assert_eq!(ids, vec![third.sync_id.as_str(), second.sync_id.as_str(), first.sync_id.as_str()]);

        let pushes = audit.list_syncs(None, Some(SyncOperation::Push), Some(1)).unwrap();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].sync_id, third.sync_id);

        let recent = audit.list_syncs(Some(day(2)), None, None).unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.jsonl");
        let audit = SyncAuditService::new(&path);
        let run = audit.start_sync(SyncOperation::Pull, false);

        audit.record(&run.entry(EntityKind::Consumer, "alice", AuditAction::Create)).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file).unwrap();
        audit.record(&run.entry(EntityKind::Consumer, "bob", AuditAction::Create)).unwrap();

        let details = audit.get_sync_details(&run.sync_id).unwrap();
        let names: Vec<&str> = details.iter().map(|e| e.entity_name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn test_entity_history_newest_first() {
        let dir = tempdir().unwrap();
        let audit = SyncAuditService::new(dir.path().join("sync.jsonl"));
        let run = audit.start_sync(SyncOperation::Push, false);
        let hour = |h| Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap();

        let before = konsync_api::to_field_map(&json!({"host": "old.local"}));
        audit
            .record(
                &at(&run, hour(1), EntityKind::Service, "api", AuditAction::Update)
                    .with_states(Some(before.clone()), None),
            )
            .unwrap();
        audit.record(&at(&run, hour(2), EntityKind::Service, "other", AuditAction::Update)).unwrap();
        audit.record(&at(&run, hour(3), EntityKind::Service, "api", AuditAction::Skip)).unwrap();
        audit.record(&at(&run, hour(4), EntityKind::Route, "api", AuditAction::Skip)).unwrap();

        let history = audit.get_entity_history(EntityKind::Service, "api", None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, AuditAction::Skip);
        assert_eq!(history[1].before_state, Some(before));

        let limited = audit.get_entity_history(EntityKind::Service, "api", Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_parse_since_relative_and_absolute() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        assert_eq!(parse_since_at("7d", now).unwrap(), now - Duration::days(7));
        assert_eq!(parse_since_at("24H", now).unwrap(), now - Duration::hours(24));
        assert_eq!(parse_since_at("30m", now).unwrap(), now - Duration::minutes(30));
        assert_eq!(
            parse_since_at("2024-01-15", now).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_since_at("2024-01-15T08:30:00", now).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap()
        );
        assert_eq!(
            parse_since_at("2024-01-15T08:30:00+02:00", now).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 6, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_since_rejects_other_formats() {
        for text in ["yesterday", "7w", "d7", "", "2024-13-01"] {
            let err = parse_since(text).unwrap_err();
            assert!(err.to_string().contains("Invalid since format"), "{}", text);
        }
    }
}
