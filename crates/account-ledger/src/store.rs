//! Append-only ledger with JSON Lines persistence.

use crate::error::LedgerError;
use crate::types::{Credential, LedgerEntry, LedgerStats, Outcome};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// JSON Lines file backend. One entry per line, synced after every append.
struct JsonlFile {
    path: PathBuf,
    file: File,
    /// Length of the durable prefix; a failed append is truncated back to it.
    len: u64,
    /// Set when a torn write could not be truncated. The file tail is
    /// unknown from then on, so every later append is refused.
    failed: Option<String>,
}

impl JsonlFile {
    async fn append(&mut self, line: &[u8]) -> Result<(), LedgerError> {
        if let Some(reason) = &self.failed {
            return Err(LedgerError::Storage(format!(
                "ledger file unusable after failed rollback: {}",
                reason
            )));
        }

        let result: std::io::Result<()> = async {
            self.file.write_all(line).await?;
            self.file.flush().await?;
            self.file.sync_data().await
        }
        .await;

        match result {
            Ok(()) => {
                self.len += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                warn!(path = ?self.path, "Ledger append failed, truncating torn write: {}", e);
                if let Err(trunc) = self.file.set_len(self.len).await {
                    error!(
                        path = ?self.path,
                        "Failed to truncate ledger, refusing further writes: {}", trunc
                    );
                    self.failed = Some(trunc.to_string());
                }
                Err(e.into())
            }
        }
    }
}

enum Backend {
    File(JsonlFile),
    /// No persistence (tests, or persistence disabled).
    Memory,
}

struct State {
    entries: Vec<LedgerEntry>,
    by_id: HashMap<Uuid, usize>,
    backend: Backend,
}

/// Append-only store of finalized attempts, keyed by attempt id.
///
/// Cloning is cheap; clones share the same underlying store. Appends are
/// serialized, so concurrent attempts can record safely.
#[derive(Clone)]
pub struct Ledger {
    state: Arc<RwLock<State>>,
}

impl Ledger {
    /// In-memory ledger. Entries are lost on drop.
    pub fn memory() -> Self {
        Self::from_parts(Vec::new(), HashMap::new(), Backend::Memory)
    }

    /// Open (or create) a file-backed ledger.
    ///
    /// A trailing line without a terminating newline is an unfinished write
    /// and is truncated away. Any other unreadable line is an error.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let data = match fs::read(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = ?path, "Ledger file not found, starting empty ledger");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let (entries, by_id, durable_len) = parse_lines(&data)?;

        if durable_len < data.len() {
            warn!(
                path = ?path,
                discarded = data.len() - durable_len,
                "Discarding unfinished trailing ledger write"
            );
            let f = OpenOptions::new().write(true).open(&path).await?;
            f.set_len(durable_len as u64).await?;
            f.sync_all().await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(path = ?path, entries = entries.len(), "Opened ledger");

        Ok(Self::from_parts(
            entries,
            by_id,
            Backend::File(JsonlFile {
                path,
                file,
                len: durable_len as u64,
                failed: None,
            }),
        ))
    }

    fn from_parts(
        entries: Vec<LedgerEntry>,
        by_id: HashMap<Uuid, usize>,
        backend: Backend,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                entries,
                by_id,
                backend,
            })),
        }
    }

    /// Append an entry. Either the whole entry is durable or nothing is.
    #[instrument(
        skip(self, entry),
        fields(attempt_id = %entry.attempt_id, outcome = ?entry.outcome)
    )]
    pub async fn record(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;

        if state.by_id.contains_key(&entry.attempt_id) {
            return Err(LedgerError::DuplicateEntry(entry.attempt_id));
        }

        if let Backend::File(file) = &mut state.backend {
            let mut line = serde_json::to_vec(&entry)?;
            line.push(b'\n');
            file.append(&line).await?;
        }

        let index = state.entries.len();
        state.by_id.insert(entry.attempt_id, index);
        state.entries.push(entry);

        debug!("Ledger entry recorded");
        Ok(())
    }

    pub async fn get(&self, attempt_id: &Uuid) -> Option<LedgerEntry> {
        let state = self.state.read().await;
        state
            .by_id
            .get(attempt_id)
            .map(|&i| state.entries[i].clone())
    }

    /// Entries with the given outcome, in recording order.
    pub async fn list_by_outcome(&self, outcome: Outcome) -> Vec<LedgerEntry> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.outcome == outcome)
            .cloned()
            .collect()
    }

    pub async fn list_all(&self) -> Vec<LedgerEntry> {
        self.state.read().await.entries.clone()
    }

    pub async fn find_credential(&self, attempt_id: &Uuid) -> Option<Credential> {
        self.get(attempt_id).await.and_then(|e| e.credential)
    }

    pub async fn count(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn stats(&self) -> LedgerStats {
        let state = self.state.read().await;
        let mut stats = LedgerStats {
            total: state.entries.len(),
            ..Default::default()
        };
        for entry in &state.entries {
            match entry.outcome {
                Outcome::Success => stats.success += 1,
                Outcome::Aborted => stats.aborted += 1,
                Outcome::Failed => stats.failed += 1,
            }
            stats.total_cost += entry.cost;
        }
        stats
    }

    /// Write a recorded credential's containers and an audit record into
    /// `dir`:
    /// - `<id>.desktop` - desktop container bytes
    /// - `<id>.session` - programmatic container bytes
    /// - `<id>.json` - triplet, key fingerprint and file names
    ///
    /// Each file is written to a temp path and renamed into place.
    #[instrument(skip(self, dir))]
    pub async fn export_credential(
        &self,
        attempt_id: &Uuid,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, LedgerError> {
        let entry = self
            .get(attempt_id)
            .await
            .ok_or(LedgerError::NotFound(*attempt_id))?;
        let credential = entry
            .credential
            .as_ref()
            .ok_or(LedgerError::NotFound(*attempt_id))?;

        fs::create_dir_all(dir).await?;
        let mut written = Vec::new();

        let desktop_file = match &credential.desktop_container {
            Some(bytes) => {
                let path = dir.join(format!("{}.desktop", attempt_id));
                write_atomic(&path, bytes).await?;
                written.push(path.clone());
                Some(file_name(&path))
            }
            None => None,
        };

        let session_file = match &credential.programmatic_container {
            Some(bytes) => {
                let path = dir.join(format!("{}.session", attempt_id));
                write_atomic(&path, bytes).await?;
                written.push(path.clone());
                Some(file_name(&path))
            }
            None => None,
        };

        let record = CredentialRecord {
            attempt_id: entry.attempt_id,
            phone_number: entry.phone_number.as_deref(),
            country: &entry.country,
            triplet: credential.triplet.as_ref(),
            key_id: credential.key_id.as_deref(),
            desktop_file,
            session_file,
            created_at: credential.created_at.to_rfc3339(),
        };
        let path = dir.join(format!("{}.json", attempt_id));
        write_atomic(&path, &serde_json::to_vec_pretty(&record)?).await?;
        written.push(path);

        info!(files = written.len(), "Exported credential");
        Ok(written)
    }
}

/// Human-readable companion file written next to exported containers.
#[derive(Serialize)]
struct CredentialRecord<'a> {
    attempt_id: Uuid,
    phone_number: Option<&'a str>,
    country: &'a str,
    triplet: Option<&'a session_codec::Triplet>,
    key_id: Option<&'a str>,
    desktop_file: Option<String>,
    session_file: Option<String>,
    created_at: String,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), LedgerError> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, data).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

type Parsed = (Vec<LedgerEntry>, HashMap<Uuid, usize>, usize);

/// Parse newline-terminated entries. Returns the entries, their index and the
/// byte length of the durable prefix.
fn parse_lines(data: &[u8]) -> Result<Parsed, LedgerError> {
    let mut entries = Vec::new();
    let mut by_id = HashMap::new();
    let mut durable_len = 0;

    for (i, segment) in data.split_inclusive(|b| *b == b'\n').enumerate() {
        if segment.last() != Some(&b'\n') {
            // Unterminated tail: the append never completed.
            break;
        }
        durable_len += segment.len();

        let line = &segment[..segment.len() - 1];
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let entry: LedgerEntry =
            serde_json::from_slice(line).map_err(|e| LedgerError::Corrupt {
                line: i + 1,
                reason: e.to_string(),
            })?;

        if by_id.insert(entry.attempt_id, entries.len()).is_some() {
            return Err(LedgerError::Corrupt {
                line: i + 1,
                reason: format!("duplicate attempt id {}", entry.attempt_id),
            });
        }
        entries.push(entry);
    }

    Ok((entries, by_id, durable_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        let (entries, by_id, len) = parse_lines(b"").unwrap();
        assert!(entries.is_empty());
        assert!(by_id.is_empty());
        assert_eq!(len, 0);
    }

    #[test]
    fn test_parse_stops_at_unterminated_tail() {
        let (entries, _, len) = parse_lines(b"\n\n{\"attempt_id\":").unwrap();
        assert!(entries.is_empty());
        assert_eq!(len, 2);
    }

    #[test]
    fn test_parse_rejects_garbage_line() {
        let err = parse_lines(b"\nnot json\n").unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { line: 2, .. }));
    }

    fn entry() -> LedgerEntry {
        let now = chrono::Utc::now();
        LedgerEntry {
            attempt_id: Uuid::new_v4(),
            country: "US".into(),
            price_ceiling: 2.0,
            outcome: Outcome::Failed,
            reason: Some(crate::types::FailureReason::CodeTimeout),
            failure_kind: Some(crate::types::FailureKind::FatalToAttempt),
            detail: None,
            phone_number: Some("+15550001111".into()),
            number_disposition: crate::types::NumberDisposition::Released,
            cost: 1.0,
            codes: Vec::new(),
            used_two_factor: false,
            mailbox: None,
            transitions: Vec::new(),
            notes: Vec::new(),
            credential: None,
            finalized_at: now,
        }
    }

    #[tokio::test]
    async fn test_failed_rollback_refuses_later_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let ledger = Ledger::open(&path).await.unwrap();
        ledger.record(entry()).await.unwrap();
        let durable = fs::read(&path).await.unwrap();

        if let Backend::File(file) = &mut ledger.state.write().await.backend {
            file.failed = Some("set_len: read-only filesystem".into());
        }

        let rejected = entry();
        let err = ledger.record(rejected.clone()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
        assert!(ledger.get(&rejected.attempt_id).await.is_none());
        assert_eq!(ledger.count().await, 1);
        assert_eq!(fs::read(&path).await.unwrap(), durable);
    }

    #[tokio::test]
    async fn test_memory_ledger_starts_empty() {
        let ledger = Ledger::memory();
        assert_eq!(ledger.count().await, 0);
        assert_eq!(ledger.stats().await, LedgerStats::default());
        assert!(ledger.get(&Uuid::new_v4()).await.is_none());
    }
}
