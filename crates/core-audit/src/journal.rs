//! Append-only JSON Lines audit journal
//!
//! One [`AuditEvent`] per line, flushed on every write. The journal can be
//! read back with [`parse_journal`] and folded with [`crate::summarize`].

use crate::error::{AuditError, Result};
use crate::record::{AuditEvent, AuditPayload, OperationId, OperationStatus, OperationType};
use crate::sink::{created_event, AuditSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Audit sink backed by a JSON Lines file
///
/// # Example
/// ```no_run
/// use roster_core_audit::{AuditSink, JournalAuditSink, OperationStatus, OperationType};
///
/// # async fn example() -> roster_core_audit::Result<()> {
/// let journal = JournalAuditSink::open("audit.jsonl")?;
/// let id = journal
///     .create_operation_entry(OperationType::AddMembers, "team", "t-1", "Add 120 members")
///     .await?;
/// journal.update_progress(&id, 50, 0, 120).await?;
/// journal.update_status(&id, OperationStatus::Completed, "120 members added", None).await?;
/// # Ok(())
/// # }
/// ```
pub struct JournalAuditSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl std::fmt::Debug for JournalAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalAuditSink")
            .field("path", &self.path)
            .finish()
    }
}

impl JournalAuditSink {
    /// Open or create the journal in append mode
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|_| AuditError::open_failed(&path))?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &AuditEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for JournalAuditSink {
    async fn create_operation_entry(
        &self,
        operation_type: OperationType,
        target_type: &str,
        target_id: &str,
        name: &str,
    ) -> Result<OperationId> {
        let event = created_event(operation_type, target_type, target_id, name);
        self.append(&event)?;
        Ok(event.operation_id)
    }

    async fn update_progress(
        &self,
        id: &OperationId,
        processed: usize,
        failed: usize,
        total: usize,
    ) -> Result<()> {
        self.append(&AuditEvent::new(
            id.clone(),
            AuditPayload::Progress {
                processed,
                failed,
                total,
            },
        ))
    }

    async fn update_status(
        &self,
        id: &OperationId,
        status: OperationStatus,
        message: &str,
        detail: Option<&str>,
    ) -> Result<()> {
        self.append(&AuditEvent::new(
            id.clone(),
            AuditPayload::Status {
                status,
                message: message.to_string(),
                detail: detail.map(str::to_string),
            },
        ))
    }
}

/// Read every event from a journal, skipping blank lines
pub fn parse_journal<P: AsRef<Path>>(path: P) -> Result<Vec<AuditEvent>> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: AuditEvent = serde_json::from_str(&line)
            .map_err(|e| AuditError::invalid_entry(idx + 1, e.to_string()))?;
        events.push(event);
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::summarize;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_journal_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("audit.jsonl");
        let journal = JournalAuditSink::open(&path).unwrap();

        let id = journal
            .create_operation_entry(OperationType::RemoveMembers, "team", "t-9", "Remove 2")
            .await
            .unwrap();
        journal.update_progress(&id, 1, 1, 2).await.unwrap();
        journal
            .update_status(
                &id,
                OperationStatus::PartialSuccess,
                "1 of 2 removed",
                Some("User bob not found"),
            )
            .await
            .unwrap();

        let events = parse_journal(&path).unwrap();
        assert_eq!(events.len(), 3);

        let records = summarize(&events);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].status, OperationStatus::PartialSuccess);
        assert_eq!(records[0].details, vec!["User bob not found".to_string()]);
    }

    #[tokio::test]
    async fn test_journal_appends_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");

        for _ in 0..2 {
            let journal = JournalAuditSink::open(&path).unwrap();
            journal
                .create_operation_entry(OperationType::Connection, "session", "p", "connect")
                .await
                .unwrap();
        }

        assert_eq!(parse_journal(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_skips_blank_lines_and_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");

        let event = AuditEvent::new(
            "op-1".into(),
            AuditPayload::Progress {
                processed: 0,
                failed: 0,
                total: 1,
            },
        );
        let line = serde_json::to_string(&event).unwrap();
        std::fs::write(&path, format!("{}\n\n{}\n", line, line)).unwrap();
        assert_eq!(parse_journal(&path).unwrap().len(), 2);

        std::fs::write(&path, format!("{}\nnot json\n", line)).unwrap();
        match parse_journal(&path) {
            Err(AuditError::InvalidEntry { line, .. }) => assert_eq!(line, 2),
            other => panic!("Expected InvalidEntry, got {:?}", other),
        }
    }
}
