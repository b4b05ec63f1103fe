//! Audit trail data model
//!
//! The trail is a sequence of [`AuditEvent`]s. Folding the events of one
//! operation yields its current [`OperationRecord`].

use crate::error::AuditError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    AddMembers,
    RemoveMembers,
    ArchiveTeams,
    UpdateTeamProperties,
    CreateChannel,
    /// Connect / reconnect attempts
    Connection,
    /// Single command that failed at the connection layer
    CommandExecution,
    /// Breaker state changes
    CircuitBreaker,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::AddMembers => "add_members",
            OperationType::RemoveMembers => "remove_members",
            OperationType::ArchiveTeams => "archive_teams",
            OperationType::UpdateTeamProperties => "update_team_properties",
            OperationType::CreateChannel => "create_channel",
            OperationType::Connection => "connection",
            OperationType::CommandExecution => "command_execution",
            OperationType::CircuitBreaker => "circuit_breaker",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add_members" => Ok(OperationType::AddMembers),
            "remove_members" => Ok(OperationType::RemoveMembers),
            "archive_teams" => Ok(OperationType::ArchiveTeams),
            "update_team_properties" => Ok(OperationType::UpdateTeamProperties),
            "create_channel" => Ok(OperationType::CreateChannel),
            "connection" => Ok(OperationType::Connection),
            "command_execution" => Ok(OperationType::CommandExecution),
            "circuit_breaker" => Ok(OperationType::CircuitBreaker),
            _ => Err(AuditError::invalid_value(s)),
        }
    }
}

/// Lifecycle status of an audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    PartialSuccess,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Completed => "completed",
            OperationStatus::PartialSuccess => "partial_success",
            OperationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::PartialSuccess | OperationStatus::Failed
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "in_progress" => Ok(OperationStatus::InProgress),
            "completed" => Ok(OperationStatus::Completed),
            "partial_success" => Ok(OperationStatus::PartialSuccess),
            "failed" => Ok(OperationStatus::Failed),
            _ => Err(AuditError::invalid_value(s)),
        }
    }
}

/// Identifier of one audited operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OperationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What happened to an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditPayload {
    Created {
        operation_type: OperationType,
        target_type: String,
        target_id: String,
        name: String,
    },
    Progress {
        processed: usize,
        failed: usize,
        total: usize,
    },
    Status {
        status: OperationStatus,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

/// One line of the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Timestamp (UTC)
    pub ts: DateTime<Utc>,
    pub operation_id: OperationId,
    #[serde(flatten)]
    pub payload: AuditPayload,
}

impl AuditEvent {
    pub fn new(operation_id: OperationId, payload: AuditPayload) -> Self {
        Self {
            ts: Utc::now(),
            operation_id,
            payload,
        }
    }
}

/// Current state of one operation, folded from its events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub operation_type: OperationType,
    pub target_type: String,
    pub target_id: String,
    pub name: String,
    pub status: OperationStatus,
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
    pub message: Option<String>,
    /// Exception details, in the order they were recorded
    pub details: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OperationRecord {
    fn apply(&mut self, event: &AuditEvent) {
        self.updated_at = event.ts;
        match &event.payload {
            AuditPayload::Created { .. } => {}
            AuditPayload::Progress {
                processed,
                failed,
                total,
            } => {
                self.processed = *processed;
                self.failed = *failed;
                self.total = *total;
                if self.status == OperationStatus::Pending {
                    self.status = OperationStatus::InProgress;
                }
            }
            AuditPayload::Status {
                status,
                message,
                detail,
            } => {
                self.status = *status;
                self.message = Some(message.clone());
                if let Some(d) = detail {
                    self.details.push(d.clone());
                }
            }
        }
    }
}

/// Fold events into per-operation records, in creation order
///
/// Events for operations with no `Created` event are ignored.
pub fn summarize<'a, I>(events: I) -> Vec<OperationRecord>
where
    I: IntoIterator<Item = &'a AuditEvent>,
{
    let mut order: Vec<OperationId> = Vec::new();
    let mut records: HashMap<OperationId, OperationRecord> = HashMap::new();

    for event in events {
        match &event.payload {
            AuditPayload::Created {
                operation_type,
                target_type,
                target_id,
                name,
            } => {
                if !records.contains_key(&event.operation_id) {
                    order.push(event.operation_id.clone());
                }
                records.insert(
                    event.operation_id.clone(),
                    OperationRecord {
                        id: event.operation_id.clone(),
                        operation_type: *operation_type,
                        target_type: target_type.clone(),
                        target_id: target_id.clone(),
                        name: name.clone(),
                        status: OperationStatus::Pending,
                        processed: 0,
                        failed: 0,
                        total: 0,
                        message: None,
                        details: Vec::new(),
                        created_at: event.ts,
                        updated_at: event.ts,
                    },
                );
            }
            _ => {
                if let Some(record) = records.get_mut(&event.operation_id) {
                    record.apply(event);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| records.remove(&id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(id: &str) -> AuditEvent {
        AuditEvent::new(
            id.into(),
            AuditPayload::Created {
                operation_type: OperationType::AddMembers,
                target_type: "team".into(),
                target_id: "t-1".into(),
                name: "Add 3 members".into(),
            },
        )
    }

    #[test]
    fn test_enum_roundtrip_strings() {
        for t in [
            OperationType::AddMembers,
            OperationType::ArchiveTeams,
            OperationType::CircuitBreaker,
        ] {
            assert_eq!(t.as_str().parse::<OperationType>().unwrap(), t);
        }
        assert!("bogus".parse::<OperationStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&OperationStatus::PartialSuccess).unwrap(),
            "\"partial_success\""
        );
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(created("op-1")).unwrap();
        assert_eq!(json["event"], "created");
        assert_eq!(json["operation_id"], "op-1");
        assert_eq!(json["operation_type"], "add_members");

        let back: AuditEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.operation_id.as_str(), "op-1");
    }

    #[test]
    fn test_summarize_folds_events() {
        let events = vec![
            created("op-1"),
            AuditEvent::new(
                "op-1".into(),
                AuditPayload::Progress {
                    processed: 1,
                    failed: 1,
                    total: 3,
                },
            ),
            AuditEvent::new(
                "op-1".into(),
                AuditPayload::Status {
                    status: OperationStatus::InProgress,
                    message: "chunk failed".into(),
                    detail: Some("User x not found".into()),
                },
            ),
            AuditEvent::new(
                "orphan".into(),
                AuditPayload::Progress {
                    processed: 9,
                    failed: 0,
                    total: 9,
                },
            ),
            AuditEvent::new(
                "op-1".into(),
                AuditPayload::Status {
                    status: OperationStatus::PartialSuccess,
                    message: "2 of 3 succeeded".into(),
                    detail: None,
                },
            ),
        ];

        let records = summarize(&events);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.status, OperationStatus::PartialSuccess);
        assert_eq!((r.processed, r.failed, r.total), (1, 1, 3));
        assert_eq!(r.details, vec!["User x not found".to_string()]);
        assert_eq!(r.message.as_deref(), Some("2 of 3 succeeded"));
    }

    #[test]
    fn test_operation_ids_unique() {
        assert_ne!(OperationId::generate(), OperationId::generate());
    }
}
