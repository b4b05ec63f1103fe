/*!
 * Group service: teams, channels and membership
 *
 * Reads go through the shared cache. Writes invalidate the scopes they touch
 * and are audited. Bulk changes are delegated to the [`BulkOrchestrator`].
 */

use crate::error::{Result, RosterError};
use roster_bulk::{
    resolve_users, AddMembers, ArchiveTeams, BatchJob, BulkOperation, BulkOrchestrator,
    CancellationToken, MemberRole, RemoveMembers, UpdateTeamProperties,
};
use roster_connect::{ConnectionHealth, ConnectionManager};
use roster_core_audit::{OperationStatus, OperationType};
use roster_core_cache::{keys, Scope};
use roster_core_interface::{CommandOutput, CommandScript, Record};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const GET_TEAM_COMMAND: &str = "Get-Team";
pub const GET_CHANNELS_COMMAND: &str = "Get-TeamChannel";
pub const GET_MEMBERS_COMMAND: &str = "Get-TeamUser";
pub const CREATE_CHANNEL_COMMAND: &str = "New-TeamChannel";

/// A team as returned by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Team {
    #[serde(rename = "GroupId")]
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub archived: bool,
}

/// A channel of a team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Channel {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub membership_type: Option<String>,
}

/// A member of a team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Member {
    #[serde(rename = "UserId")]
    pub user_id: String,
    #[serde(rename = "User")]
    pub user_principal_name: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Parameters of a new channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewChannel {
    pub display_name: String,
    pub description: Option<String>,
    /// `standard` or `private`; the service default when `None`
    pub membership_type: Option<String>,
}

impl NewChannel {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn private(mut self) -> Self {
        self.membership_type = Some("private".to_string());
        self
    }
}

fn parse_record<T: DeserializeOwned>(record: &Record, what: &str) -> Result<T> {
    serde_json::from_value(Value::Object(record.clone()))
        .map_err(|e| RosterError::UnexpectedResponse(format!("{}: {}", what, e)))
}

fn parse_all<T: DeserializeOwned>(output: &CommandOutput, what: &str) -> Result<Vec<T>> {
    output
        .records
        .iter()
        .map(|record| parse_record(record, what))
        .collect()
}

/// Domain entry point over one connection
#[derive(Clone)]
pub struct GroupService {
    connection: Arc<ConnectionManager>,
    orchestrator: BulkOrchestrator,
}

impl std::fmt::Debug for GroupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupService")
            .field("health", &self.connection.connection_health())
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

impl GroupService {
    pub fn new(connection: Arc<ConnectionManager>, orchestrator: BulkOrchestrator) -> Self {
        Self {
            connection,
            orchestrator,
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn orchestrator(&self) -> &BulkOrchestrator {
        &self.orchestrator
    }

    /// Health snapshot without I/O
    pub fn health(&self) -> ConnectionHealth {
        self.connection.connection_health()
    }

    /// Directory id of a user principal name
    pub async fn resolve_user(&self, principal: &str) -> Result<String> {
        let principal = principal.trim();
        let resolution = resolve_users(&self.connection, &[principal.to_string()]).await?;
        if let Some((_, id)) = resolution.resolved.into_iter().next() {
            return Ok(id);
        }
        match resolution.lookup_error {
            Some(detail) => Err(RosterError::UnexpectedResponse(detail)),
            None => Err(RosterError::NotFound(format!("user {}", principal))),
        }
    }

    /// One team, cached
    pub async fn get_team(&self, team_id: &str) -> Result<Team> {
        let cache = self.connection.cache();
        let ttl = cache.config().default_ttl;
        cache
            .get_or_try_insert_with(&keys::team(team_id), ttl, || async {
                debug!(team = team_id, "Fetching team");
                let script = CommandScript::new(GET_TEAM_COMMAND).param("GroupId", team_id);
                let output = self.connection.execute(&script).await?;
                match output.first() {
                    Some(record) => parse_record::<Team>(record, "team"),
                    None => Err(RosterError::NotFound(format!("team {}", team_id))),
                }
            })
            .await
    }

    /// Every team, cached briefly
    pub async fn list_teams(&self) -> Result<Vec<Team>> {
        let cache = self.connection.cache();
        let ttl = cache.config().volatile_ttl;
        cache
            .get_or_try_insert_with(keys::ALL_TEAMS, ttl, || async {
                let output = self
                    .connection
                    .execute(&CommandScript::new(GET_TEAM_COMMAND))
                    .await?;
                let teams = parse_all::<Team>(&output, "team list")?;
                debug!(count = teams.len(), "Fetched team list");
                Ok::<_, RosterError>(teams)
            })
            .await
    }

    /// Channels of a team, cached
    pub async fn list_channels(&self, team_id: &str) -> Result<Vec<Channel>> {
        let cache = self.connection.cache();
        let ttl = cache.config().default_ttl;
        cache
            .get_or_try_insert_with(&keys::team_channels(team_id), ttl, || async {
                let script = CommandScript::new(GET_CHANNELS_COMMAND).param("GroupId", team_id);
                let output = self.connection.execute(&script).await?;
                parse_all::<Channel>(&output, "channel list")
            })
            .await
    }

    /// Members of a team, cached briefly
    pub async fn list_members(&self, team_id: &str) -> Result<Vec<Member>> {
        let cache = self.connection.cache();
        let ttl = cache.config().volatile_ttl;
        cache
            .get_or_try_insert_with(&keys::team_members(team_id), ttl, || async {
                let script = CommandScript::new(GET_MEMBERS_COMMAND).param("GroupId", team_id);
                let output = self.connection.execute(&script).await?;
                parse_all::<Member>(&output, "member list")
            })
            .await
    }

    /// Create a channel and drop everything cached for its team
    pub async fn create_channel(&self, team_id: &str, channel: NewChannel) -> Result<Channel> {
        let name = format!("Create channel '{}'", channel.display_name);
        let script = CommandScript::new(CREATE_CHANNEL_COMMAND)
            .param("GroupId", team_id)
            .param("DisplayName", channel.display_name.as_str())
            .param_opt("Description", channel.description.clone())
            .param_opt("MembershipType", channel.membership_type.clone());

        let created = match self.connection.execute(&script).await {
            Ok(output) => match output.first() {
                Some(record) => parse_record::<Channel>(record, "channel"),
                None => Err(RosterError::UnexpectedResponse(format!(
                    "{} returned no channel",
                    CREATE_CHANNEL_COMMAND
                ))),
            },
            Err(e) => Err(e.into()),
        };

        let audit = self.connection.audit();
        match created {
            Ok(created) => {
                self.connection.cache().invalidate_group(&Scope::team(team_id));
                audit
                    .record(
                        OperationType::CreateChannel,
                        "team",
                        team_id,
                        OperationStatus::Completed,
                        &name,
                        None,
                    )
                    .await;
                info!(team = team_id, channel = %created.id, "Channel created");
                Ok(created)
            }
            Err(e) => {
                warn!(team = team_id, error = %e, "Channel creation failed");
                let detail = e.to_string();
                audit
                    .record(
                        OperationType::CreateChannel,
                        "team",
                        team_id,
                        OperationStatus::Failed,
                        &name,
                        Some(detail.as_str()),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn run_bulk(
        &self,
        op: Arc<dyn BulkOperation>,
        items: Vec<String>,
        cancel: Option<CancellationToken>,
    ) -> BatchJob {
        match cancel {
            Some(token) => self.orchestrator.run_with_cancel(op, items, token).await,
            None => self.orchestrator.run(op, items).await,
        }
    }

    /// Add users (by principal name) to a team
    pub async fn add_members(
        &self,
        team_id: &str,
        principals: Vec<String>,
        role: MemberRole,
        cancel: Option<CancellationToken>,
    ) -> Result<BatchJob> {
        let op = AddMembers::new(team_id, role)?;
        Ok(self.run_bulk(Arc::new(op), principals, cancel).await)
    }

    /// Remove users (by principal name) from a team
    pub async fn remove_members(
        &self,
        team_id: &str,
        principals: Vec<String>,
        cancel: Option<CancellationToken>,
    ) -> Result<BatchJob> {
        let op = RemoveMembers::new(team_id)?;
        Ok(self.run_bulk(Arc::new(op), principals, cancel).await)
    }

    /// Archive teams, or unarchive them when `archived` is false
    pub async fn archive_teams(
        &self,
        team_ids: Vec<String>,
        archived: bool,
        cancel: Option<CancellationToken>,
    ) -> Result<BatchJob> {
        let op = if archived {
            ArchiveTeams::new()
        } else {
            ArchiveTeams::unarchive()
        };
        Ok(self.run_bulk(Arc::new(op), team_ids, cancel).await)
    }

    /// Apply the same properties to many teams
    pub async fn update_team_properties(
        &self,
        team_ids: Vec<String>,
        properties: Map<String, Value>,
        cancel: Option<CancellationToken>,
    ) -> Result<BatchJob> {
        let op = UpdateTeamProperties::new(properties)?;
        Ok(self.run_bulk(Arc::new(op), team_ids, cancel).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_parse_team() {
        let team: Team = parse_record(
            &record(json!({
                "GroupId": "t-1",
                "DisplayName": "Biology 101",
                "Visibility": "Private",
                "Archived": true,
                "MailNickName": "bio101"
            })),
            "team",
        )
        .unwrap();
        assert_eq!(team.id, "t-1");
        assert_eq!(team.display_name, "Biology 101");
        assert_eq!(team.visibility.as_deref(), Some("Private"));
        assert!(team.archived);
        assert!(team.description.is_none());
    }

    #[test]
    fn test_parse_missing_field_is_unexpected_response() {
        let err = parse_record::<Team>(&record(json!({"DisplayName": "x"})), "team").unwrap_err();
        assert!(matches!(err, RosterError::UnexpectedResponse(_)));
    }

    #[test]
    fn test_parse_members() {
        let output = CommandOutput::from_json(json!([
            {"UserId": "u-1", "User": "ana@school.edu", "Role": "Owner"},
            {"UserId": "u-2", "User": "ben@school.edu"}
        ]));
        let members: Vec<Member> = parse_all(&output, "member list").unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].role.as_deref(), Some("Owner"));
        assert_eq!(members[1].user_principal_name, "ben@school.edu");
    }

    #[test]
    fn test_new_channel_builder() {
        let channel = NewChannel::new("Labs").description("Lab work").private();
        assert_eq!(channel.display_name, "Labs");
        assert_eq!(channel.description.as_deref(), Some("Lab work"));
        assert_eq!(channel.membership_type.as_deref(), Some("private"));
    }
}
