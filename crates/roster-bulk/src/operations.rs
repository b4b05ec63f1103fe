//! Bulk operations
//!
//! Each operation turns one chunk of targets into one batched remote command.
//! Member operations resolve user principal names to directory ids first,
//! cache-first, with a single lookup command for the misses.
//!
//! A chunk returns `Err` only for connection-layer failures, which abort the
//! whole batch. Business errors and exhausted transient errors fail the
//! chunk's items and are reported through [`ChunkOutcome::command_error`].

use crate::error::BulkError;
use crate::job::ItemResult;
use async_trait::async_trait;
use roster_connect::{ConnectError, ConnectionManager};
use roster_core_audit::OperationType;
use roster_core_cache::{keys, Scope};
use roster_core_interface::{CommandOutput, CommandScript};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

pub const LOOKUP_USERS_COMMAND: &str = "Get-DirectoryUser";
pub const ADD_MEMBERS_COMMAND: &str = "Add-TeamUser";
pub const REMOVE_MEMBERS_COMMAND: &str = "Remove-TeamUser";
pub const ARCHIVE_TEAMS_COMMAND: &str = "Set-TeamArchivedState";
pub const UPDATE_TEAMS_COMMAND: &str = "Set-Team";

/// Scope token shared by every cached team list
const TEAM_LISTS: &str = "list:teams";

const USER_NOT_FOUND: &str = "User not found in directory";

/// Results of one chunk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkOutcome {
    pub results: Vec<ItemResult>,
    /// Set when the chunk's remote command failed
    pub command_error: Option<String>,
}

impl ChunkOutcome {
    /// Every item failed with the same error
    pub fn failed(items: &[String], detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            results: items
                .iter()
                .map(|key| ItemResult::failure(key.clone(), detail.clone()))
                .collect(),
            command_error: Some(detail),
        }
    }

    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Fold in the result of the chunk's batched command
    ///
    /// `targets` pairs each item key with the remote id it was sent as.
    /// Records whose `field` matches a remote id and carry a non-empty
    /// `Error` fail that item only.
    fn apply(
        &mut self,
        targets: &[(String, String)],
        result: Result<CommandOutput, ConnectError>,
        field: &str,
    ) -> Result<(), ConnectError> {
        match result {
            Ok(output) => {
                let errors = item_errors(&output, field);
                for (key, remote_id) in targets {
                    self.results.push(match errors.get(remote_id.as_str()) {
                        Some(error) => ItemResult::failure(key.clone(), error.clone()),
                        None => ItemResult::success(key.clone()),
                    });
                }
                Ok(())
            }
            Err(e) if e.is_connection_layer() => Err(e),
            Err(e) => {
                let detail = e.to_string();
                for (key, _) in targets {
                    self.results
                        .push(ItemResult::failure(key.clone(), detail.clone()));
                }
                self.command_error.get_or_insert(detail);
                Ok(())
            }
        }
    }
}

/// Per-item errors reported inside a successful command output
fn item_errors<'a>(output: &'a CommandOutput, field: &str) -> HashMap<&'a str, String> {
    output
        .records
        .iter()
        .filter_map(|record| {
            let id = record.get(field).and_then(Value::as_str)?;
            let error = record
                .get("Error")
                .and_then(Value::as_str)
                .filter(|e| !e.is_empty())?;
            Some((id, error.to_string()))
        })
        .collect()
}

/// A bulk operation over a list of targets
#[async_trait]
pub trait BulkOperation: Send + Sync + 'static {
    fn operation_type(&self) -> OperationType;

    /// Audit target type, e.g. `team`
    fn target_type(&self) -> &str;

    /// Audit target id; `*` when the targets are the items themselves
    fn target_id(&self) -> String;

    /// Audit entry name for a batch of `item_count` targets
    fn describe(&self, item_count: usize) -> String;

    /// Canonical form of a target; duplicates are detected on this form
    fn normalize(&self, item: &str) -> String {
        item.trim().to_string()
    }

    /// Run one chunk; `Err` aborts the batch
    async fn run_chunk(
        &self,
        connection: &ConnectionManager,
        items: &[String],
    ) -> Result<ChunkOutcome, ConnectError>;

    /// Cache scopes to invalidate once the batch finishes
    fn affected_scopes(&self, items: &[String]) -> Vec<Scope>;
}

/// Role granted by [`AddMembers`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemberRole {
    #[default]
    Member,
    Owner,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Member => "Member",
            MemberRole::Owner => "Owner",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemberRole {
    type Err = BulkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "member" => Ok(MemberRole::Member),
            "owner" => Ok(MemberRole::Owner),
            _ => Err(BulkError::InvalidOperation(format!("Invalid role: {}", s))),
        }
    }
}

fn require_team_id(team_id: String) -> Result<String, BulkError> {
    let team_id = team_id.trim().to_string();
    if team_id.is_empty() {
        return Err(BulkError::InvalidOperation("team id must not be empty".into()));
    }
    Ok(team_id)
}

fn normalize_principal(item: &str) -> String {
    item.trim().to_lowercase()
}

/// Principal names that resolved to directory ids, and those that did not
#[derive(Debug, Default)]
pub struct Resolution {
    /// `(principal, directory id)` in input order of the hits, then the lookups
    pub resolved: Vec<(String, String)>,
    pub unresolved: Vec<ItemResult>,
    /// Set when the lookup command itself failed
    pub lookup_error: Option<String>,
}

/// Resolve principal names to directory ids, cache-first
///
/// Misses are looked up with one command and stored in the cache. Principals
/// the directory does not return fail individually.
pub async fn resolve_users(
    connection: &ConnectionManager,
    principals: &[String],
) -> Result<Resolution, ConnectError> {
    let cache = connection.cache();
    let mut resolution = Resolution::default();
    let mut misses = Vec::new();

    for principal in principals {
        match cache.get::<String>(&keys::user(principal)) {
            Some(id) => resolution.resolved.push((principal.clone(), id)),
            None => misses.push(principal.clone()),
        }
    }

    if misses.is_empty() {
        return Ok(resolution);
    }

    debug!(
        hits = resolution.resolved.len(),
        misses = misses.len(),
        "Looking up directory ids"
    );

    let script =
        CommandScript::new(LOOKUP_USERS_COMMAND).param("UserPrincipalNames", json!(misses));
    match connection.execute(&script).await {
        Ok(output) => {
            let mut found: HashMap<String, String> = output
                .records
                .iter()
                .filter_map(|record| {
                    let upn = record.get("UserPrincipalName").and_then(Value::as_str)?;
                    let id = record.get("Id").and_then(Value::as_str)?;
                    Some((normalize_principal(upn), id.to_string()))
                })
                .collect();

            for principal in misses {
                match found.remove(&normalize_principal(&principal)) {
                    Some(id) => {
                        cache.set(&keys::user(&principal), id.clone());
                        resolution.resolved.push((principal, id));
                    }
                    None => resolution
                        .unresolved
                        .push(ItemResult::failure(principal, USER_NOT_FOUND)),
                }
            }
        }
        Err(e) if e.is_connection_layer() => return Err(e),
        Err(e) => {
            let detail = e.to_string();
            resolution.unresolved.extend(
                misses
                    .into_iter()
                    .map(|principal| ItemResult::failure(principal, detail.clone())),
            );
            resolution.lookup_error = Some(detail);
        }
    }

    Ok(resolution)
}

/// Resolve the chunk, then run `build(ids)` for the resolved principals
async fn change_membership<F>(
    connection: &ConnectionManager,
    items: &[String],
    build: F,
) -> Result<ChunkOutcome, ConnectError>
where
    F: FnOnce(Vec<String>) -> CommandScript + Send,
{
    let resolution = resolve_users(connection, items).await?;
    let mut outcome = ChunkOutcome {
        results: resolution.unresolved,
        command_error: resolution.lookup_error,
    };
    if resolution.resolved.is_empty() {
        return Ok(outcome);
    }

    let ids = resolution.resolved.iter().map(|(_, id)| id.clone()).collect();
    let result = connection.execute(&build(ids)).await;
    outcome.apply(&resolution.resolved, result, "User")?;
    Ok(outcome)
}

/// Add users to a team
#[derive(Debug, Clone)]
pub struct AddMembers {
    pub team_id: String,
    pub role: MemberRole,
}

impl AddMembers {
    pub fn new(team_id: impl Into<String>, role: MemberRole) -> Result<Self, BulkError> {
        Ok(Self {
            team_id: require_team_id(team_id.into())?,
            role,
        })
    }
}

#[async_trait]
impl BulkOperation for AddMembers {
    fn operation_type(&self) -> OperationType {
        OperationType::AddMembers
    }

    fn target_type(&self) -> &str {
        "team"
    }

    fn target_id(&self) -> String {
        self.team_id.clone()
    }

    fn describe(&self, item_count: usize) -> String {
        format!(
            "Add {} {}(s) to team {}",
            item_count,
            self.role.as_str().to_lowercase(),
            self.team_id
        )
    }

    fn normalize(&self, item: &str) -> String {
        normalize_principal(item)
    }

    async fn run_chunk(
        &self,
        connection: &ConnectionManager,
        items: &[String],
    ) -> Result<ChunkOutcome, ConnectError> {
        change_membership(connection, items, |ids| {
            CommandScript::new(ADD_MEMBERS_COMMAND)
                .param("GroupId", self.team_id.as_str())
                .param("Users", json!(ids))
                .param("Role", self.role.as_str())
        })
        .await
    }

    fn affected_scopes(&self, _items: &[String]) -> Vec<Scope> {
        vec![Scope::team(&self.team_id)]
    }
}

/// Remove users from a team
#[derive(Debug, Clone)]
pub struct RemoveMembers {
    pub team_id: String,
}

impl RemoveMembers {
    pub fn new(team_id: impl Into<String>) -> Result<Self, BulkError> {
        Ok(Self {
            team_id: require_team_id(team_id.into())?,
        })
    }
}

#[async_trait]
impl BulkOperation for RemoveMembers {
    fn operation_type(&self) -> OperationType {
        OperationType::RemoveMembers
    }

    fn target_type(&self) -> &str {
        "team"
    }

    fn target_id(&self) -> String {
        self.team_id.clone()
    }

    fn describe(&self, item_count: usize) -> String {
        format!("Remove {} member(s) from team {}", item_count, self.team_id)
    }

    fn normalize(&self, item: &str) -> String {
        normalize_principal(item)
    }

    async fn run_chunk(
        &self,
        connection: &ConnectionManager,
        items: &[String],
    ) -> Result<ChunkOutcome, ConnectError> {
        change_membership(connection, items, |ids| {
            CommandScript::new(REMOVE_MEMBERS_COMMAND)
                .param("GroupId", self.team_id.as_str())
                .param("Users", json!(ids))
        })
        .await
    }

    fn affected_scopes(&self, _items: &[String]) -> Vec<Scope> {
        vec![Scope::team(&self.team_id)]
    }
}

fn team_scopes(items: &[String]) -> Vec<Scope> {
    items
        .iter()
        .map(Scope::team)
        .chain(std::iter::once(Scope::Custom(TEAM_LISTS.to_string())))
        .collect()
}

/// Run one command over a chunk of team ids
async fn update_teams(
    connection: &ConnectionManager,
    items: &[String],
    script: CommandScript,
) -> Result<ChunkOutcome, ConnectError> {
    let targets: Vec<(String, String)> = items.iter().map(|id| (id.clone(), id.clone())).collect();
    let mut outcome = ChunkOutcome::default();
    let result = connection.execute(&script.param("GroupIds", json!(items))).await;
    outcome.apply(&targets, result, "GroupId")?;
    Ok(outcome)
}

/// Archive (or unarchive) teams
#[derive(Debug, Clone)]
pub struct ArchiveTeams {
    pub archived: bool,
}

impl ArchiveTeams {
    pub fn new() -> Self {
        Self { archived: true }
    }

    pub fn unarchive() -> Self {
        Self { archived: false }
    }
}

impl Default for ArchiveTeams {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BulkOperation for ArchiveTeams {
    fn operation_type(&self) -> OperationType {
        OperationType::ArchiveTeams
    }

    fn target_type(&self) -> &str {
        "teams"
    }

    fn target_id(&self) -> String {
        "*".to_string()
    }

    fn describe(&self, item_count: usize) -> String {
        let verb = if self.archived { "Archive" } else { "Unarchive" };
        format!("{} {} team(s)", verb, item_count)
    }

    async fn run_chunk(
        &self,
        connection: &ConnectionManager,
        items: &[String],
    ) -> Result<ChunkOutcome, ConnectError> {
        let script = CommandScript::new(ARCHIVE_TEAMS_COMMAND).param("Archived", self.archived);
        update_teams(connection, items, script).await
    }

    fn affected_scopes(&self, items: &[String]) -> Vec<Scope> {
        team_scopes(items)
    }
}

/// Set the same properties on many teams
#[derive(Debug, Clone)]
pub struct UpdateTeamProperties {
    pub properties: Map<String, Value>,
}

impl UpdateTeamProperties {
    pub fn new(properties: Map<String, Value>) -> Result<Self, BulkError> {
        if properties.is_empty() {
            return Err(BulkError::InvalidOperation(
                "at least one property is required".into(),
            ));
        }
        if properties.contains_key("GroupIds") {
            return Err(BulkError::InvalidOperation(
                "GroupIds is set per chunk and cannot be a property".into(),
            ));
        }
        Ok(Self { properties })
    }
}

#[async_trait]
impl BulkOperation for UpdateTeamProperties {
    fn operation_type(&self) -> OperationType {
        OperationType::UpdateTeamProperties
    }

    fn target_type(&self) -> &str {
        "teams"
    }

    fn target_id(&self) -> String {
        "*".to_string()
    }

    fn describe(&self, item_count: usize) -> String {
        let names: Vec<&str> = self.properties.keys().map(String::as_str).collect();
        format!("Update {} on {} team(s)", names.join(", "), item_count)
    }

    async fn run_chunk(
        &self,
        connection: &ConnectionManager,
        items: &[String],
    ) -> Result<ChunkOutcome, ConnectError> {
        let script = self
            .properties
            .iter()
            .fold(CommandScript::new(UPDATE_TEAMS_COMMAND), |script, (key, value)| {
                script.param(key.as_str(), value.clone())
            });
        update_teams(connection, items, script).await
    }

    fn affected_scopes(&self, items: &[String]) -> Vec<Scope> {
        team_scopes(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core_interface::Record;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn test_item_errors_only_reports_failures() {
        let output = CommandOutput::from_records(vec![
            record(&[("User", "u-1"), ("Error", "Already a member")]),
            record(&[("User", "u-2"), ("Error", "")]),
            record(&[("User", "u-3")]),
        ]);

        let errors = item_errors(&output, "User");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.get("u-1").map(String::as_str), Some("Already a member"));
    }

    #[test]
    fn test_apply_business_error_fails_targets() {
        let targets = vec![("a".to_string(), "a".to_string()), ("b".to_string(), "b".to_string())];
        let err = ConnectError::Command(roster_connect::CommandError {
            script: "Set-Team".into(),
            kind: roster_core_interface::EngineErrorKind::InvalidInput,
            message: "bad".into(),
            attempts: 1,
        });

        let mut outcome = ChunkOutcome::default();
        outcome.apply(&targets, Err(err), "GroupId").unwrap();
        assert_eq!(outcome.succeeded_count(), 0);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.command_error.is_some());
    }

    #[test]
    fn test_apply_connection_error_propagates() {
        let targets = vec![("a".to_string(), "a".to_string())];
        let mut outcome = ChunkOutcome::default();
        let result = outcome.apply(
            &targets,
            Err(ConnectError::NotConnected("gone".into())),
            "GroupId",
        );
        assert!(result.is_err());
        assert!(outcome.results.is_empty());
    }

    #[test]
    fn test_member_role_parse() {
        assert_eq!("Owner".parse::<MemberRole>().unwrap(), MemberRole::Owner);
        assert_eq!("member".parse::<MemberRole>().unwrap(), MemberRole::Member);
        assert!("guest".parse::<MemberRole>().is_err());
    }

    #[test]
    fn test_constructors_validate() {
        assert!(AddMembers::new("  ", MemberRole::Member).is_err());
        assert!(RemoveMembers::new("t-1").is_ok());
        assert!(UpdateTeamProperties::new(Map::new()).is_err());

        let mut props = Map::new();
        props.insert("GroupIds".into(), json!(["x"]));
        assert!(UpdateTeamProperties::new(props).is_err());
    }

    #[test]
    fn test_member_ops_normalize_principals() {
        let op = AddMembers::new("t-1", MemberRole::Member).unwrap();
        assert_eq!(op.normalize(" Alice@School.EDU "), "alice@school.edu");
        assert_eq!(ArchiveTeams::new().normalize(" T-1 "), "T-1");
    }

    #[test]
    fn test_affected_scopes() {
        let op = RemoveMembers::new("t-9").unwrap();
        assert_eq!(op.affected_scopes(&[]), vec![Scope::team("t-9")]);

        let scopes = ArchiveTeams::new().affected_scopes(&["a".to_string(), "b".to_string()]);
        assert_eq!(scopes.len(), 3);
        assert!(scopes.contains(&Scope::team("b")));
    }
}
