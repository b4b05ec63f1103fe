//! Cache key namespaces
//!
//! Keys are `prefix:identifier[:facet]` strings. The first segment names the
//! namespace (`user:`, `team:`, `list:`, `session:`); the first two segments
//! together name the owning object (`team:42`). Both are used as
//! invalidation scopes.

use std::fmt;

pub const USER_PREFIX: &str = "user:";
pub const TEAM_PREFIX: &str = "team:";
pub const LIST_PREFIX: &str = "list:";
pub const SESSION_PREFIX: &str = "session:";

/// Connection context of the current session
pub const SESSION_CONTEXT: &str = "session:context";
/// Every team visible to the signed-in principal
pub const ALL_TEAMS: &str = "list:teams:all";

/// Resolved user, keyed by lower-cased principal name
pub fn user(principal: &str) -> String {
    format!("{}{}", USER_PREFIX, principal.trim().to_lowercase())
}

pub fn team(team_id: &str) -> String {
    format!("{}{}", TEAM_PREFIX, team_id)
}

pub fn team_members(team_id: &str) -> String {
    format!("{}{}:members", TEAM_PREFIX, team_id)
}

pub fn team_channels(team_id: &str) -> String {
    format!("{}{}:channels", TEAM_PREFIX, team_id)
}

/// A group of keys that can be invalidated together
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every `user:` key
    Users,
    /// Every `team:` key
    Teams,
    /// Every key of one team: `team:{id}`, `team:{id}:members`, ...
    Team(String),
    /// Every `list:` key
    Lists,
    /// Every `session:` key
    Session,
    /// Any other prefix
    Custom(String),
}

impl Scope {
    pub fn team(team_id: impl Into<String>) -> Self {
        Scope::Team(team_id.into())
    }

    /// Scope token compared against entry tags
    pub fn token(&self) -> String {
        match self {
            Scope::Users => USER_PREFIX.to_string(),
            Scope::Teams => TEAM_PREFIX.to_string(),
            Scope::Team(id) => team(id),
            Scope::Lists => LIST_PREFIX.to_string(),
            Scope::Session => SESSION_PREFIX.to_string(),
            Scope::Custom(prefix) => prefix.clone(),
        }
    }

    /// Keys that always exist for this scope and are removed eagerly
    pub fn well_known_keys(&self) -> Vec<String> {
        match self {
            Scope::Users => Vec::new(),
            Scope::Teams => vec![ALL_TEAMS.to_string()],
            Scope::Team(id) => vec![team(id), team_members(id), team_channels(id)],
            Scope::Lists => vec![ALL_TEAMS.to_string()],
            Scope::Session => vec![SESSION_CONTEXT.to_string()],
            Scope::Custom(_) => Vec::new(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// Scope tokens implied by a key
///
/// `user:alice` → `["user:", "user:alice"]`,
/// `team:42:members` → `["team:", "team:42"]`. Keys without a `:` carry no
/// implicit scope.
pub fn scopes_for_key(key: &str) -> Vec<String> {
    let mut parts = key.splitn(3, ':');
    let (Some(ns), Some(id)) = (parts.next(), parts.next()) else {
        return Vec::new();
    };
    let mut scopes = vec![format!("{}:", ns)];
    if !id.is_empty() {
        scopes.push(format!("{}:{}", ns, id));
    }
    scopes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_builders() {
        assert_eq!(user(" Alice@School.EDU "), "user:alice@school.edu");
        assert_eq!(team("42"), "team:42");
        assert_eq!(team_members("42"), "team:42:members");
        assert_eq!(team_channels("42"), "team:42:channels");
    }

    #[test]
    fn test_scopes_for_key() {
        assert_eq!(scopes_for_key("user:alice"), vec!["user:", "user:alice"]);
        assert_eq!(scopes_for_key("team:42:members"), vec!["team:", "team:42"]);
        assert_eq!(scopes_for_key(ALL_TEAMS), vec!["list:", "list:teams"]);
        assert!(scopes_for_key("plain").is_empty());
    }

    #[test]
    fn test_team_scope_covers_team_keys() {
        let token = Scope::team("42").token();
        for key in Scope::team("42").well_known_keys() {
            assert!(scopes_for_key(&key).contains(&token), "{key}");
        }
    }
}
