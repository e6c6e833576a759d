//! Connection settings.
//!
//! Four string settings: URL, username, password and an optional database
//! name. They come from a section of a JSON configuration tree, a JSON
//! string, or `NEO4J_*` environment variables.
//!
//! ```json
//! { "Neo4j": { "Url": "memory://app", "Username": "neo4j", "Password": "secret", "Database": "" } }
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::driver::{AuthToken, SessionConfig};
use crate::tx::AccessMode;
use crate::{Error, Result};

/// Environment variables read by [`Neo4jOptions::from_env`].
pub const ENV_URL: &str = "NEO4J_URL";
pub const ENV_USERNAME: &str = "NEO4J_USERNAME";
pub const ENV_PASSWORD: &str = "NEO4J_PASSWORD";
pub const ENV_DATABASE: &str = "NEO4J_DATABASE";

/// Connection settings for one graph database.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neo4jOptions {
    #[serde(alias = "Url")]
    pub url: String,
    #[serde(alias = "Username", default)]
    pub username: String,
    #[serde(alias = "Password", default)]
    pub password: String,
    /// Empty or absent selects the server's default database.
    #[serde(alias = "Database", default, deserialize_with = "empty_as_none")]
    pub database: Option<String>,
    #[serde(alias = "AccessMode", default)]
    pub access_mode: AccessMode,
}

fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}

impl Neo4jOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        let database = database.into();
        self.database = (!database.trim().is_empty()).then_some(database);
        self
    }

    /// Read the section at `path` of a configuration tree. Nested sections
    /// are separated by `:`, e.g. `"Services:Neo4j"`.
    pub fn from_section(root: &serde_json::Value, path: &str) -> Result<Self> {
        let section = path
            .split(':')
            .filter(|segment| !segment.is_empty())
            .try_fold(root, |node, segment| node.get(segment))
            .ok_or_else(|| Error::Config(format!("configuration section '{path}' not found")))?;
        Self::from_json(section.clone())
    }

    /// Parse options from a JSON object.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid options JSON: {e}")))?;
        Self::from_json(value)
    }

    fn from_json(value: serde_json::Value) -> Result<Self> {
        let options: Self =
            serde_json::from_value(value).map_err(|e| Error::Config(format!("invalid Neo4j options: {e}")))?;
        options.validate()
    }

    /// Read `NEO4J_URL`, `NEO4J_USERNAME`, `NEO4J_PASSWORD` and
    /// `NEO4J_DATABASE`. Only the URL is required.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup(ENV_URL).ok_or_else(|| Error::Config(format!("{ENV_URL} is not set")))?;
        let mut options = Self::new(url).with_credentials(
            lookup(ENV_USERNAME).unwrap_or_default(),
            lookup(ENV_PASSWORD).unwrap_or_default(),
        );
        if let Some(database) = lookup(ENV_DATABASE) {
            options = options.with_database(database);
        }
        options.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.url.trim().is_empty() {
            return Err(Error::Config("connection URL is empty".into()));
        }
        Ok(self)
    }

    /// Basic auth when a username is set, no auth otherwise.
    pub fn auth(&self) -> AuthToken {
        if self.username.is_empty() {
            AuthToken::none()
        } else {
            AuthToken::basic(&self.username, &self.password)
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let config = SessionConfig::new().with_access_mode(self.access_mode);
        match &self.database {
            Some(database) => config.with_database(database),
            None => config,
        }
    }
}

impl fmt::Debug for Neo4jOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Neo4jOptions")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("access_mode", &self.access_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_from_section_pascal_case() {
        let root = json!({
            "Services": {
                "Neo4j": { "Url": "memory://app", "Username": "neo4j", "Password": "pw", "Database": "movies" }
            }
        });
        let options = Neo4jOptions::from_section(&root, "Services:Neo4j").unwrap();
        assert_eq!(
            options,
            Neo4jOptions::new("memory://app")
                .with_credentials("neo4j", "pw")
                .with_database("movies")
        );
        assert_eq!(options.session_config().database.as_deref(), Some("movies"));
        assert_eq!(options.auth(), AuthToken::basic("neo4j", "pw"));
    }

    #[test]
    fn test_empty_database_means_default() {
        let options = Neo4jOptions::from_json_str(r#"{"url": "memory://x", "database": ""}"#).unwrap();
        assert_eq!(options.database, None);
        assert_eq!(options.session_config().database, None);
        assert_eq!(options.auth(), AuthToken::none());
    }

    #[test]
    fn test_missing_section_and_url() {
        let root = json!({ "Neo4j": { "Username": "neo4j" } });
        assert!(matches!(Neo4jOptions::from_section(&root, "Other"), Err(Error::Config(_))));
        assert!(matches!(Neo4jOptions::from_section(&root, "Neo4j"), Err(Error::Config(_))));
        assert!(matches!(Neo4jOptions::from_json_str("not json"), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_vars() {
        let vars = |key: &str| match key {
            ENV_URL => Some("memory://env".to_string()),
            ENV_USERNAME => Some("neo4j".to_string()),
            ENV_PASSWORD => Some("pw".to_string()),
            _ => None,
        };
        let options = Neo4jOptions::from_vars(vars).unwrap();
        assert_eq!(options.url, "memory://env");
        assert_eq!(options.database, None);
        assert!(matches!(Neo4jOptions::from_vars(|_| None), Err(Error::Config(_))));
    }

    #[test]
    fn test_debug_redacts_password() {
        let options = Neo4jOptions::new("memory://x").with_credentials("neo4j", "hunter2");
        assert!(!format!("{options:?}").contains("hunter2"));
    }
}
