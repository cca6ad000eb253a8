use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A registered dev-tool command (owned by the store, read-only to the supervisor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDefinition {
    /// Unique identifier, immutable once assigned
    pub id: String,
    /// Display name, used as the log prefix for child output
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Command line, tokenised with shell quoting rules
    pub command: String,
    /// Working directory (absolute or relative to the dashboard)
    pub cwd: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub auto_start: bool,
    /// Run through `/bin/sh -c` so pipes and builtins work
    #[serde(default = "default_shell")]
    pub shell: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_shell() -> bool {
    true
}

/// Body of a create request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewServer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub shell: Option<bool>,
}

impl NewServer {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() || self.command.trim().is_empty() || self.cwd.trim().is_empty() {
            return Err("Missing required fields: name, command, cwd".to_string());
        }
        if self.port == Some(0) {
            return Err("Port must be a positive integer".to_string());
        }
        Ok(())
    }
}

/// Partial update; `id` and `createdAt` have no field here so they can never be overwritten
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub command: Option<String>,
    pub cwd: Option<String>,
    /// `null` clears the port, absence leaves it untouched
    #[serde(default, deserialize_with = "nullable")]
    pub port: Option<Option<u16>>,
    pub auto_start: Option<bool>,
    pub shell: Option<bool>,
}

impl ServerUpdate {
    pub fn validate(&self) -> Result<(), String> {
        let blank = |v: &Option<String>| v.as_deref().map(|s| s.trim().is_empty()).unwrap_or(false);
        if blank(&self.name) || blank(&self.command) || blank(&self.cwd) {
            return Err("name, command and cwd cannot be empty".to_string());
        }
        if self.port == Some(Some(0)) {
            return Err("Port must be a positive integer".to_string());
        }
        Ok(())
    }

    pub fn apply(self, server: &mut ServerDefinition) {
        if let Some(name) = self.name {
            server.name = name;
        }
        if let Some(description) = self.description {
            server.description = description;
        }
        if let Some(command) = self.command {
            server.command = command;
        }
        if let Some(cwd) = self.cwd {
            server.cwd = cwd;
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if let Some(auto_start) = self.auto_start {
            server.auto_start = auto_start;
        }
        if let Some(shell) = self.shell {
            server.shell = shell;
        }
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServerDefinition {
        ServerDefinition {
            id: "server-1".into(),
            name: "docs".into(),
            description: String::new(),
            command: "hugo".into(),
            cwd: "/tmp".into(),
            port: Some(1313),
            auto_start: false,
            shell: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn test_update_ignores_identity_fields() {
        let update: ServerUpdate = serde_json::from_str(
            r#"{"id":"other","createdAt":"2020-01-01T00:00:00Z","name":"blog"}"#,
        )
        .unwrap();
        let mut server = sample();
        let created = server.created_at;
        update.apply(&mut server);

        assert_eq!(server.id, "server-1");
        assert_eq!(server.created_at, created);
        assert_eq!(server.name, "blog");
    }

    #[test]
    fn test_update_port_null_vs_missing() {
        let mut server = sample();
        let untouched: ServerUpdate = serde_json::from_str(r#"{"autoStart":true}"#).unwrap();
        untouched.apply(&mut server);
        assert_eq!(server.port, Some(1313));
        assert!(server.auto_start);

        let cleared: ServerUpdate = serde_json::from_str(r#"{"port":null}"#).unwrap();
        cleared.apply(&mut server);
        assert_eq!(server.port, None);
    }

    #[test]
    fn test_new_server_validation() {
        let mut req = NewServer {
            name: "api".into(),
            command: "npm run dev".into(),
            cwd: "/tmp".into(),
            ..Default::default()
        };
        assert!(req.validate().is_ok());

        req.port = Some(0);
        assert!(req.validate().is_err());

        req.port = None;
        req.cwd = "  ".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_definition_defaults_to_shell() {
        let def: ServerDefinition = serde_json::from_str(
            r#"{"id":"a","name":"a","command":"ls","cwd":"/","createdAt":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert!(def.shell);
        assert!(!def.auto_start);
        assert_eq!(def.port, None);
    }
}
