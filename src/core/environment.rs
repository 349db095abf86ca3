use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named group of target hosts with the SSH parameters used to reach them.
///
/// Every key of an environment other than `hosts` and `ssh_params` is kept
/// as a variable, so `deploy: { remote_dir: ... }` is readable from task code
/// as `deploy.remote_dir`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Environment {
    #[serde(skip_deserializing, default)]
    pub name: String,

    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub ssh_params: ConnectionParams,

    #[serde(flatten)]
    pub variables: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,

    /// Seconds allowed for the initial handshake.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Extra `-o Key=Value` options handed to ssh verbatim.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            user: None,
            port: default_port(),
            identity_file: None,
            connect_timeout: default_connect_timeout(),
            options: Vec::new(),
        }
    }
}

impl ConnectionParams {
    /// `user@host`, or just `host` when no user is configured.
    pub fn destination(&self, host: &str) -> String {
        match self.user.as_deref().filter(|u| !u.is_empty()) {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        }
    }

    /// Identity file with `~` and environment variables expanded.
    pub fn expanded_identity_file(&self) -> Option<String> {
        self.identity_file
            .as_deref()
            .filter(|path| !path.is_empty())
            .map(|path| shellexpand::full(path).map_or_else(|_| path.to_string(), |p| p.to_string()))
    }
}

impl Environment {
    pub fn new(name: impl Into<String>, hosts: Vec<String>) -> Self {
        Self {
            name: name.into(),
            hosts,
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: ConnectionParams) -> Self {
        self.ssh_params = params;
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    /// Hosts must be non-empty strings. Duplicates are allowed and kept in order.
    pub fn validate(&self) -> Result<()> {
        if let Some(index) = self.hosts.iter().position(|h| h.trim().is_empty()) {
            return Err(Error::config_invalid_value(
                format!("environments.{}.hosts[{}]", self.name, index),
                None,
                "Host names must not be empty",
            ));
        }
        Ok(())
    }
}
