//! Target context: no environment, or one environment with zero or more hosts.
//!
//! A `Context` is a pure description. Iterating it yields one `Scope` per
//! host, in declared order, and never opens connections or runs commands.

use crate::environment::{ConnectionParams, Environment};
use crate::error::{Error, Result};
use crate::utils::template::{assign, lookup};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    environment: Option<Environment>,
}

/// One iteration of the host loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<String>,
    host: Option<String>,
    #[serde(skip)]
    connection_params: ConnectionParams,
    variables: Map<String, Value>,
}

impl Context {
    /// Context with no environment selected: local-only operations.
    pub fn unbound() -> Self {
        Self { environment: None }
    }

    /// Select `name` from the loaded environments.
    pub fn bind(name: &str, environments: &IndexMap<String, Environment>) -> Result<Self> {
        let environment = environments.get(name).ok_or_else(|| {
            Error::unknown_environment(name, environments.keys().cloned().collect())
        })?;

        let mut environment = environment.clone();
        environment.name = name.to_string();
        Ok(Self {
            environment: Some(environment),
        })
    }

    /// `bind` when a name was given, `unbound` otherwise.
    pub fn resolve(
        name: Option<&str>,
        environments: &IndexMap<String, Environment>,
    ) -> Result<Self> {
        match name.filter(|n| !n.is_empty()) {
            Some(name) => Self::bind(name, environments),
            None => Ok(Self::unbound()),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.environment.is_some()
    }

    pub fn environment(&self) -> Option<&Environment> {
        self.environment.as_ref()
    }

    pub fn environment_name(&self) -> Option<&str> {
        self.environment.as_ref().map(|e| e.name.as_str())
    }

    /// Number of scopes iteration will produce.
    pub fn len(&self) -> usize {
        match &self.environment {
            Some(env) if !env.hosts.is_empty() => env.hosts.len(),
            _ => 1,
        }
    }

    /// Never true: every context yields at least one scope.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Restartable iteration over the per-host scopes.
    pub fn scopes(&self) -> Scopes<'_> {
        Scopes {
            context: self,
            next: 0,
        }
    }
}

impl<'a> IntoIterator for &'a Context {
    type Item = Scope;
    type IntoIter = Scopes<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.scopes()
    }
}

pub struct Scopes<'a> {
    context: &'a Context,
    next: usize,
}

impl Iterator for Scopes<'_> {
    type Item = Scope;

    fn next(&mut self) -> Option<Scope> {
        if self.next >= self.context.len() {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let scope = match &self.context.environment {
            None => Scope::default(),
            Some(env) => Scope {
                environment: Some(env.name.clone()),
                host: env.hosts.get(index).cloned(),
                connection_params: env.ssh_params.clone(),
                variables: env.variables.clone(),
            },
        };
        Some(scope)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.context.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Scopes<'_> {}

impl Scope {
    /// A host-less scope carrying only variables.
    pub fn local(variables: Map<String, Value>) -> Self {
        Self {
            variables,
            ..Default::default()
        }
    }

    /// Overlay `key=value` pairs onto the variables. Dotted keys land in
    /// nested objects.
    pub fn with_overrides(mut self, overrides: &Map<String, Value>) -> Self {
        for (key, value) in overrides {
            assign(&mut self.variables, key, value.clone());
        }
        self
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn connection_params(&self) -> &ConnectionParams {
        &self.connection_params
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Look up a variable by key. Dotted keys (`deploy.remote_dir`) match a
    /// literal key first, then walk nested objects.
    pub fn variable(&self, key: &str) -> Option<&Value> {
        lookup(&self.variables, key)
    }

    /// Display label used in status lines.
    pub fn label(&self) -> &str {
        self.host.as_deref().unwrap_or("local")
    }
}
