//! Extensions: bundles of tasks and methods attached to the registry.
//!
//! Built-in extensions are resolved by name through `builtin`, so a config
//! file's `extensions: [shell, deploy]` list picks what gets attached.

mod deploy;
mod shell;

pub use deploy::DeployExtension;
pub use shell::ShellExtension;

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::registry::{Method, Task};
use crate::sink::OutputSink;
use indexmap::IndexMap;

pub trait Extension {
    fn name(&self) -> &str;

    /// Called once, before `tasks` and `methods` are read.
    fn on_attach(&mut self, _host: &ExtensionHost<'_>) -> Result<()> {
        Ok(())
    }

    fn tasks(&self) -> Vec<Task> {
        Vec::new()
    }

    fn methods(&self) -> Vec<Method> {
        Vec::new()
    }
}

/// Capabilities an extension receives at attach time: output and a
/// read-only view of the configured environments.
pub struct ExtensionHost<'a> {
    output: &'a dyn OutputSink,
    environments: &'a IndexMap<String, Environment>,
}

impl<'a> ExtensionHost<'a> {
    pub fn new(output: &'a dyn OutputSink, environments: &'a IndexMap<String, Environment>) -> Self {
        Self {
            output,
            environments,
        }
    }

    pub fn output(&self) -> &dyn OutputSink {
        self.output
    }

    pub fn environment_names(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }

    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.get(name)
    }

    pub fn environments(&self) -> impl Iterator<Item = (&str, &Environment)> {
        self.environments.iter().map(|(k, v)| (k.as_str(), v))
    }
}

const BUILTIN: &[&str] = &["shell", "deploy"];

/// Names accepted by `builtin`.
pub fn available() -> Vec<String> {
    BUILTIN.iter().map(|s| s.to_string()).collect()
}

pub fn builtin(name: &str) -> Result<Box<dyn Extension>> {
    match name {
        "shell" => Ok(Box::new(ShellExtension)),
        "deploy" => Ok(Box::new(DeployExtension::default())),
        other => Err(Error::extension_not_found(other, available())),
    }
}
