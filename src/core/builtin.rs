//! Tasks registered on every engine before any extension.

use crate::error::{Error, Result};
use crate::registry::{Parameter, Task, TaskArgs};
use crate::runtime::TaskContext;
use serde_json::{json, Value};
use std::path::Path;

pub const SAMPLE_CONFIG: &str = r#"# hostrun configuration
extensions:
  - shell
  - deploy

settings:
  timeout_secs: 600

environments:
  staging:
    hosts:
      - staging1.example.com
      - staging2.example.com
    ssh_params:
      user: deploy
      port: 22
      identity_file: ~/.ssh/id_ed25519
    deploy:
      local_dir: ./build
      remote_dir: /var/www/app
      build_command: make build
      keep_releases: 5

  prod:
    hosts:
      - web1.example.com
    ssh_params:
      user: deploy
    deploy:
      local_dir: ./build
      remote_dir: /var/www/app
      build_command: make build
"#;

pub fn tasks() -> Vec<Task> {
    vec![
        Task::new("init", init)
            .describe("Write a sample hostrun.yml")
            .local_only()
            .param(
                Parameter::optional("path", json!("hostrun.yml"))
                    .describe("Where to write the file"),
            ),
        Task::new("hosts", hosts).describe("Show the current scope's host and variables"),
    ]
}

fn init(ctx: &mut TaskContext<'_>, args: &TaskArgs) -> Result<Value> {
    let path = args
        .get_str("path")
        .unwrap_or_else(|| "hostrun.yml".to_string());

    if Path::new(&path).exists() {
        return Err(Error::validation_invalid_argument(
            "path",
            format!("{} already exists", path),
            Some(path.clone()),
        )
        .with_hint("Remove the file or pass a different path"));
    }

    if ctx.is_dry_run() {
        ctx.info(&format!("[dry-run] Would write {}", path));
        return Ok(json!({ "path": path, "written": false }));
    }

    std::fs::write(&path, SAMPLE_CONFIG)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("write {}", path))))?;
    ctx.info(&format!("Wrote {}", path));
    Ok(json!({ "path": path, "written": true }))
}

fn hosts(ctx: &mut TaskContext<'_>, _args: &TaskArgs) -> Result<Value> {
    let label = ctx.scope().label().to_string();
    ctx.info(&format!(
        "{} ({})",
        label,
        ctx.environment().unwrap_or("no environment")
    ));
    Ok(json!({
        "environment": ctx.environment(),
        "host": ctx.host(),
        "variables": ctx.scope().variables(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::connection::ConnectionManager;
    use crate::context::Scope;
    use crate::error::ErrorCode;
    use crate::process::ShellProcess;
    use crate::registry::Registry;
    use crate::sink::MemorySink;
    use crate::ssh::SshClient;

    #[test]
    fn sample_config_parses() {
        let config = Config::parse(SAMPLE_CONFIG, "yml", "hostrun.yml").unwrap();
        assert_eq!(config.environments["staging"].hosts.len(), 2);
        assert_eq!(config.extensions, vec!["shell", "deploy"]);
    }

    #[test]
    fn init_writes_once_then_refuses() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("hostrun.yml");
        let target_str = target.to_string_lossy().to_string();

        let mut registry = Registry::new();
        for task in tasks() {
            registry.add_task(task);
        }
        let mut connection = ConnectionManager::new(Box::new(SshClient::new()));
        let process = ShellProcess::new();
        let sink = MemorySink::new();
        let scope = Scope::default();
        let mut ctx = TaskContext::new(&registry, &mut connection, &process, &sink, &scope);

        let args = TaskArgs::new().arg(target_str.clone());
        let out = ctx.run_task("init", &args).unwrap();
        assert_eq!(out["written"], true);
        assert!(std::fs::read_to_string(&target)
            .unwrap()
            .contains("environments:"));

        let err = ctx.run_task("init", &args).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
    }

    #[test]
    fn hosts_reports_hostless_scope() {
        let mut registry = Registry::new();
        for task in tasks() {
            registry.add_task(task);
        }
        let mut connection = ConnectionManager::new(Box::new(SshClient::new()));
        let process = ShellProcess::new();
        let sink = MemorySink::new();
        let scope = Scope::default();
        let mut ctx = TaskContext::new(&registry, &mut connection, &process, &sink, &scope);

        let out = ctx.run_task("hosts", &TaskArgs::new()).unwrap();
        assert_eq!(out["host"], Value::Null);
        assert!(sink.contains("local (no environment)"));
    }
}
