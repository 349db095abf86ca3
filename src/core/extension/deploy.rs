//! Release-directory deploys over rsync.
//!
//! Layout on every host, under `deploy.remote_dir`:
//!
//! ```text
//! releases/20240101120000/
//! releases/20240102093000/
//! current -> releases/20240102093000
//! ```
//!
//! Variables read from the environment: `deploy.remote_dir` (required),
//! `deploy.local_dir` (default `.`), `deploy.build_command`,
//! `deploy.keep_releases` (default 5), `deploy.rsync_options`,
//! `deploy.excludes`.

use super::{Extension, ExtensionHost};
use crate::error::{Error, Result};
use crate::registry::{value_to_string, Method, Parameter, Task, TaskArgs};
use crate::runtime::TaskContext;
use crate::utils::shell::{join_remote_path, quote_arg, quote_args};
use crate::utils::template::lookup;
use serde_json::{json, Value};

const DEFAULT_KEEP_RELEASES: u64 = 5;
const DEFAULT_RSYNC_OPTIONS: &[&str] = &["-az", "--delete"];

#[derive(Debug, Default)]
pub struct DeployExtension {
    unconfigured: Vec<String>,
}

impl DeployExtension {
    /// Environments found without `deploy.remote_dir` at attach time.
    pub fn unconfigured(&self) -> &[String] {
        &self.unconfigured
    }
}

impl Extension for DeployExtension {
    fn name(&self) -> &str {
        "deploy"
    }

    fn on_attach(&mut self, host: &ExtensionHost<'_>) -> Result<()> {
        self.unconfigured = host
            .environments()
            .filter(|(_, env)| lookup(&env.variables, "deploy.remote_dir").is_none())
            .map(|(name, _)| name.to_string())
            .collect();

        for name in &self.unconfigured {
            host.output().info(&format!(
                "deploy: environment '{}' has no deploy.remote_dir; deploy and rollback will fail there",
                name
            ));
        }
        Ok(())
    }

    fn tasks(&self) -> Vec<Task> {
        vec![
            Task::new("build", build).describe("Run deploy.build_command locally"),
            Task::new("deploy", deploy)
                .describe("Build once, upload a new release to every host, switch current")
                .param(
                    Parameter::optional("keep", Value::Null)
                        .describe("Releases to keep (overrides deploy.keep_releases)"),
                ),
            Task::new("rollback", rollback).describe("Point current at the previous release"),
        ]
    }

    fn methods(&self) -> Vec<Method> {
        vec![
            Method::new("release_id", |_, _| {
                Ok(Value::String(
                    chrono::Utc::now().format("%Y%m%d%H%M%S").to_string(),
                ))
            }),
            Method::new("remote_sync", remote_sync),
        ]
    }
}

fn build(ctx: &mut TaskContext<'_>, args: &TaskArgs) -> Result<Value> {
    match ctx.var_str("deploy.build_command") {
        Some(template) if !template.trim().is_empty() => {
            let command = ctx.render(&template, args)?;
            let output = ctx.local(&command)?;
            Ok(json!({ "command": command, "output": output }))
        }
        _ => {
            ctx.info("deploy: no deploy.build_command configured, skipping build");
            Ok(Value::Null)
        }
    }
}

fn deploy(ctx: &mut TaskContext<'_>, args: &TaskArgs) -> Result<Value> {
    let remote_dir = ctx.require_var("deploy.remote_dir")?;
    let local_dir = ctx
        .var_str("deploy.local_dir")
        .unwrap_or_else(|| ".".to_string());
    let keep = keep_releases(ctx, args)?;

    ctx.run_task_once("build", &TaskArgs::new())?;

    // Shared by every host of the run.
    let release = ctx
        .run_task_once("release_id", &TaskArgs::new())
        .map(|v| value_to_string(&v).unwrap_or_default())?;

    let releases_dir = join_remote_path(&remote_dir, &["releases"]);
    let release_dir = join_remote_path(&releases_dir, &[&release]);
    let current = join_remote_path(&remote_dir, &["current"]);

    ctx.remote(&format!("mkdir -p {}", quote_arg(&release_dir)))?;
    ctx.run_task(
        "remote_sync",
        &TaskArgs::new()
            .named("local_dir", local_dir)
            .named("remote_dir", release_dir.clone()),
    )?;
    ctx.remote(&format!(
        "ln -sfn {} {}",
        quote_arg(&release_dir),
        quote_arg(&current)
    ))?;
    ctx.remote(&prune_command(&releases_dir, keep))?;

    Ok(json!({
        "release": release,
        "path": release_dir,
        "host": ctx.host(),
    }))
}

fn keep_releases(ctx: &TaskContext<'_>, args: &TaskArgs) -> Result<u64> {
    let raw = args
        .get("keep")
        .filter(|v| !v.is_null())
        .or_else(|| ctx.variable("deploy.keep_releases"));

    let Some(raw) = raw else {
        return Ok(DEFAULT_KEEP_RELEASES);
    };

    let parsed = match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n >= 1 => Ok(n),
        _ => Err(Error::config_invalid_value(
            "deploy.keep_releases",
            value_to_string(raw),
            "must be a whole number of at least 1",
        )),
    }
}

/// Release ids sort chronologically, so everything past the newest `keep`
/// entries goes.
fn prune_command(releases_dir: &str, keep: u64) -> String {
    format!(
        "cd {} && ls -1 | sort -r | tail -n +{} | xargs -r rm -rf --",
        quote_arg(releases_dir),
        keep + 1
    )
}

fn rollback(ctx: &mut TaskContext<'_>, _args: &TaskArgs) -> Result<Value> {
    let remote_dir = ctx.require_var("deploy.remote_dir")?;
    let releases_dir = join_remote_path(&remote_dir, &["releases"]);
    let current = join_remote_path(&remote_dir, &["current"]);

    // Resolved on the host in one shell so a dry run can still print it.
    let script = format!(
        "cd {releases} && prev=$(ls -1 | sort -r | sed -n 2p) && test -n \"$prev\" \
         && newest=$(ls -1 | sort -r | head -n 1) \
         && ln -sfn {releases}/\"$prev\" {current} && rm -rf -- \"$newest\" && echo \"$prev\"",
        releases = quote_arg(&releases_dir),
        current = quote_arg(&current),
    );
    let output = ctx.remote(&script)?;

    Ok(json!({
        "release": if ctx.is_dry_run() { Value::Null } else { json!(output.trim()) },
        "host": ctx.host(),
    }))
}

fn remote_sync(ctx: &mut TaskContext<'_>, args: &TaskArgs) -> Result<Value> {
    let host = ctx
        .host()
        .map(str::to_string)
        .filter(|_| ctx.is_connected())
        .ok_or_else(Error::no_active_connection)?;

    let positional = args.rest();
    let local_dir = args
        .get_str("local_dir")
        .or_else(|| positional.first().cloned())
        .ok_or_else(|| Error::validation_missing_argument(vec!["local_dir".to_string()], None))?;
    let remote_dir = args
        .get_str("remote_dir")
        .or_else(|| positional.get(1).cloned())
        .ok_or_else(|| Error::validation_missing_argument(vec!["remote_dir".to_string()], None))?;

    let command = rsync_command(ctx, &host, &local_dir, &remote_dir);
    let output = ctx.local(&command)?;
    Ok(Value::String(output))
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    match value? {
        Value::Array(items) => Some(items.iter().filter_map(value_to_string).collect()),
        Value::String(s) => Some(s.split_whitespace().map(str::to_string).collect()),
        _ => None,
    }
}

fn rsync_command(ctx: &TaskContext<'_>, host: &str, local_dir: &str, remote_dir: &str) -> String {
    let params = ctx.scope().connection_params();
    let options = string_list(ctx.variable("deploy.rsync_options")).unwrap_or_else(|| {
        DEFAULT_RSYNC_OPTIONS.iter().map(|s| s.to_string()).collect()
    });
    let excludes = string_list(ctx.variable("deploy.excludes")).unwrap_or_default();

    let mut ssh = vec!["ssh".to_string(), "-p".to_string(), params.port.to_string()];
    if let Some(identity) = params.expanded_identity_file() {
        ssh.push("-i".to_string());
        ssh.push(identity);
    }

    let mut words = vec!["rsync".to_string()];
    words.extend(options);
    words.extend(excludes.iter().map(|e| format!("--exclude={}", e)));

    // Trailing slash on the source copies its contents, not the directory.
    let source = format!("{}/", local_dir.trim_end_matches('/'));
    let destination = format!(
        "{}:{}/",
        params.destination(host),
        remote_dir.trim_end_matches('/')
    );

    format!(
        "{} -e {} {}",
        quote_args(&words),
        quote_arg(&quote_args(&ssh)),
        quote_args(&[source, destination])
    )
}
