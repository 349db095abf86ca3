use super::Extension;
use crate::error::{Error, Result};
use crate::registry::{Method, Parameter, Task, TaskArgs};
use crate::runtime::TaskContext;
use serde_json::Value;

/// Ad-hoc commands: `hostrun run remote "df -h" --env prod`.
pub struct ShellExtension;

#[derive(Clone, Copy)]
enum Target {
    Local,
    Remote,
    Sudo,
}

impl Target {
    fn run(self, ctx: &mut TaskContext<'_>, command: &str) -> Result<Value> {
        let output = match self {
            Target::Local => ctx.local(command)?,
            Target::Remote => ctx.remote(command)?,
            Target::Sudo => ctx.sudo(command)?,
        };
        Ok(Value::String(output))
    }
}

/// The command word plus any surplus positionals, so unquoted
/// `run remote ls -la /srv` still works.
fn command_line(args: &TaskArgs) -> Option<String> {
    let mut words: Vec<String> = args.get_str("command").into_iter().collect();
    words.extend(args.rest());
    let line = words.join(" ");
    (!line.trim().is_empty()).then_some(line)
}

fn method_command(args: &TaskArgs) -> Result<String> {
    args.get_str("command")
        .or_else(|| args.rest().first().cloned())
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| Error::validation_missing_argument(vec!["command".to_string()], None))
}

fn task(name: &str, target: Target, description: &str) -> Task {
    let task_name = name.to_string();
    Task::new(name, move |ctx, args| {
        let command = command_line(args).ok_or_else(|| {
            Error::validation_missing_argument(vec!["command".to_string()], Some(task_name.clone()))
        })?;
        let command = ctx.render(&command, args)?;
        target.run(ctx, &command)
    })
    .describe(description)
    .param(Parameter::required("command").describe("Command line to execute"))
}

impl Extension for ShellExtension {
    fn name(&self) -> &str {
        "shell"
    }

    fn tasks(&self) -> Vec<Task> {
        vec![
            task("local", Target::Local, "Run a command on this machine"),
            task("remote", Target::Remote, "Run a command on every host"),
            task("sudo", Target::Sudo, "Run a command on every host with sudo"),
        ]
    }

    /// Verbatim variants for task bodies: no `{{var}}` rendering, and named
    /// apart from the tasks so `run_task` can reach them.
    fn methods(&self) -> Vec<Method> {
        [
            ("run_local", Target::Local),
            ("run_remote", Target::Remote),
            ("run_sudo", Target::Sudo),
        ]
        .into_iter()
        .map(|(name, target)| {
            Method::new(name, move |ctx, args| {
                let command = method_command(args)?;
                target.run(ctx, &command)
            })
        })
        .collect()
    }
}
