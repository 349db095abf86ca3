use hostrun::{Config, ConsoleSink, Engine};
use std::path::PathBuf;
use std::sync::Arc;

pub type CmdResult<T> = hostrun::Result<(T, i32)>;

pub struct GlobalArgs {
    pub config: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn load_config(&self) -> hostrun::Result<Config> {
        let cwd = std::env::current_dir().map_err(|e| {
            hostrun::Error::internal_io(e.to_string(), Some("resolve working directory".to_string()))
        })?;
        Config::discover(self.config.as_deref(), &cwd)
    }

    pub fn engine(&self) -> hostrun::Result<Engine> {
        Engine::from_config(self.load_config()?, Arc::new(ConsoleSink::new()))
    }
}

pub mod envs;
pub mod run;
pub mod tasks;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (hostrun::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Tasks(args) => dispatch!(args, global, tasks),
        crate::Commands::Envs(args) => dispatch!(args, global, envs),
    }
}
