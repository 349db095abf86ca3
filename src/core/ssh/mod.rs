mod client;

pub use client::{is_local_host, SshClient};

use crate::environment::ConnectionParams;
use crate::error::Result;

/// Remote execution transport bound to one host at a time.
///
/// `exec` and `sudo_exec` report success as a bool and leave the details in
/// `last_output` / `last_error`, so callers decide how a failure is reported.
pub trait RemoteShell: Send {
    fn connect(&mut self, host: &str, params: &ConnectionParams) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
    fn exec(&mut self, command: &str) -> bool;
    fn sudo_exec(&mut self, command: &str) -> bool;
    fn last_output(&self) -> &str;
    fn last_error(&self) -> &str;
}
