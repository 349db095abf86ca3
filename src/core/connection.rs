//! Lifecycle of the single secure-shell session the engine holds.
//!
//! State is `Disconnected` until `open` succeeds and returns to
//! `Disconnected` on `close`. Engine code acquires connections through
//! `open_scoped`, whose guard closes the session when dropped.

use crate::environment::ConnectionParams;
use crate::error::{Error, RemoteCommandFailedDetails, Result};
use crate::ssh::RemoteShell;
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Disconnected,
    Connected { host: String, simulated: bool },
}

pub struct ConnectionManager {
    transport: Box<dyn RemoteShell>,
    state: State,
}

impl ConnectionManager {
    pub fn new(transport: Box<dyn RemoteShell>) -> Self {
        Self {
            transport,
            state: State::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected { .. })
    }

    pub fn current_host(&self) -> Option<&str> {
        match &self.state {
            State::Connected { host, .. } => Some(host),
            State::Disconnected => None,
        }
    }

    /// True when the current connection was opened for a dry run and no
    /// transport session exists behind it.
    pub fn is_simulated(&self) -> bool {
        matches!(self.state, State::Connected { simulated: true, .. })
    }

    pub fn open(&mut self, host: &str, params: &ConnectionParams) -> Result<()> {
        if self.check_reopen(host)? {
            return Ok(());
        }

        self.transport
            .connect(host, params)
            .map_err(|err| match err.code {
                crate::error::ErrorCode::ConnectionFailed => err,
                _ => Error::connection_failed(host, err.message.clone()),
            })?;

        log_status!("ssh", "Connected to {}", host);
        self.state = State::Connected {
            host: host.to_string(),
            simulated: false,
        };
        Ok(())
    }

    /// Mark `host` as the current target without touching the transport.
    pub fn open_simulated(&mut self, host: &str) -> Result<()> {
        if self.check_reopen(host)? {
            return Ok(());
        }
        self.state = State::Connected {
            host: host.to_string(),
            simulated: true,
        };
        Ok(())
    }

    /// Returns `Ok(true)` when already connected to `host`.
    fn check_reopen(&self, host: &str) -> Result<bool> {
        match &self.state {
            State::Connected { host: current, .. } if current == host => Ok(true),
            State::Connected { host: current, .. } => {
                Err(Error::already_connected(current.clone(), host))
            }
            State::Disconnected => Ok(false),
        }
    }

    /// Open a connection that is closed when the returned guard drops.
    pub fn open_scoped(
        &mut self,
        host: &str,
        params: &ConnectionParams,
        simulated: bool,
    ) -> Result<ScopedConnection<'_>> {
        if simulated {
            self.open_simulated(host)?;
        } else {
            self.open(host, params)?;
        }
        Ok(ScopedConnection { manager: self })
    }

    /// Idempotent. Transport errors while disconnecting are logged, never
    /// returned: the state is `Disconnected` afterwards regardless.
    pub fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, State::Disconnected);
        if let State::Connected { host, simulated } = previous {
            if simulated {
                return;
            }
            if let Err(err) = self.transport.disconnect() {
                log_status!("ssh", "Error while closing connection to {}: {}", host, err);
            }
            log_status!("ssh", "Disconnected from {}", host);
        }
    }

    /// Run a command on the connected host and return its output.
    pub fn exec(&mut self, command: &str) -> Result<String> {
        self.run(command, false)
    }

    /// Run a command with elevated privileges on the connected host.
    pub fn sudo(&mut self, command: &str) -> Result<String> {
        self.run(command, true)
    }

    fn run(&mut self, command: &str, sudo: bool) -> Result<String> {
        let host = self
            .current_host()
            .map(str::to_string)
            .ok_or_else(Error::no_active_connection)?;

        if self.is_simulated() {
            return Ok(String::new());
        }

        let ok = if sudo {
            self.transport.sudo_exec(command)
        } else {
            self.transport.exec(command)
        };

        if ok {
            Ok(self.transport.last_output().to_string())
        } else {
            Err(Error::remote_command_failed(RemoteCommandFailedDetails {
                command: command.to_string(),
                host: Some(host),
                last_error: self.transport.last_error().to_string(),
                last_output: self.transport.last_output().to_string(),
                sudo,
            }))
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connection held for exactly one scope.
pub struct ScopedConnection<'a> {
    manager: &'a mut ConnectionManager,
}

impl Deref for ScopedConnection<'_> {
    type Target = ConnectionManager;

    fn deref(&self) -> &ConnectionManager {
        self.manager
    }
}

impl DerefMut for ScopedConnection<'_> {
    fn deref_mut(&mut self) -> &mut ConnectionManager {
        self.manager
    }
}

impl Drop for ScopedConnection<'_> {
    fn drop(&mut self) {
        self.manager.close();
    }
}
