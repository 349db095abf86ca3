use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Base hostrun config directory (`~/.config/hostrun/` on unix-likes,
/// `%APPDATA%\hostrun` on Windows).
pub fn hostrun() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected("APPDATA environment variable not set on Windows")
        })?;
        Ok(PathBuf::from(appdata).join("hostrun"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected("HOME environment variable not set on Unix-like system")
        })?;
        Ok(PathBuf::from(home).join(".config").join("hostrun"))
    }
}

/// User-wide fallback config file.
pub fn global_config() -> Result<PathBuf> {
    Ok(hostrun()?.join("config.json"))
}

/// Project config file names probed in the working directory, in order.
pub const PROJECT_CONFIG_NAMES: &[&str] = &[
    "hostrun.yml",
    "hostrun.yaml",
    "hostrun.json",
    "hostrun.toml",
];
