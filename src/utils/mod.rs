//! Generic utility primitives with zero domain knowledge.
//!
//! - `shell` - Shell quoting and remote path joining
//! - `template` - `{{var}}` rendering over JSON variable maps

pub mod shell;
pub mod template;
