// Library interface for scriptbin
// This allows integration tests and external code to use scriptbin's modules

pub mod cli_utils;
pub mod config;
pub mod logging;
pub mod script;
pub mod xdg;

// Re-export commonly used types
pub use config::ScriptbinConfig;
pub use script::{BuildMode, Launcher, ScriptCache, ScriptError};
