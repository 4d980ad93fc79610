//! Script build pipeline
//!
//! A script carries its own build recipe in a commented manifest block. The
//! pipeline turns that script into a cached executable:
//!
//! ```text
//! manifest -> fingerprint -> cache lookup -> (lock, build, commit) -> exec
//! ```
//!
//! - [`manifest`] extracts and decodes the manifest block
//! - [`fingerprint`] hashes the raw script bytes into the cache key
//! - [`cache`] stores committed build directories, published by rename
//! - [`executor`] runs the build natively or in a container ([`docker`])
//! - [`launcher`] ties the stages together and hands off to the artifact

pub mod cache;
pub mod docker;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod launcher;
pub mod lock;
pub mod manifest;
pub mod process;
pub mod target;

pub use cache::{CacheEntry, ScriptCache};
pub use error::{BuildFailure, ScriptError, ScriptResult};
pub use executor::{BuildExecutor, BuildSettings};
pub use fingerprint::Fingerprint;
pub use launcher::{BuildMode, HandoffMode, Launcher, LoadedScript, PreparedRun};
pub use manifest::{parse_script, Manifest};
