/// `scriptbin run` command implementation
///
/// Also backs the shebang form (`scriptbin <script> [args...]`).
use anyhow::Result;
use std::ffi::OsString;
use std::path::Path;

use crate::cli::{CommonArgs, RunArgs};
use crate::merger::MergedConfig;
use crate::script::HandoffMode;

pub async fn run(common: &CommonArgs, args: &RunArgs) -> Result<i32> {
    run_script(common, &args.script, &args.args, HandoffMode::native()).await
}

/// Build if needed and hand off to the script's artifact
///
/// Under [`HandoffMode::Exec`] a successful call never returns.
pub async fn run_script(
    common: &CommonArgs,
    script: &Path,
    args: &[OsString],
    handoff: HandoffMode,
) -> Result<i32> {
    let config = MergedConfig::load(common)?;
    let launcher = config.launcher()?;
    Ok(launcher.run(script, args, handoff).await?)
}
