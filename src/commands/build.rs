/// `scriptbin build` command implementation
///
/// Builds (or confirms the cached build of) a script and prints the artifact
/// path on stdout.
use anyhow::Result;

use crate::cli::{BuildArgs, CommonArgs};
use crate::cli_utils::scriptbin_prefix;
use crate::merger::MergedConfig;

pub async fn build(common: &CommonArgs, args: &BuildArgs) -> Result<i32> {
    let config = MergedConfig::load(common)?;
    let launcher = config.launcher()?;
    let prepared = launcher.prepare(&args.script).await?;

    if prepared.built {
        eprintln!(
            "{} Built {} in {} ms",
            scriptbin_prefix(),
            args.script.display(),
            prepared.entry.metadata.build_ms
        );
    } else {
        eprintln!("{} Up to date: {}", scriptbin_prefix(), args.script.display());
    }
    println!("{}", prepared.artifact.display());
    Ok(0)
}
