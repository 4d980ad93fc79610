/// `scriptbin cache` command implementation
///
/// Inspects and maintains cache entries (info, get, clean, list, gc).
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

use crate::cli::{CacheArgs, CacheCommands, CommonArgs};
use crate::cli_utils::{format_size, scriptbin_prefix};
use crate::config::parse_duration;
use crate::merger::MergedConfig;
use crate::script::cache::dir_size;
use crate::script::docker::{self, DockerSettings};
use crate::script::{LoadedScript, ScriptCache};

pub async fn cache(common: &CommonArgs, args: &CacheArgs) -> Result<i32> {
    let config = MergedConfig::load(common)?;
    let cache = config.open_cache()?;

    match &args.command {
        CacheCommands::Info { script } => info(&cache, script),
        CacheCommands::Get { item, script } => get(&cache, item, script),
        CacheCommands::Clean { script } => clean(&cache, &config.build.docker, script).await,
        CacheCommands::List => list(&cache),
        CacheCommands::Gc { older_than } => {
            let max_age = match older_than {
                Some(value) => parse_duration(value)
                    .with_context(|| format!("Invalid --older-than: {}", value))?,
                None => config.max_age,
            };
            gc(&cache, max_age).await
        }
    }
}

/// Everything `info` knows about a script, keyed by item name
fn collect_info(cache: &ScriptCache, script_path: &Path) -> Result<BTreeMap<&'static str, String>> {
    let script = LoadedScript::load(script_path)?;
    let mut items = BTreeMap::new();

    items.insert("script_path", script.path.display().to_string());
    items.insert("fingerprint", script.fingerprint.to_string());
    items.insert(
        "cache_path",
        cache.entry_dir(&script.fingerprint).display().to_string(),
    );

    if let Some(docker_build) = &script.parsed.manifest.docker_build {
        items.insert("docker_image", docker::image_name(&docker_build.dockerfile));
    }

    match cache.lookup(&script.fingerprint)? {
        Some(entry) => {
            items.insert("status", "cached".to_string());
            items.insert("build_dir", entry.dir.display().to_string());
            match script.installed_artifact(&entry)? {
                Some(artifact) => items.insert("artifact", artifact.display().to_string()),
                None => items.insert("artifact", "missing".to_string()),
            };
            items.insert("built_at", entry.built_at.to_rfc3339());
            items.insert("build_ms", entry.metadata.build_ms.to_string());
            items.insert("dir_size", format_size(dir_size(&entry.dir)));
        }
        None => {
            items.insert("status", "not cached".to_string());
        }
    }

    Ok(items)
}

fn info(cache: &ScriptCache, script_path: &Path) -> Result<i32> {
    for (name, value) in collect_info(cache, script_path)? {
        println!("{:20} {}", format!("{}:", name), value);
    }
    Ok(0)
}

fn get(cache: &ScriptCache, item: &str, script_path: &Path) -> Result<i32> {
    let items = collect_info(cache, script_path)?;
    match items.get(item) {
        Some(value) => {
            println!("{}", value);
            Ok(0)
        }
        None => anyhow::bail!(
            "'{}' is not available. Available items: {}",
            item,
            items.keys().copied().collect::<Vec<_>>().join(", ")
        ),
    }
}

async fn clean(cache: &ScriptCache, docker_settings: &DockerSettings, script_path: &Path) -> Result<i32> {
    let script = LoadedScript::load(script_path)?;

    let lock = cache.acquire_build_lock(&script.fingerprint)?;
    let removed = cache.remove(&script.fingerprint)?;

    if removed {
        eprintln!("{} Removed cache entry for {}", scriptbin_prefix(), script_path.display());
    } else {
        eprintln!("{} No cache entry for {}", scriptbin_prefix(), script_path.display());
    }

    if let Some(docker_build) = &script.parsed.manifest.docker_build {
        let image = docker::image_name(&docker_build.dockerfile);
        let users = cache.image_users(&image, &script.fingerprint)?;
        drop(lock);
        if !users.is_empty() {
            eprintln!(
                "{} Keeping image {}, still used by {} cached entries",
                scriptbin_prefix(),
                image,
                users.len()
            );
            return Ok(0);
        }
        match docker::remove_images(docker_settings, std::slice::from_ref(&image)).await {
            Ok(()) => eprintln!("{} Removed image {}", scriptbin_prefix(), image),
            Err(e) => tracing::warn!(image = %image, error = %e, "failed to remove container image"),
        }
    }

    Ok(0)
}

fn list(cache: &ScriptCache) -> Result<i32> {
    let entries = cache.list()?;
    if entries.is_empty() {
        eprintln!("{} Cache is empty ({})", scriptbin_prefix(), cache.root().display());
        return Ok(0);
    }

    for entry in &entries {
        println!(
            "{}  {}  {:>10}  {}",
            entry.fingerprint.short(),
            entry.built_at.format("%Y-%m-%d %H:%M:%S"),
            format_size(dir_size(&entry.dir)),
            entry.metadata.script_path
        );
    }
    eprintln!("{} {} entries", scriptbin_prefix(), entries.len());
    Ok(0)
}

async fn gc(cache: &ScriptCache, max_age: std::time::Duration) -> Result<i32> {
    let cache = cache.clone();
    let summary = tokio::task::spawn_blocking(move || cache.gc(max_age))
        .await
        .context("Garbage collection task failed")??;

    eprintln!(
        "{} Removed {} entries and {} staging directories, freed {}",
        scriptbin_prefix(),
        summary.removed_entries,
        summary.removed_staging,
        format_size(summary.freed_bytes)
    );
    Ok(0)
}
