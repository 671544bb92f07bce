//! State inspection commands: status, check, reset.
//!
//! These always read the durable `SQLite` state, whatever backend the filter
//! is configured with. `status` and `check` open it read-only, so a damaged
//! state file is reported and left for `reset` to deal with.

use anyhow::Context;
use deltafetch::config::DeltaFetchConfig;
use deltafetch::services::PathManager;
use deltafetch::{SeenSetPolicy, StoreBackend, WorkUnit};

/// Returns the number of keys recorded for a job.
fn count_keys(config: &DeltaFetchConfig, job: &str) -> deltafetch::Result<usize> {
    let policy = SeenSetPolicy::inspect(job, &config.dir)?;
    let count = policy.len();
    policy.close()?;
    count
}

/// Status command.
pub fn cmd_status(config: &DeltaFetchConfig, job: Option<&str>) -> anyhow::Result<()> {
    println!("Deltafetch Status");
    println!("=================");
    println!("Enabled: {}", config.enabled);
    println!("Backend: {}", config.backend);
    println!("State dir: {}", config.dir.display());

    if !config.backend.is_durable() {
        println!();
        println!("Note: the {} backend keeps no state between runs", config.backend);
    }

    let paths = PathManager::new(&config.dir);
    let jobs = match job {
        Some(name) => vec![name.to_string()],
        None => paths.list_jobs()?,
    };

    println!();
    println!("Jobs:");
    if jobs.is_empty() {
        println!("  (none)");
    }
    for name in jobs {
        if !paths.job_db_path(&name)?.is_file() {
            println!("  {name}: no state");
            continue;
        }
        match count_keys(config, &name) {
            Ok(count) => println!("  {name}: {count} keys"),
            Err(e) => println!("  {name}: unreadable ({e})"),
        }
    }

    Ok(())
}

/// Check command.
pub fn cmd_check(
    config: &DeltaFetchConfig,
    job: &str,
    url: &str,
    method: &str,
    key: Option<String>,
) -> anyhow::Result<()> {
    let mut unit = WorkUnit::get(url)?.with_method(method);
    if let Some(key) = key {
        unit = unit.with_override_key(key);
    }

    let paths = PathManager::new(&config.dir);
    if !paths.job_db_path(job)?.is_file() {
        println!("Job '{job}' has no state; {url} has not been seen");
        return Ok(());
    }

    let policy = SeenSetPolicy::inspect(job, &config.dir)
        .with_context(|| format!("state of job '{job}' is unreadable"))?;
    let key = policy.derive_key(&unit);
    let last_seen = policy.last_seen(&unit);
    policy.close()?;

    println!("Job: {job}");
    println!("URL: {url}");
    println!("Key: {key}");
    match last_seen? {
        Some(at) => println!("Seen: yes, last result at {}", at.to_rfc3339()),
        None => println!("Seen: no"),
    }

    Ok(())
}

/// Reset command.
///
/// An unreadable state file is reset too; it is recreated empty.
pub fn cmd_reset(config: &DeltaFetchConfig, job: &str) -> anyhow::Result<()> {
    let path = PathManager::new(&config.dir).job_db_path(job)?;
    let discarded = if path.is_file() {
        count_keys(config, job).map_err(|e| {
            tracing::warn!(job, error = %e, "State file unreadable, recreating it");
        })
    } else {
        Ok(0)
    };

    SeenSetPolicy::configure(job, &config.dir, true, StoreBackend::Sqlite)
        .and_then(SeenSetPolicy::close)
        .with_context(|| format!("failed to reset job '{job}'"))?;

    match discarded {
        Ok(count) => println!("Reset job '{job}': discarded {count} keys"),
        Err(()) => println!("Reset job '{job}': discarded unreadable state"),
    }
    Ok(())
}
