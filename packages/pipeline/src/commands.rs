//! Command implementations shared by the CLI and the interactive menu.

use shop_map_cli_utils::{IndicatifProgress, MultiProgress};
use shop_map_listing_models::catalog::catalog;
use shop_map_listing_models::{PartitionKey, SnapshotRole};
use shop_map_merge::{MergeReport, merge_final, merge_raw};
use shop_map_r2::R2Client;
use shop_map_storage::PartitionStore;

use crate::parallel::{DistrictRun, ParallelOptions, run_parallel};
use crate::{
    PartitionOutcome, Pipeline, PipelineConfig, PipelineError, RunOptions, partition_keys,
    partition_status,
};

/// Runs the selected partitions in this process.
///
/// # Errors
///
/// Returns [`PipelineError`] if a code is invalid or the pipeline cannot be
/// built. Per-partition failures are in the returned outcomes.
pub async fn run(
    config: &PipelineConfig,
    multi: &MultiProgress,
    city: &str,
    districts: &[String],
    industries: &[String],
    options: RunOptions,
) -> Result<Vec<(PartitionKey, PartitionOutcome)>, PipelineError> {
    let keys = partition_keys(city, districts, industries)?;
    let stage = IndicatifProgress::batch_bar(multi, "Waiting");
    let pipeline = Pipeline::from_config(config, stage.clone())?;

    let partitions = IndicatifProgress::partitions_bar(multi, "Partitions", keys.len() as u64);
    let results = pipeline
        .run_partitions(&keys, options, partitions.as_ref())
        .await;
    stage.finish_and_clear();

    Ok(results)
}

/// Runs one child process per district.
///
/// # Errors
///
/// Returns [`PipelineError::Io`] if the current executable cannot be
/// located.
pub async fn parallel(
    config: &PipelineConfig,
    multi: &MultiProgress,
    city: &str,
    districts: &[String],
    industries: &[String],
    options: RunOptions,
    jobs: usize,
) -> Result<Vec<DistrictRun>, PipelineError> {
    let program = std::env::current_exe()?;
    let global_args = [
        "--data-dir".to_string(),
        config.layout.root().display().to_string(),
        "--source-dir".to_string(),
        config.source_dir.display().to_string(),
    ];
    let progress = IndicatifProgress::partitions_bar(multi, "Districts", districts.len() as u64);
    Ok(run_parallel(
        &ParallelOptions {
            program: &program,
            global_args: &global_args,
            city,
            districts,
            industries,
            options,
            jobs,
        },
        progress.as_ref(),
    )
    .await)
}

/// Rebuilds both canonical datasets, then mirrors them to the blob store
/// if `upload` is set.
///
/// # Errors
///
/// Returns [`PipelineError`] if a merge fails, or if `upload` is set and
/// the blob store is not configured or the upload fails.
pub async fn merge(
    config: &PipelineConfig,
    upload: bool,
) -> Result<(MergeReport, MergeReport), PipelineError> {
    let layout = &config.layout;
    let store = PartitionStore::new(layout.partitions_dir()).with_lock_options(config.lock);

    let raw = merge_raw(&store, catalog(), &layout.canonical_path(SnapshotRole::Raw))?;
    let enriched = merge_final(&store, catalog(), &layout.canonical_path(SnapshotRole::Final))?;

    if upload {
        let client = R2Client::from_env()?;
        let stats = client.push_canonical(layout).await?;
        log::info!(
            "Uploaded to {}: {} transferred, {} unchanged, {} missing locally",
            client.bucket(),
            stats.transferred,
            stats.skipped,
            stats.not_found
        );
    }

    Ok((raw, enriched))
}

/// Prints every partition with its snapshot presence.
///
/// # Errors
///
/// Returns [`PipelineError::Storage`] if the partition directory cannot be
/// listed.
pub fn status(config: &PipelineConfig) -> Result<(), PipelineError> {
    let store = PartitionStore::new(config.layout.partitions_dir());
    let statuses = partition_status(&store)?;
    if statuses.is_empty() {
        println!("No snapshots under {}", store.dir().display());
        return Ok(());
    }

    let catalog = catalog();
    println!("{:<16} {:<5} {:<5} NAME", "PARTITION", "RAW", "FINAL");
    println!("{}", "-".repeat(50));
    for status in &statuses {
        let labels = catalog.labels(&status.key);
        println!(
            "{:<16} {:<5} {:<5} {} {} {}",
            status.key.to_string(),
            mark(status.raw),
            mark(status.complete),
            labels.city,
            labels.district,
            labels.industry
        );
    }

    let complete = statuses.iter().filter(|s| s.complete).count();
    println!("\n{complete}/{} partitions complete", statuses.len());
    Ok(())
}

const fn mark(present: bool) -> &'static str {
    if present { "yes" } else { "-" }
}

/// Copies the geocoding cache from the blob store to the data directory.
///
/// # Errors
///
/// Returns [`PipelineError::R2`] if the blob store is not configured or the
/// download fails.
pub async fn cache_pull(config: &PipelineConfig) -> Result<(), PipelineError> {
    let client = R2Client::from_env()?;
    let stats = client.pull_cache(&config.layout).await?;
    if stats.not_found > 0 {
        log::info!("No geocoding cache in {} yet", client.bucket());
    } else {
        log::info!(
            "Geocoding cache pulled ({} transferred, {} unchanged)",
            stats.transferred,
            stats.skipped
        );
    }
    Ok(())
}

/// Copies the local geocoding cache to the blob store.
///
/// # Errors
///
/// Returns [`PipelineError::R2`] if the blob store is not configured or the
/// upload fails.
pub async fn cache_push(config: &PipelineConfig) -> Result<(), PipelineError> {
    let client = R2Client::from_env()?;
    let stats = client.push_cache(&config.layout).await?;
    if stats.not_found > 0 {
        log::warn!(
            "No local geocoding cache at {}",
            config.layout.geocode_cache_path().display()
        );
    } else {
        log::info!(
            "Geocoding cache pushed ({} transferred, {} unchanged)",
            stats.transferred,
            stats.skipped
        );
    }
    Ok(())
}

/// Logs per-partition outcomes and returns how many need attention.
#[must_use]
pub fn report_outcomes(results: &[(PartitionKey, PartitionOutcome)]) -> usize {
    let mut failures = 0;
    for (key, outcome) in results {
        match outcome {
            PartitionOutcome::Completed {
                raw_records,
                final_records,
                chunks_failed,
            } => log::info!(
                "{key}: {raw_records} raw, {final_records} enriched, {chunks_failed} chunks dropped"
            ),
            PartitionOutcome::NoEnrichedRows { .. } | PartitionOutcome::RawOnly { .. } => {
                log::warn!("{key}: {}", outcome.label());
            }
            PartitionOutcome::WriteFailed { error, .. } | PartitionOutcome::Failed { error } => {
                failures += 1;
                log::error!("{key}: {}: {error}", outcome.label());
            }
            PartitionOutcome::SkippedComplete | PartitionOutcome::NoData => {}
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_partitions_needing_attention() {
        let key = PartitionKey::new("001", "111", "0009").unwrap();
        let results = vec![
            (key.clone(), PartitionOutcome::SkippedComplete),
            (key.clone(), PartitionOutcome::RawOnly { raw_records: 4 }),
            (
                key.clone(),
                PartitionOutcome::WriteFailed {
                    role: SnapshotRole::Final,
                    error: "lock timeout".to_string(),
                },
            ),
            (
                key,
                PartitionOutcome::Failed {
                    error: "source unavailable".to_string(),
                },
            ),
        ];
        assert_eq!(report_outcomes(&results), 2);
    }
}
