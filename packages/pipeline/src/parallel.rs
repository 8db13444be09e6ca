//! Runs districts in parallel as child processes of the same binary.
//!
//! Each district gets its own `run` process, so a crash in one never takes
//! the others down, and the only state they share is what already goes
//! through the storage locks (the geocoding cache).

use std::path::Path;

use futures::stream::{self, StreamExt as _};
use shop_map_listing_models::progress::ProgressCallback;
use tokio::process::Command;

use crate::RunOptions;

/// Default number of concurrent child processes.
pub const DEFAULT_JOBS: usize = 3;

/// Result of one district's child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistrictRun {
    /// District code.
    pub district: String,
    /// Whether the child exited successfully.
    pub success: bool,
    /// Exit code, if the child exited normally.
    pub code: Option<i32>,
}

/// Arguments for the child process handling `district`.
#[must_use]
pub fn child_args(
    city: &str,
    district: &str,
    industries: &[String],
    options: RunOptions,
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--city".to_string(),
        city.to_string(),
        "--districts".to_string(),
        district.to_string(),
        "--industries".to_string(),
        industries.join(","),
    ];
    if options.use_raw {
        args.push("--use-raw".to_string());
    }
    if let Some(limit) = options.limit {
        args.push("--limit".to_string());
        args.push(limit.to_string());
    }
    args
}

/// What [`run_parallel`] runs.
#[derive(Debug, Clone, Copy)]
pub struct ParallelOptions<'a> {
    /// Executable started once per district.
    pub program: &'a Path,
    /// Arguments placed before the `run` subcommand of every child.
    pub global_args: &'a [String],
    /// City code.
    pub city: &'a str,
    /// One child per district code.
    pub districts: &'a [String],
    /// Industry codes passed to every child.
    pub industries: &'a [String],
    /// Run options passed to every child.
    pub options: RunOptions,
    /// Maximum concurrent children. Zero is treated as one.
    pub jobs: usize,
}

/// Spawns the program once per district with at most `jobs` running at a
/// time, and waits for all of them.
///
/// A child that fails to start or exits unsuccessfully is logged and
/// reported; the others keep running. Results are in completion order.
pub async fn run_parallel(
    run: &ParallelOptions<'_>,
    progress: &dyn ProgressCallback,
) -> Vec<DistrictRun> {
    let ParallelOptions {
        program,
        global_args,
        city,
        districts,
        industries,
        options,
        jobs,
    } = *run;
    let jobs = jobs.max(1);
    log::info!(
        "Running {} districts with {jobs} parallel jobs",
        districts.len()
    );
    progress.set_total(districts.len() as u64);

    let runs: Vec<DistrictRun> = stream::iter(districts.iter().map(|district| {
        let args = child_args(city, district, industries, options);
        async move {
            log::info!("District {district}: starting");
            let status = Command::new(program)
                .args(global_args)
                .args(&args)
                .status()
                .await;
            let run = match status {
                Ok(status) => DistrictRun {
                    district: district.clone(),
                    success: status.success(),
                    code: status.code(),
                },
                Err(e) => {
                    log::error!(
                        "District {district}: failed to start {}: {e}",
                        program.display()
                    );
                    DistrictRun {
                        district: district.clone(),
                        success: false,
                        code: None,
                    }
                }
            };
            if run.success {
                log::info!("District {district}: done");
            } else {
                log::error!("District {district}: exited with {:?}", run.code);
            }
            progress.inc(1);
            run
        }
    }))
    .buffer_unordered(jobs)
    .collect()
    .await;

    let failed = runs.iter().filter(|r| !r.success).count();
    progress.finish(format!("{} districts, {failed} failed", runs.len()));
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    use shop_map_listing_models::progress::NullProgress;

    fn industries() -> Vec<String> {
        vec!["0009".to_string(), "0008".to_string()]
    }

    #[test]
    fn builds_child_arguments() {
        let args = child_args(
            "001",
            "111",
            &industries(),
            RunOptions {
                use_raw: true,
                limit: Some(5),
            },
        );
        assert_eq!(
            args,
            [
                "run",
                "--city",
                "001",
                "--districts",
                "111",
                "--industries",
                "0009,0008",
                "--use-raw",
                "--limit",
                "5"
            ]
        );
    }

    #[test]
    fn omits_unset_options() {
        let args = child_args("001", "103", &industries(), RunOptions::default());
        assert_eq!(args.len(), 7);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reports_each_child() {
        let districts = vec!["111".to_string(), "103".to_string()];

        let industries = industries();
        let mut run = ParallelOptions {
            program: Path::new("true"),
            global_args: &[],
            city: "001",
            districts: &districts,
            industries: &industries,
            options: RunOptions::default(),
            jobs: 1,
        };

        let ok = run_parallel(&run, &NullProgress).await;
        assert_eq!(ok.len(), 2);
        assert!(ok.iter().all(|r| r.success && r.code == Some(0)));

        let global_args = ["--data-dir".to_string(), "data".to_string()];
        run.program = Path::new("false");
        run.global_args = &global_args;
        run.jobs = DEFAULT_JOBS;
        let failed = run_parallel(&run, &NullProgress).await;
        assert!(failed.iter().all(|r| !r.success));
    }

    #[tokio::test]
    async fn missing_program_is_a_failed_run() {
        let districts = ["111".to_string()];
        let industries = industries();
        let runs = run_parallel(
            &ParallelOptions {
                program: Path::new("/nonexistent/shop_map_pipeline"),
                global_args: &[],
                city: "001",
                districts: &districts,
                industries: &industries,
                options: RunOptions::default(),
                jobs: 2,
            },
            &NullProgress,
        )
        .await;
        assert_eq!(
            runs,
            [DistrictRun {
                district: "111".to_string(),
                success: false,
                code: None,
            }]
        );
    }
}
