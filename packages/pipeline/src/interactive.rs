#![allow(clippy::module_name_repetitions)]

//! Interactive menu for the pipeline.
//!
//! Provides a `dialoguer` flow for picking districts and industries so a
//! run can be started without remembering codes.

use std::time::Instant;

use dialoguer::{Confirm, Input, MultiSelect, Select};
use shop_map_cli_utils::MultiProgress;
use shop_map_listing_models::catalog::{Catalog, catalog};

use crate::parallel::DEFAULT_JOBS;
use crate::{PipelineConfig, RunOptions, commands};

/// Top-level actions available in the menu.
enum PipelineAction {
    Run,
    Parallel,
    Merge,
    Status,
    PullCache,
    PushCache,
}

impl PipelineAction {
    const ALL: &[Self] = &[
        Self::Run,
        Self::Parallel,
        Self::Merge,
        Self::Status,
        Self::PullCache,
        Self::PushCache,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Run => "Run partitions",
            Self::Parallel => "Run districts in parallel",
            Self::Merge => "Merge snapshots",
            Self::Status => "Show partition status",
            Self::PullCache => "Pull geocoding cache from bucket",
            Self::PushCache => "Push geocoding cache to bucket",
        }
    }
}

/// A district/industry selection made through the prompts.
struct Selection {
    city: String,
    districts: Vec<String>,
    industries: Vec<String>,
    options: RunOptions,
}

/// Runs the interactive menu.
///
/// # Errors
///
/// Returns an error if a prompt fails or the selected command fails.
pub async fn run(
    config: &PipelineConfig,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let labels: Vec<&str> = PipelineAction::ALL
        .iter()
        .map(PipelineAction::label)
        .collect();

    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    match PipelineAction::ALL[idx] {
        PipelineAction::Run => {
            let Some(selection) = select_partitions(catalog())? else {
                return Ok(());
            };
            let start = Instant::now();
            let results = commands::run(
                config,
                multi,
                &selection.city,
                &selection.districts,
                &selection.industries,
                selection.options,
            )
            .await?;
            let failures = commands::report_outcomes(&results);
            log::info!(
                "{} partitions in {:.1}s, {failures} need attention",
                results.len(),
                start.elapsed().as_secs_f64()
            );
        }
        PipelineAction::Parallel => {
            let Some(selection) = select_partitions(catalog())? else {
                return Ok(());
            };
            let jobs: usize = Input::new()
                .with_prompt("Parallel jobs")
                .default(DEFAULT_JOBS)
                .interact_text()?;
            commands::parallel(
                config,
                multi,
                &selection.city,
                &selection.districts,
                &selection.industries,
                selection.options,
                jobs,
            )
            .await?;
        }
        PipelineAction::Merge => {
            let upload = Confirm::new()
                .with_prompt("Upload merged datasets to the bucket?")
                .default(false)
                .interact()?;
            commands::merge(config, upload).await?;
        }
        PipelineAction::Status => commands::status(config)?,
        PipelineAction::PullCache => commands::cache_pull(config).await?,
        PipelineAction::PushCache => commands::cache_push(config).await?,
    }

    Ok(())
}

/// Prompts for a city, districts, industries, and run options. Returns
/// `None` if nothing was selected.
fn select_partitions(
    catalog: &Catalog,
) -> Result<Option<Selection>, Box<dyn std::error::Error>> {
    let cities: Vec<&str> = catalog.city_codes().collect();
    let city_labels: Vec<String> = cities
        .iter()
        .map(|code| format!("{code} {}", catalog.city_name(code)))
        .collect();
    let city_idx = Select::new()
        .with_prompt("City")
        .items(&city_labels)
        .default(0)
        .interact()?;

    let districts = multi_select_codes(
        "Select districts (space=toggle, a=all, enter=confirm)",
        &catalog.district_codes().collect::<Vec<_>>(),
        |code| catalog.district_name(code).to_string(),
        &[],
    )?;
    if districts.is_empty() {
        println!("No districts selected.");
        return Ok(None);
    }

    let industries = multi_select_codes(
        "Select industries (space=toggle, a=all, enter=confirm)",
        &catalog.industry_codes().collect::<Vec<_>>(),
        |code| catalog.industry_name(code).to_string(),
        &["0009"],
    )?;
    if industries.is_empty() {
        println!("No industries selected.");
        return Ok(None);
    }

    let use_raw = Confirm::new()
        .with_prompt("Reuse existing raw snapshots?")
        .default(false)
        .interact()?;
    let limit = prompt_optional_usize("Row limit per partition (empty for no limit)")?;

    Ok(Some(Selection {
        city: cities[city_idx].to_string(),
        districts,
        industries,
        options: RunOptions { use_raw, limit },
    }))
}

fn multi_select_codes(
    prompt: &str,
    codes: &[&str],
    name: impl Fn(&str) -> String,
    preselected: &[&str],
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let labels: Vec<String> = codes
        .iter()
        .map(|code| format!("{code} {}", name(*code)))
        .collect();
    let defaults: Vec<bool> = codes.iter().map(|c| preselected.contains(c)).collect();

    let selected = MultiSelect::new()
        .with_prompt(prompt)
        .items(&labels)
        .defaults(&defaults)
        .max_length(20)
        .interact()?;

    Ok(selected.into_iter().map(|i| codes[i].to_string()).collect())
}

/// Prompts for an optional `usize`. Returns `None` if the input is empty.
fn prompt_optional_usize(prompt: &str) -> Result<Option<usize>, Box<dyn std::error::Error>> {
    let input: String = Input::new()
        .with_prompt(prompt)
        .allow_empty(true)
        .interact_text()?;

    if input.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(input.trim().parse()?))
    }
}
