#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal output for the shop map binaries.
//!
//! [`init_logger`] routes `log` records through `indicatif-log-bridge` so
//! they print above the progress bars instead of tearing them, and
//! [`IndicatifProgress`] adapts `indicatif` bars to [`ProgressCallback`].

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use shop_map_listing_models::progress::ProgressCallback;

pub use indicatif::MultiProgress;

const COUNTER_TEMPLATE: &str = "{msg:>12} {wide_bar:.green/dim} {pos}/{len} [{elapsed_precise}]";
const STAGE_SPINNER_TEMPLATE: &str = "{spinner:.yellow} {msg}";
const STAGE_BAR_TEMPLATE: &str = "  {msg} {wide_bar:.yellow/dim} {pos}/{len} [{eta}]";

/// How a bar is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarKind {
    /// Counts whole units (partitions, districts). Length known up front.
    Counter,
    /// Work inside one partition (geocoding calls, enrichment chunks).
    /// Spins until the stage reports its total.
    Stage,
}

/// An `indicatif` bar behind [`ProgressCallback`].
pub struct IndicatifProgress {
    bar: ProgressBar,
    sized_style: ProgressStyle,
}

impl IndicatifProgress {
    /// Adds a bar of `kind` to `multi`.
    #[must_use]
    pub fn new(
        multi: &MultiProgress,
        kind: BarKind,
        message: &str,
        total: Option<u64>,
    ) -> Arc<dyn ProgressCallback> {
        let (bar, sized_style) = match kind {
            BarKind::Counter => {
                let style = style(COUNTER_TEMPLATE);
                let bar = multi.add(ProgressBar::new(total.unwrap_or(0)));
                bar.set_style(style.clone());
                (bar, style)
            }
            BarKind::Stage => {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.enable_steady_tick(Duration::from_millis(120));
                bar.set_style(
                    ProgressStyle::with_template(STAGE_SPINNER_TEMPLATE)
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                (bar, style(STAGE_BAR_TEMPLATE))
            }
        };
        bar.set_message(message.to_string());
        Arc::new(Self { bar, sized_style })
    }

    /// A [`BarKind::Counter`] bar of `total` units.
    #[must_use]
    pub fn partitions_bar(
        multi: &MultiProgress,
        message: &str,
        total: u64,
    ) -> Arc<dyn ProgressCallback> {
        Self::new(multi, BarKind::Counter, message, Some(total))
    }

    /// A [`BarKind::Stage`] bar.
    #[must_use]
    pub fn batch_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        Self::new(multi, BarKind::Stage, message, None)
    }

    #[cfg(test)]
    fn snapshot(&self) -> (u64, Option<u64>, String) {
        (self.bar.position(), self.bar.length(), self.bar.message())
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_style(self.sized_style.clone());
        self.bar.set_length(total);
        self.bar.set_position(0);
    }

    fn set_position(&self, pos: u64) {
        self.bar.set_position(pos);
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

/// Installs the global logger (filtered by `RUST_LOG`) and returns the
/// [`MultiProgress`] every bar must be added to.
///
/// Safe to call more than once; later calls keep the first logger.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_timed_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    if indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .is_ok()
    {
        log::set_max_level(level);
    }

    multi
}

#[cfg(test)]
mod tests {
    use super::*;

    use indicatif::ProgressDrawTarget;

    fn hidden() -> MultiProgress {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    }

    #[test]
    fn stage_bar_takes_its_length_from_set_total() {
        let multi = hidden();
        let bar = IndicatifProgress {
            bar: multi.add(ProgressBar::new_spinner()),
            sized_style: style(STAGE_BAR_TEMPLATE),
        };
        assert_eq!(bar.snapshot().1, None);

        bar.set_total(4);
        bar.inc(3);
        bar.set_message("001_111_0009 chunk 2/4".to_string());
        assert_eq!(
            bar.snapshot(),
            (3, Some(4), "001_111_0009 chunk 2/4".to_string())
        );
    }

    #[test]
    fn counter_bar_starts_sized() {
        let multi = hidden();
        let progress = IndicatifProgress::partitions_bar(&multi, "Partitions", 6);
        progress.inc(2);
        progress.finish("done".to_string());
    }
}
