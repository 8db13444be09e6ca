#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Generative enrichment of prepared listing records.
//!
//! A partition's records are sent to a [`TextGenerator`] in fixed-size
//! chunks. Each row carries a synthetic temp id derived from the partition
//! key and its position, which the service echoes back so locally inferred
//! hidden tags can be re-attached to the rows it returns.
//!
//! A chunk that fails every retry is dropped; the rest of the partition
//! still goes through.

pub mod prompt;
pub mod providers;
pub mod table;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use shop_map_listing_models::progress::ProgressCallback;
use shop_map_listing_models::{EnrichedRecord, PartitionKey, PreparedRecord};
use shop_map_retry::RetryPolicy;
use thiserror::Error;

use crate::prompt::IndustryKind;
use crate::table::TableRow;

pub use providers::{AiProvider, ProviderConfig, TextGenerator, create_provider};

/// Default number of records per generative call.
pub const DEFAULT_CHUNK_SIZE: usize = 30;

/// Default pause after every chunk.
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_secs(2);

/// Errors that can occur during enrichment.
#[derive(Debug, Error)]
pub enum EnrichError {
    /// HTTP request to the provider failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV rendering failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Provider-specific error.
    #[error("Provider error: {message}")]
    Provider {
        /// Description of what went wrong.
        message: String,
    },

    /// The selected provider needs a credential that is not configured.
    #[error("Missing credential: {name}")]
    MissingCredential {
        /// Name of the missing setting.
        name: String,
    },

    /// The response could not be parsed as the expected table.
    #[error("Malformed response: {message}")]
    MalformedResponse {
        /// Description of the parse failure.
        message: String,
    },

    /// The response contained no data rows.
    #[error("Empty response")]
    EmptyResponse,

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description.
        message: String,
    },
}

/// Result of [`Enricher::enrich_partition`].
#[derive(Debug, Clone, Default)]
pub struct EnrichOutcome {
    /// Rows returned by every successful chunk, in chunk order.
    pub records: Vec<EnrichedRecord>,
    /// Chunks that produced rows.
    pub chunks_succeeded: usize,
    /// Chunks dropped after exhausting their retries.
    pub chunks_failed: usize,
}

/// Synthetic id of the row at `row` within the partition `key`.
#[must_use]
pub fn temp_id(key: &PartitionKey, row: usize) -> String {
    format!("{key}_{row:05}")
}

/// Sends partitions through a [`TextGenerator`] chunk by chunk.
pub struct Enricher {
    generator: Arc<dyn TextGenerator>,
    chunk_size: usize,
    retry: RetryPolicy,
    chunk_delay: Duration,
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("generator", &self.generator.name())
            .field("chunk_size", &self.chunk_size)
            .field("retry", &self.retry)
            .field("chunk_delay", &self.chunk_delay)
            .finish()
    }
}

impl Enricher {
    /// Creates an enricher with the default chunk size, three attempts per
    /// chunk two seconds apart, and a two second pause between chunks.
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::new(3, Duration::from_secs(2)),
            chunk_delay: DEFAULT_CHUNK_DELAY,
        }
    }

    /// Sets the number of records per call. Zero is treated as one.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sets the retry policy for each chunk.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the pause between chunks.
    #[must_use]
    pub const fn with_chunk_delay(mut self, chunk_delay: Duration) -> Self {
        self.chunk_delay = chunk_delay;
        self
    }

    /// Enriches every record of a partition.
    ///
    /// `industry_name` is written to each returned row's `ind`. Rows whose
    /// echoed id matches an input temp id get that input's hidden tags;
    /// any other row gets none.
    pub async fn enrich_partition(
        &self,
        key: &PartitionKey,
        industry_name: &str,
        records: &[PreparedRecord],
        progress: &dyn ProgressCallback,
    ) -> EnrichOutcome {
        let kind = IndustryKind::from_code(key.industry_code());
        let chunk_count = records.len().div_ceil(self.chunk_size);

        log::info!(
            "Enriching {} records of {key} in {chunk_count} chunks via {}",
            records.len(),
            self.generator.name()
        );

        progress.set_total(chunk_count as u64);
        progress.set_position(0);

        let mut outcome = EnrichOutcome::default();
        for (chunk_index, chunk) in records.chunks(self.chunk_size).enumerate() {
            let offset = chunk_index * self.chunk_size;
            progress.set_message(format!("{key} chunk {}/{chunk_count}", chunk_index + 1));

            match self.enrich_chunk(key, kind, offset, chunk).await {
                Ok(rows) => {
                    log::info!(
                        "{key}: chunk {}/{chunk_count} returned {} rows",
                        chunk_index + 1,
                        rows.len()
                    );
                    outcome.chunks_succeeded += 1;
                    outcome.records.extend(
                        rows.into_iter()
                            .map(|(row, tags)| into_enriched(row, industry_name, tags)),
                    );
                }
                Err(e) => {
                    log::error!(
                        "{key}: dropping chunk {}/{chunk_count} ({} records): {e}",
                        chunk_index + 1,
                        chunk.len()
                    );
                    outcome.chunks_failed += 1;
                }
            }

            progress.inc(1);
            if chunk_index + 1 < chunk_count && !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }

        progress.finish(format!(
            "{key}: {} rows from {}/{chunk_count} chunks",
            outcome.records.len(),
            outcome.chunks_succeeded
        ));
        outcome
    }

    /// Runs one chunk through the retry policy and pairs each returned row
    /// with the hidden tags of the input row it echoes.
    async fn enrich_chunk(
        &self,
        key: &PartitionKey,
        kind: IndustryKind,
        offset: usize,
        chunk: &[PreparedRecord],
    ) -> Result<Vec<(TableRow, BTreeSet<String>)>, EnrichError> {
        let rows: Vec<(String, &PreparedRecord)> = chunk
            .iter()
            .enumerate()
            .map(|(i, record)| (temp_id(key, offset + i), record))
            .collect();

        let input = prompt::render_input(&rows)?;
        let prompt = prompt::build_prompt(kind, &input);

        let generator = &self.generator;
        let prompt = prompt.as_str();
        let label = format!("{key} rows {offset}..{}", offset + chunk.len());
        let parsed = self
            .retry
            .run(&label, move || async move {
                let response = generator.generate(prompt).await?;
                table::parse_table(&response)
            })
            .await?;

        let tags: HashMap<&str, &BTreeSet<String>> = rows
            .iter()
            .map(|(id, record)| (id.as_str(), &record.hidden_tags))
            .collect();

        Ok(parsed
            .into_iter()
            .map(|row| {
                let row_tags = tags
                    .get(row.id.as_str())
                    .map(|t| (*t).clone())
                    .unwrap_or_default();
                (row, row_tags)
            })
            .collect())
    }
}

fn into_enriched(
    row: TableRow,
    industry_name: &str,
    hidden_tags: BTreeSet<String>,
) -> EnrichedRecord {
    EnrichedRecord {
        id: row.id,
        name: row.name,
        ind: industry_name.to_string(),
        city: row.city,
        district: row.district,
        address: row.address,
        floor: row.floor,
        lat: row.lat,
        lng: row.lng,
        phone: row.phone,
        review_summary: row.review_summary,
        rating: row.rating,
        price_level: row.price_level,
        hidden_tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use shop_map_listing_models::RawRecord;
    use shop_map_listing_models::progress::NullProgress;

    const HEADER: &str = "ID|店名|縣市|行政區|地址(不含樓層)|樓層|緯度|經度|電話|評論|星級數|價格區間";

    /// Answers each prompt by echoing the temp ids it contains, failing the
    /// calls listed in `fail_calls` (1-based).
    struct EchoGenerator {
        calls: Mutex<usize>,
        fail_calls: Vec<usize>,
        extra_row: Option<String>,
        reverse: bool,
        drop_row: Option<usize>,
    }

    impl EchoGenerator {
        fn new(fail_calls: Vec<usize>) -> Self {
            Self {
                calls: Mutex::new(0),
                fail_calls,
                extra_row: None,
                reverse: false,
                drop_row: None,
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, EnrichError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if self.fail_calls.contains(&call) {
                return Err(EnrichError::Provider {
                    message: "boom".to_string(),
                });
            }

            let input = prompt.split("# 輸入資料\n").nth(1).unwrap();
            let mut ids: Vec<&str> = input
                .lines()
                .skip(1)
                .map(|line| line.split(',').next().unwrap())
                .collect();
            if let Some(row) = self.drop_row {
                ids.remove(row);
            }
            if self.reverse {
                ids.reverse();
            }

            let mut out = format!("```csv\n{HEADER}\n");
            for id in ids {
                out.push_str(&format!("{id}|店{id}|台北市|士林區|路|||121.5|(02)1234|好|4.5/5|300\n"));
            }
            if let Some(extra) = &self.extra_row {
                out.push_str(extra);
                out.push('\n');
            }
            out.push_str("```");
            Ok(out)
        }

        fn name(&self) -> String {
            "echo".to_string()
        }
    }

    fn key() -> PartitionKey {
        PartitionKey::new("001", "111", "0008").unwrap()
    }

    fn records(n: usize) -> Vec<PreparedRecord> {
        (0..n)
            .map(|i| {
                let mut record = PreparedRecord::new(RawRecord {
                    name: format!("shop {i}"),
                    ..RawRecord::default()
                });
                record.hidden_tags.insert(format!("tag{i}"));
                record
            })
            .collect()
    }

    fn enricher(generator: Arc<dyn TextGenerator>) -> Enricher {
        Enricher::new(generator)
            .with_chunk_size(2)
            .with_retry(RetryPolicy::new(2, Duration::ZERO))
            .with_chunk_delay(Duration::ZERO)
    }

    #[test]
    fn temp_ids_are_zero_padded() {
        assert_eq!(temp_id(&key(), 7), "001_111_0008_00007");
        assert_eq!(temp_id(&key(), 12345), "001_111_0008_12345");
    }

    #[tokio::test]
    async fn reattaches_tags_by_echoed_id() {
        let generator = Arc::new(EchoGenerator::new(vec![]));
        let outcome = enricher(generator.clone())
            .enrich_partition(&key(), "餐飲業", &records(3), &NullProgress)
            .await;

        assert_eq!(outcome.chunks_succeeded, 2);
        assert_eq!(outcome.chunks_failed, 0);
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(generator.calls(), 2);

        let third = &outcome.records[2];
        assert_eq!(third.id, "001_111_0008_00002");
        assert_eq!(third.ind, "餐飲業");
        assert_eq!(third.lat, None);
        assert_eq!(third.lng, Some(121.5));
        assert!(third.hidden_tags.contains("tag2"));
    }

    #[tokio::test]
    async fn reordered_rows_keep_their_own_tags() {
        let mut generator = EchoGenerator::new(vec![]);
        generator.reverse = true;
        let outcome = enricher(Arc::new(generator))
            .with_chunk_size(4)
            .enrich_partition(&key(), "餐飲業", &records(4), &NullProgress)
            .await;

        let ids: Vec<&str> = outcome.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "001_111_0008_00003",
                "001_111_0008_00002",
                "001_111_0008_00001",
                "001_111_0008_00000"
            ]
        );
        for record in &outcome.records {
            let row = record.id.rsplit('_').next().unwrap().parse::<usize>().unwrap();
            let expected: BTreeSet<String> = [format!("tag{row}")].into();
            assert_eq!(record.hidden_tags, expected);
        }
    }

    #[tokio::test]
    async fn dropped_row_is_omitted_without_shifting_tags() {
        let mut generator = EchoGenerator::new(vec![]);
        generator.reverse = true;
        generator.drop_row = Some(1);
        let outcome = enricher(Arc::new(generator))
            .with_chunk_size(4)
            .enrich_partition(&key(), "餐飲業", &records(4), &NullProgress)
            .await;

        let tagged: Vec<(&str, Vec<&str>)> = outcome
            .records
            .iter()
            .map(|r| (r.id.as_str(), r.hidden_tags.iter().map(String::as_str).collect()))
            .collect();
        assert_eq!(
            tagged,
            [
                ("001_111_0008_00003", vec!["tag3"]),
                ("001_111_0008_00002", vec!["tag2"]),
                ("001_111_0008_00000", vec!["tag0"]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_between_chunks_but_not_after_the_last() {
        let start = tokio::time::Instant::now();
        let outcome = enricher(Arc::new(EchoGenerator::new(vec![])))
            .with_chunk_delay(Duration::from_secs(10))
            .enrich_partition(&key(), "餐飲業", &records(5), &NullProgress)
            .await;

        assert_eq!(outcome.chunks_succeeded, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn unknown_ids_get_no_tags() {
        let mut generator = EchoGenerator::new(vec![]);
        generator.extra_row = Some("bogus|店|台北市".to_string());
        let outcome = enricher(Arc::new(generator))
            .enrich_partition(&key(), "餐飲業", &records(1), &NullProgress)
            .await;

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[1].id, "bogus");
        assert!(outcome.records[1].hidden_tags.is_empty());
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let generator = Arc::new(EchoGenerator::new(vec![1]));
        let outcome = enricher(generator.clone())
            .enrich_partition(&key(), "餐飲業", &records(2), &NullProgress)
            .await;

        assert_eq!(outcome.chunks_succeeded, 1);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_chunk_is_dropped() {
        // Chunk one fails both attempts; chunk two succeeds.
        let generator = Arc::new(EchoGenerator::new(vec![1, 2]));
        let outcome = enricher(generator.clone())
            .enrich_partition(&key(), "餐飲業", &records(4), &NullProgress)
            .await;

        assert_eq!(outcome.chunks_failed, 1);
        assert_eq!(outcome.chunks_succeeded, 1);
        let ids: Vec<&str> = outcome.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["001_111_0008_00002", "001_111_0008_00003"]);
    }

    #[tokio::test]
    async fn empty_partition_makes_no_calls() {
        let generator = Arc::new(EchoGenerator::new(vec![]));
        let outcome = enricher(generator.clone())
            .enrich_partition(&key(), "餐飲業", &[], &NullProgress)
            .await;

        assert!(outcome.records.is_empty());
        assert_eq!(generator.calls(), 0);
    }
}
