#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! S3-compatible blob store mirror (Cloudflare R2 or any S3 endpoint).
//!
//! Two uses:
//!
//! - [`R2CacheBackend`] stores the shared geocoding cache as a bucket
//!   object so partition runs on different machines share it.
//! - [`R2Client::push_canonical`] / [`R2Client::pull_canonical`] mirror the
//!   merged datasets.
//!
//! ## Smart sync
//!
//! File downloads and uploads use **size + MD5/ETag comparison** to skip
//! transfers when the local and remote files are identical.
//!
//! # Environment Variables
//!
//! | Variable | Required | Description |
//! |---|---|---|
//! | `BUCKET_NAME` | Yes | Bucket holding the cache and datasets |
//! | `S3_ENDPOINT_URL` | One of | Full S3 endpoint URL |
//! | `CLOUDFLARE_ACCOUNT_ID` | One of | Cloudflare account ID (builds the R2 endpoint) |
//! | `R2_ACCESS_KEY_ID` | Yes | S3-compatible access key |
//! | `R2_SECRET_ACCESS_KEY` | Yes | S3-compatible secret key |

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::config::{Credentials, StalledStreamProtectionConfig};
use shop_map_listing_models::SnapshotRole;
use shop_map_storage::paths::{self, DataLayout, GEOCODE_CACHE_FILE, canonical_file_name};
use shop_map_storage::{CacheBackend, StorageError};

/// Errors that can occur during blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum R2Error {
    /// Missing required environment variable.
    #[error("Missing environment variable: {name}")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: String,
    },

    /// S3 `GetObject` failed.
    #[error("Failed to download s3://{bucket}/{key}: {source}")]
    Download {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// S3 `PutObject` failed.
    #[error("Failed to upload s3://{bucket}/{key}: {source}")]
    Upload {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// S3 `HeadObject` failed.
    #[error("Failed to head s3://{bucket}/{key}: {source}")]
    Head {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// I/O error reading or writing local files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<R2Error> for StorageError {
    fn from(e: R2Error) -> Self {
        match e {
            R2Error::Io(e) => Self::Io(e),
            other => Self::Backend {
                message: other.to_string(),
            },
        }
    }
}

/// Maximum number of download attempts (initial + retries).
const MAX_DOWNLOAD_ATTEMPTS: u32 = 3;

/// Base delay between download retries (doubles each attempt).
const RETRY_BASE_DELAY: std::time::Duration = std::time::Duration::from_secs(2);

/// Result of a sync batch: how many files were transferred vs skipped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    /// Number of files actually transferred (uploaded or downloaded).
    pub transferred: u64,
    /// Number of files skipped because they matched the remote.
    pub skipped: u64,
    /// Number of files not found (missing locally for upload, or missing
    /// remotely for download).
    pub not_found: u64,
}

impl SyncStats {
    /// Merge another stats into this one.
    pub const fn merge(&mut self, other: Self) {
        self.transferred += other.transferred;
        self.skipped += other.skipped;
        self.not_found += other.not_found;
    }

    /// Total number of files considered.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.transferred + self.skipped + self.not_found
    }
}

impl std::fmt::Display for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} transferred, {} skipped (unchanged), {} not found",
            self.transferred, self.skipped, self.not_found
        )
    }
}

/// Connection settings for the blob store.
#[derive(Clone, PartialEq, Eq)]
pub struct R2Settings {
    /// Bucket name.
    pub bucket: String,
    /// S3 endpoint URL.
    pub endpoint: String,
    /// Access key ID.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
}

impl std::fmt::Debug for R2Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("R2Settings")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl R2Settings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`R2Error::MissingEnv`] if any required variable is unset.
    pub fn from_env() -> Result<Self, R2Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup` (variable name → value).
    ///
    /// `S3_ENDPOINT_URL` takes precedence; otherwise the endpoint is built
    /// from `CLOUDFLARE_ACCOUNT_ID`. Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`R2Error::MissingEnv`] if any required variable is unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, R2Error> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let require = |name: &str| {
            get(name).ok_or_else(|| R2Error::MissingEnv {
                name: name.to_string(),
            })
        };

        let endpoint = match (get("S3_ENDPOINT_URL"), get("CLOUDFLARE_ACCOUNT_ID")) {
            (Some(url), _) => url,
            (None, Some(account_id)) => format!("https://{account_id}.r2.cloudflarestorage.com"),
            (None, None) => {
                return Err(R2Error::MissingEnv {
                    name: "S3_ENDPOINT_URL or CLOUDFLARE_ACCOUNT_ID".to_string(),
                });
            }
        };

        Ok(Self {
            bucket: require("BUCKET_NAME")?,
            endpoint,
            access_key: require("R2_ACCESS_KEY_ID")?,
            secret_key: require("R2_SECRET_ACCESS_KEY")?,
        })
    }
}

/// Remote object metadata from `HeadObject`.
struct RemoteMeta {
    /// Content length in bytes.
    size: u64,
    /// `ETag` (usually the MD5 hex digest surrounded by quotes for
    /// non-multipart uploads).
    etag: Option<String>,
}

/// Client for one bucket.
pub struct R2Client {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl std::fmt::Debug for R2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("R2Client")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl R2Client {
    /// Creates a client from settings.
    #[must_use]
    pub fn new(settings: &R2Settings) -> Self {
        let creds = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            "shop-map-env",
        );

        let config = aws_sdk_s3::Config::builder()
            .endpoint_url(&settings.endpoint)
            .region(Region::new("auto"))
            .credentials_provider(creds)
            .force_path_style(true)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket: settings.bucket.clone(),
        }
    }

    /// Creates a client from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`R2Error::MissingEnv`] if any required variable is unset.
    pub fn from_env() -> Result<Self, R2Error> {
        Ok(Self::new(&R2Settings::from_env()?))
    }

    /// The bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    // ── Canonical datasets ──────────────────────────────────────────

    /// Push the merged `raw` and `final` datasets from `layout` to the
    /// bucket.
    ///
    /// # Errors
    ///
    /// Returns [`R2Error::Upload`] on S3 failures, [`R2Error::Io`] on
    /// local filesystem errors.
    pub async fn push_canonical(&self, layout: &DataLayout) -> Result<SyncStats, R2Error> {
        let mut stats = SyncStats::default();
        for role in [SnapshotRole::Raw, SnapshotRole::Final] {
            stats.merge(
                self.upload(canonical_file_name(role), &layout.canonical_path(role))
                    .await?,
            );
        }
        Ok(stats)
    }

    /// Pull the merged datasets from the bucket into `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`R2Error::Download`] on S3 failures, [`R2Error::Io`] on
    /// local filesystem errors.
    pub async fn pull_canonical(&self, layout: &DataLayout) -> Result<SyncStats, R2Error> {
        paths::ensure_dir(layout.root())?;
        let mut stats = SyncStats::default();
        for role in [SnapshotRole::Raw, SnapshotRole::Final] {
            stats.merge(
                self.download(canonical_file_name(role), &layout.canonical_path(role))
                    .await?,
            );
        }
        Ok(stats)
    }

    // ── Geocoding cache ─────────────────────────────────────────────

    /// Push the local geocoding cache file to the bucket.
    ///
    /// # Errors
    ///
    /// Returns [`R2Error::Upload`] on S3 failures, [`R2Error::Io`] on
    /// local filesystem errors.
    pub async fn push_cache(&self, layout: &DataLayout) -> Result<SyncStats, R2Error> {
        self.upload(GEOCODE_CACHE_FILE, &layout.geocode_cache_path())
            .await
    }

    /// Pull the geocoding cache object into the local cache file.
    ///
    /// # Errors
    ///
    /// Returns [`R2Error::Download`] on S3 failures, [`R2Error::Io`] on
    /// local filesystem errors.
    pub async fn pull_cache(&self, layout: &DataLayout) -> Result<SyncStats, R2Error> {
        paths::ensure_dir(layout.root())?;
        self.download(GEOCODE_CACHE_FILE, &layout.geocode_cache_path())
            .await
    }

    // ── Low-level operations ────────────────────────────────────────

    /// Reads an object into memory. `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`R2Error::Head`] or [`R2Error::Download`] on S3 failures.
    pub async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, R2Error> {
        if self.head(key).await?.is_none() {
            return Ok(None);
        }
        self.fetch(key).await.map(Some)
    }

    /// Replaces an object with `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`R2Error::Upload`] on S3 failures.
    pub async fn put_bytes(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), R2Error> {
        let body = aws_sdk_s3::primitives::ByteStream::from(bytes);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| R2Error::Upload {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        Ok(())
    }

    /// Downloads an object to a local file.
    ///
    /// Uses **size + MD5/ETag comparison** to skip the download when the
    /// local file already matches the remote object. Retries up to
    /// [`MAX_DOWNLOAD_ATTEMPTS`] times on transient errors. The local file
    /// is replaced atomically.
    ///
    /// # Errors
    ///
    /// Returns [`R2Error::Download`] on S3 failures after all retries are
    /// exhausted, [`R2Error::Io`] on local filesystem errors.
    pub async fn download(&self, key: &str, local_path: &Path) -> Result<SyncStats, R2Error> {
        log::info!(
            "Pulling s3://{}/{key} -> {}",
            self.bucket,
            local_path.display()
        );

        if let Some(remote) = self.head(key).await? {
            if is_local_match(local_path, &remote).await {
                log::info!("  skipped (unchanged)");
                return Ok(SyncStats {
                    skipped: 1,
                    ..SyncStats::default()
                });
            }
        } else {
            log::warn!("  not found in bucket (first run?), skipping");
            return Ok(SyncStats {
                not_found: 1,
                ..SyncStats::default()
            });
        }

        let mut last_err: Option<R2Error> = None;

        for attempt in 1..=MAX_DOWNLOAD_ATTEMPTS {
            match self.fetch(key).await {
                Ok(bytes) => {
                    shop_map_storage::atomic::write_atomic(local_path, &bytes)?;
                    #[allow(clippy::cast_precision_loss)] // display-only MB value
                    let mb = bytes.len() as f64 / 1_048_576.0;
                    log::info!("  downloaded {} ({mb:.1} MB)", local_path.display());
                    return Ok(SyncStats {
                        transferred: 1,
                        ..SyncStats::default()
                    });
                }
                Err(e @ R2Error::Download { .. }) if attempt < MAX_DOWNLOAD_ATTEMPTS => {
                    let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt - 1);
                    log::warn!(
                        "  download attempt {attempt}/{MAX_DOWNLOAD_ATTEMPTS} failed, \
                         retrying in {delay:.1?}..."
                    );
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| R2Error::Download {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source: "all download attempts exhausted".into(),
        }))
    }

    /// Single `GetObject` (no smart-sync check, no retry).
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, R2Error> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| R2Error::Download {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        let bytes = output.body.collect().await.map_err(|e| R2Error::Download {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source: Box::new(e),
        })?;

        Ok(bytes.into_bytes().to_vec())
    }

    /// Uploads a local file.
    ///
    /// Uses **size + MD5/ETag comparison** to skip the upload when the
    /// remote object already matches the local file.
    ///
    /// # Errors
    ///
    /// Returns [`R2Error::Upload`] on S3 failures, [`R2Error::Io`] on
    /// local filesystem errors.
    pub async fn upload(&self, key: &str, local_path: &Path) -> Result<SyncStats, R2Error> {
        if !local_path.exists() {
            log::warn!(
                "  {} does not exist locally, skipping",
                local_path.display()
            );
            return Ok(SyncStats {
                not_found: 1,
                ..SyncStats::default()
            });
        }

        if let Some(remote) = self.head(key).await?
            && is_local_match(local_path, &remote).await
        {
            log::info!(
                "  {} -> s3://{}/{key}: skipped (unchanged)",
                local_path.display(),
                self.bucket
            );
            return Ok(SyncStats {
                skipped: 1,
                ..SyncStats::default()
            });
        }

        let data = tokio::fs::read(local_path).await?;
        #[allow(clippy::cast_precision_loss)] // display-only MB value
        let mb = data.len() as f64 / 1_048_576.0;
        log::info!(
            "Pushing {} -> s3://{}/{key} ({mb:.1} MB)",
            local_path.display(),
            self.bucket
        );

        self.put_bytes(key, data, content_type_for(key)).await?;

        log::info!("  uploaded {key}");
        Ok(SyncStats {
            transferred: 1,
            ..SyncStats::default()
        })
    }

    /// Fetch object metadata via `HeadObject`.
    ///
    /// Returns `None` if the object doesn't exist (`NotFound`).
    async fn head(&self, key: &str) -> Result<Option<RemoteMeta>, R2Error> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let size = output.content_length().unwrap_or(0);
                #[allow(clippy::cast_sign_loss)] // S3 content-length is non-negative
                let size = size as u64;
                let etag = output.e_tag().map(str::to_string);
                Ok(Some(RemoteMeta { size, etag }))
            }
            Err(err) => {
                // NotFound is not an error; it means the object doesn't exist
                let service_err = err.as_service_error();
                if service_err
                    .is_some_and(aws_sdk_s3::operation::head_object::HeadObjectError::is_not_found)
                {
                    return Ok(None);
                }
                Err(R2Error::Head {
                    bucket: self.bucket.clone(),
                    key: key.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }
}

/// The geocoding cache stored as a bucket object.
///
/// Writers on one machine serialize through the store's local lock file;
/// the bucket itself offers no conditional write here, so runs on separate
/// machines should not persist at the same time.
#[derive(Debug, Clone)]
pub struct R2CacheBackend {
    client: Arc<R2Client>,
    key: String,
}

impl R2CacheBackend {
    /// Creates a backend for object `key`.
    #[must_use]
    pub fn new(client: Arc<R2Client>, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }

    /// Creates a backend for the standard cache object name.
    #[must_use]
    pub fn standard(client: Arc<R2Client>) -> Self {
        Self::new(client, GEOCODE_CACHE_FILE)
    }
}

#[async_trait]
impl CacheBackend for R2CacheBackend {
    async fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.client.get_bytes(&self.key).await?)
    }

    async fn write(&self, bytes: Vec<u8>) -> Result<(), StorageError> {
        Ok(self
            .client
            .put_bytes(&self.key, bytes, content_type_for(&self.key))
            .await?)
    }

    fn describe(&self) -> String {
        format!("s3://{}/{}", self.client.bucket(), self.key)
    }
}

/// MIME type for the objects this crate writes.
fn content_type_for(key: &str) -> &'static str {
    if key.ends_with(".csv") {
        "text/csv"
    } else if key.ends_with(".json") {
        "application/json"
    } else {
        "application/octet-stream"
    }
}

/// Checks whether a local file matches the remote object.
///
/// 1. If the local file doesn't exist, returns `false`.
/// 2. Compares file sizes. If they differ, returns `false` immediately.
/// 3. If sizes match AND the remote `ETag` looks like an MD5 hex digest
///    (non-multipart upload), computes the local file's MD5 and compares.
/// 4. If the `ETag` is a multipart `ETag` (contains `-`), falls back to
///    size-only comparison.
async fn is_local_match(local_path: &Path, remote: &RemoteMeta) -> bool {
    let Ok(meta) = tokio::fs::metadata(local_path).await else {
        return false;
    };

    if meta.len() != remote.size {
        return false;
    }

    if let Some(etag) = &remote.etag {
        let clean = etag.trim_matches('"');
        // Multipart ETags contain a `-` (e.g. "abc123-5"), so skip the MD5 check
        if !clean.contains('-')
            && clean.len() == 32
            && let Ok(local_md5) = compute_md5(local_path).await
        {
            return local_md5 == clean;
        }
    }

    true
}

/// Compute MD5 hex digest of a local file.
async fn compute_md5(path: &Path) -> Result<String, std::io::Error> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || compute_md5_sync(&path))
        .await
        .map_err(std::io::Error::other)?
}

/// Synchronous MD5 computation (runs in blocking thread).
fn compute_md5_sync(path: &Path) -> Result<String, std::io::Error> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; 256 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", context.finalize()))
}
