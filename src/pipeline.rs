//! C9 Pipeline Coordinator (spec §4.9).
//!
//! Orchestrates C1-C8 for a batch of URLs: validate, check cache, download,
//! decode, score and tag with metadata, select the best and most diverse
//! `top_k`, normalize, cache, and return. No single URL's failure aborts
//! the batch — every failure is captured as a [`StageError`] in the
//! returned [`PipelineResult`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::cache::{cache_key, Cache};
use crate::config::PipelineConfig;
use crate::decoder::Decoder;
use crate::downloader::Downloader;
use crate::error::{DecodeError, ErrorKind, StageError};
use crate::metadata::MetadataExtractor;
use crate::metrics::{url_fingerprint, PipelineMetrics};
use crate::quality::QualityAnalyzer;
use crate::resize::Resizer;
use crate::selector::Selector;
use crate::types::{Candidate, DecodedImage, ImageFormatKind, ImageMetadata, PipelineResult, QualityMetrics};
use crate::validator::UrlValidator;

/// Companion record stored alongside the normalized JPEG bytes under a
/// `:meta` key (spec §4.8: "stored under a parallel key ... at the
/// implementation's discretion"). Lets a cache hit reconstruct a full
/// [`Candidate`] — including its quality score and phash — without
/// re-running C4/C5 on the cached bytes.
#[derive(Serialize, Deserialize)]
struct CachedRecord {
    metadata: ImageMetadata,
    quality: QualityMetrics,
}

fn meta_key(key: &str) -> String {
    format!("{key}:meta")
}

pub struct Coordinator {
    config: Arc<PipelineConfig>,
    validator: UrlValidator,
    downloader: Downloader,
    decoder: Decoder,
    selector: Selector,
    resizer: Resizer,
    cache: Cache,
    metrics: Arc<PipelineMetrics>,
}

impl Coordinator {
    pub fn new(config: PipelineConfig) -> Self {
        let config = Arc::new(config);
        let validator = UrlValidator::with_scheme_policy(
            config.allow_hosts.clone(),
            config.deny_extensions.clone(),
            config.require_https,
        );
        let downloader = Downloader::new(config.clone());
        let decoder = Decoder::new(config.max_pixels);
        let selector = Selector::new(config.quality_floor, config.dedup_threshold, config.top_k);
        let resizer = Resizer::new(config.max_dim, config.jpeg_quality, config.max_bytes);
        let cache = Cache::new(config.l1_max_entries, config.l1_max_bytes, config.l1_ttl);

        Self {
            config,
            validator,
            downloader,
            decoder,
            selector,
            resizer,
            cache,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Opt in to a Redis L2 tier. Non-fatal: callers who want L2 should
    /// await this before the first [`Coordinator::process`] call.
    pub async fn with_redis(mut self, redis_url: &str) -> Self {
        match self.cache.clone().with_redis(redis_url, self.config.l2_ttl).await {
            Ok(cache) => self.cache = cache,
            Err(e) => warn!(error = %e, "failed to connect l2 cache, continuing with l1 only"),
        }
        self
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    /// Point invalidation by URL (spec §4.8): drops both the normalized
    /// JPEG and its companion `:meta` record from L1 and, if configured,
    /// L2. The next `process` call for this URL is guaranteed to miss the
    /// cache and re-run the full pipeline.
    pub async fn invalidate(&self, url: &str) {
        let key = cache_key(url);
        self.cache.invalidate(&key).await;
        self.cache.invalidate(&meta_key(&key)).await;
    }

    /// Prefix invalidation (spec §4.8), delegating to the L2 store's
    /// native key-listing capability. `prefix` is matched against raw
    /// cache keys (e.g. `"img:"` invalidates everything this coordinator
    /// has cached).
    pub async fn invalidate_prefix(&self, prefix: &str) {
        self.cache.invalidate_prefix(prefix).await;
    }

    /// Process `urls` with no cancellation signal — equivalent to
    /// [`Coordinator::process_cancellable`] with a token that never fires.
    ///
    /// `use_cache` is the operation parameter from spec §4.9's
    /// `process(urls, K=3, use_cache=true)` contract: when `false`, the
    /// coordinator neither reads nor writes L1/L2 for this call — every
    /// URL is freshly downloaded, decoded and normalized, and nothing it
    /// produces is cached for later calls. `K` is sourced from
    /// [`PipelineConfig::top_k`] at construction rather than a per-call
    /// argument, since every other tunable in this crate's contract is
    /// configuration, not a call-site parameter.
    pub async fn process(&self, urls: &[String], use_cache: bool) -> PipelineResult {
        self.process_cancellable(urls, use_cache, CancellationToken::new()).await
    }

    /// Same contract as [`Coordinator::process`], but `cancel` may be
    /// triggered concurrently (spec §4.9, §5). On cancellation: in-flight
    /// downloads are aborted, pending decode/normalize work is dropped, and
    /// whatever was already normalized is returned as a partial result.
    /// Abandoned URLs appear in neither `images` nor `errors` — P1 only
    /// requires a URL land in *at most* one of the two.
    #[instrument(skip(self, urls, cancel), fields(count = urls.len(), use_cache))]
    pub async fn process_cancellable(
        &self,
        urls: &[String],
        use_cache: bool,
        cancel: CancellationToken,
    ) -> PipelineResult {
        let start = Instant::now();
        PipelineMetrics::add(&self.metrics.urls_in, urls.len() as u64);

        let mut errors = Vec::new();
        let mut valid_urls = Vec::with_capacity(urls.len());
        for url in urls {
            match self.validator.validate(url) {
                Ok(()) => {
                    PipelineMetrics::incr(&self.metrics.validated);
                    valid_urls.push(url.clone());
                }
                Err(e) => {
                    PipelineMetrics::incr(&self.metrics.rejected);
                    errors.push(StageError::new(url.clone(), ErrorKind::from(&e), e.to_string()));
                }
            }
        }

        if valid_urls.is_empty() || cancel.is_cancelled() {
            return PipelineResult {
                processing_time_seconds: start.elapsed().as_secs_f64(),
                errors,
                ..PipelineResult::empty()
            };
        }

        // C8 is consulted before C2 (spec §4.9): a cache hit yields the
        // *normalized* JPEG from a previous C7 pass plus its companion
        // metadata/quality record, so a repeat request for the same URL
        // skips download, decode, scoring and normalization entirely.
        // When `use_cache` is false this lookup is skipped outright, so
        // every URL falls straight through to `to_download`.
        let mut to_download = Vec::new();
        let mut candidates = Vec::new();
        let mut cached_final_urls: HashSet<String> = HashSet::new();
        for url in &valid_urls {
            if !use_cache {
                to_download.push(url.clone());
                continue;
            }
            let key = cache_key(url);
            match self.load_from_cache(&key).await {
                Some((record, jpeg_bytes)) => {
                    PipelineMetrics::incr(&self.metrics.cache_hits);
                    match self.decoder.decode(&jpeg_bytes) {
                        Ok(image) => {
                            cached_final_urls.insert(url.clone());
                            candidates.push(Candidate {
                                image,
                                metadata: record.metadata,
                                quality: record.quality,
                            });
                        }
                        Err(e) => {
                            // Cached bytes are corrupt (should not happen in
                            // practice) — fall back to a fresh fetch rather
                            // than surfacing a spurious decode error.
                            warn!(url_fp = %url_fingerprint(url), error = %e, "cached image failed to decode, re-downloading");
                            PipelineMetrics::incr(&self.metrics.cache_misses);
                            to_download.push(url.clone());
                        }
                    }
                }
                None => {
                    PipelineMetrics::incr(&self.metrics.cache_misses);
                    to_download.push(url.clone());
                }
            }
        }

        let download_results = self.downloader.download_cancellable(&to_download, &cancel).await;

        let cpu_semaphore = Arc::new(Semaphore::new(self.config.cpu_workers));
        let mut decode_tasks = Vec::with_capacity(download_results.len());
        for result in download_results {
            if cancel.is_cancelled() {
                break;
            }
            if !result.success {
                let err = result.error.expect("failed download always carries an error");
                warn!(url_fp = %url_fingerprint(&result.url), error = %err, "download failed");
                PipelineMetrics::incr(&self.metrics.download_failed);
                errors.push(StageError::new(result.url, ErrorKind::from(&err), err.to_string()));
                continue;
            }
            PipelineMetrics::incr(&self.metrics.downloaded);
            PipelineMetrics::add(&self.metrics.bytes_downloaded, result.content_length.unwrap_or(0));
            self.metrics.download_duration.record(result.duration);

            let bytes = result.bytes.expect("successful download always carries bytes");
            let url = result.url;
            let max_pixels = self.config.max_pixels;
            let semaphore = cpu_semaphore.clone();

            decode_tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("cpu semaphore never closes");
                let decode_bytes = bytes.clone();
                let decode_result = tokio::task::spawn_blocking(move || {
                    let decoder = Decoder::new(max_pixels);
                    decoder.decode(&decode_bytes)
                })
                .await;
                // A panic inside the CPU worker (a malformed image tripping an
                // unexpected `image`-crate panic path) must not take down the
                // coordinator — fold it into the same per-URL failure channel
                // as an ordinary decode error.
                let decoded = decode_result.unwrap_or_else(|join_err| {
                    Err(DecodeError::Corrupted(format!("decode worker panicked: {join_err}")))
                });
                (url, bytes, decoded)
            }));
        }

        for task in decode_tasks {
            if cancel.is_cancelled() {
                task.abort();
                continue;
            }
            let (url, raw_bytes, decode_result) = match task.await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    warn!(error = %join_err, "decode task panicked");
                    errors.push(StageError::new(String::new(), ErrorKind::Internal, join_err.to_string()));
                    continue;
                }
            };
            match decode_result {
                Ok(decoded) => {
                    PipelineMetrics::incr(&self.metrics.decoded);
                    let metadata = MetadataExtractor::extract(&url, &raw_bytes, &decoded);
                    let quality = QualityAnalyzer::analyze(&decoded.pixels, raw_bytes.len() as u64);
                    candidates.push(Candidate {
                        image: decoded,
                        metadata,
                        quality,
                    });
                }
                Err(e) => {
                    warn!(url_fp = %url_fingerprint(&url), error = %e, "decode failed");
                    PipelineMetrics::incr(&self.metrics.decode_failed);
                    errors.push(StageError::new(url, ErrorKind::from(&e), e.to_string()));
                }
            }
        }

        let selected = self.selector.select(candidates);
        PipelineMetrics::add(&self.metrics.selected, selected.len() as u64);

        let mut images = Vec::with_capacity(selected.len());
        let mut metadata_out = Vec::with_capacity(selected.len());
        let mut quality_scores = Vec::with_capacity(selected.len());

        for candidate in selected {
            if cancel.is_cancelled() {
                break;
            }

            // A candidate rebuilt from a cache hit is already the C7 output
            // of a previous pass: re-running the resizer on it would be
            // redundant work and could perturb the bytes on a second JPEG
            // re-encode, which would violate P8's bit-exact repeat-run
            // guarantee. Reuse the cached bytes verbatim instead.
            if cached_final_urls.contains(&candidate.metadata.url) {
                images.push(candidate.image.clone());
                metadata_out.push(candidate.metadata);
                quality_scores.push(candidate.quality.overall);
                continue;
            }

            match self.resizer.normalize(&candidate.image.pixels) {
                Ok(encoded) => {
                    let normalized = match image::load_from_memory(&encoded) {
                        Ok(img) => img,
                        Err(_) => candidate.image.pixels.clone(),
                    };
                    if use_cache {
                        let key = cache_key(&candidate.metadata.url);
                        self.cache_final(&key, encoded, &candidate.metadata, &candidate.quality).await;
                    }

                    images.push(DecodedImage {
                        width: normalized.width(),
                        height: normalized.height(),
                        color_mode: crate::types::ColorMode::Rgb,
                        format: ImageFormatKind::Jpeg,
                        is_animated: candidate.image.is_animated,
                        frame_count: candidate.image.frame_count,
                        pixels: normalized,
                    });
                    metadata_out.push(candidate.metadata);
                    quality_scores.push(candidate.quality.overall);
                }
                Err(e) => {
                    warn!(url_fp = %url_fingerprint(&candidate.metadata.url), error = %e, "normalize failed");
                    PipelineMetrics::incr(&self.metrics.normalize_failed);
                    errors.push(StageError::new(
                        candidate.metadata.url.clone(),
                        ErrorKind::from(&e),
                        e.to_string(),
                    ));
                }
            }
        }

        let elapsed = start.elapsed();
        self.metrics.batch_duration.record(elapsed);
        info!(
            selected = images.len(),
            errors = errors.len(),
            elapsed_ms = elapsed.as_millis(),
            "pipeline batch complete"
        );

        PipelineResult {
            images,
            metadata: metadata_out,
            quality_scores,
            processing_time_seconds: elapsed.as_secs_f64(),
            errors,
        }
    }

    /// Look up `key` in the cache. A hit requires both the normalized JPEG
    /// bytes and the parallel `:meta` record to be present; a partial hit
    /// (e.g. the metadata entry aged out of L1 independently) is treated as
    /// a miss so the caller re-derives both from a fresh download.
    async fn load_from_cache(&self, key: &str) -> Option<(CachedRecord, Arc<Vec<u8>>)> {
        let jpeg_bytes = self.cache.get(key).await?;
        let meta_bytes = self.cache.get(&meta_key(key)).await?;
        let record: CachedRecord = serde_json::from_slice(&meta_bytes).ok()?;
        Some((record, jpeg_bytes))
    }

    /// Populate the cache after C7 (spec §4.8, §4.9): the normalized JPEG
    /// under `key`, and its metadata/quality record under `{key}:meta`.
    async fn cache_final(&self, key: &str, jpeg_bytes: Vec<u8>, metadata: &ImageMetadata, quality: &QualityMetrics) {
        let record = CachedRecord {
            metadata: metadata.clone(),
            quality: *quality,
        };
        match serde_json::to_vec(&record) {
            Ok(meta_bytes) => {
                self.cache.put(key, jpeg_bytes).await;
                self.cache.put(&meta_key(key), meta_bytes).await;
            }
            Err(e) => {
                warn!(error = %e, "failed to serialize cache metadata record, skipping cache write");
            }
        }
    }
}
