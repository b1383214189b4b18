//! Async orchestration of one generation at a time.
//!
//! [`GenerationCoordinator::generate`] runs cache lookup, analysis,
//! sampling, and assembly in order. Each CPU-heavy stage runs on
//! [`tokio::task::spawn_blocking`] behind a semaphore, so the caller's
//! runtime never blocks and the number of busy worker threads stays
//! bounded even when cancelled stages are still winding down.
//!
//! The coordinator's observable state is one mutex-guarded record. Each
//! generation gets a monotonically increasing id; a stage finishing for
//! an id that is no longer current is discarded rather than applied.
//! This is what makes [`cancel_generation`](GenerationCoordinator::cancel_generation)
//! safe to call at any point.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

use pointillist_cache::ResultCache;
use pointillist_pipeline::{
    Dimensions, ImageAnalyzer, ParticleGenerationConfig, PixelBuffer, Sample, SamplingParams,
    sampling,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::assembler::Assembler;
use crate::error::GenerationError;
use crate::key::{CachedSamples, cache_key};
use crate::particle::{Particle, ScreenSize};
use crate::report::{GenerationReport, GenerationSummary, StageMetrics, StageReport};
use crate::state::{CoordinatorMetrics, CoordinatorSnapshot, GenerationStage, MetricCounters};

/// Progress callback: `(progress in [0, 1], stage)`.
///
/// Reports are delivered one at a time and in order, outside the state
/// lock, so the callback may call [`GenerationCoordinator::state`] or
/// [`GenerationCoordinator::cancel_generation`]. Once `cancel_generation`
/// returns, the cancelled generation reports nothing further.
pub type ProgressFn = dyn Fn(f32, GenerationStage) + Send + Sync;

/// Particles plus the report describing how they were made.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Assembled particles.
    pub particles: Vec<Particle>,
    /// Per-stage timings and counts.
    pub report: GenerationReport,
}

/// Progress reported after each stage of a fresh generation.
const ANALYZED: f32 = 0.4;
const SAMPLED: f32 = 0.7;
const ASSEMBLED: f32 = 0.9;

/// Mutable coordinator state. Only ever touched under the mutex.
struct Record {
    generation: u64,
    is_generating: bool,
    progress: f32,
    stage: GenerationStage,
    token: Option<CancellationToken>,
    pool: Arc<Semaphore>,
    pool_size: usize,
    /// Thread currently running the progress callback, if any.
    delivering_on: Option<ThreadId>,
}

impl Record {
    fn new(pool_size: usize) -> Self {
        Self {
            generation: 0,
            is_generating: false,
            progress: 0.0,
            stage: GenerationStage::Idle,
            token: None,
            pool: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            delivering_on: None,
        }
    }

    const fn is_current(&self, id: u64) -> bool {
        self.generation == id && self.is_generating
    }

    /// End the current generation in `stage` with progress reset.
    fn stop(&mut self, stage: GenerationStage) {
        self.is_generating = false;
        self.progress = 0.0;
        self.stage = stage;
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}

/// Drives generations, one at a time.
pub struct GenerationCoordinator {
    analyzer: ImageAnalyzer,
    assembler: Arc<dyn Assembler>,
    cache: Option<Arc<ResultCache>>,
    record: Mutex<Record>,
    /// Serializes progress delivery. Always taken before `record`.
    delivery: Mutex<()>,
    counters: MetricCounters,
}

impl fmt::Debug for GenerationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationCoordinator")
            .field("analyzer", &self.analyzer)
            .field("cache", &self.cache)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl GenerationCoordinator {
    /// Create a coordinator using `assembler` and, if given, `cache`.
    #[must_use]
    pub fn new(assembler: Arc<dyn Assembler>, cache: Option<Arc<ResultCache>>) -> Self {
        Self {
            analyzer: ImageAnalyzer::default(),
            assembler,
            cache,
            record: Mutex::new(Record::new(
                ParticleGenerationConfig::DEFAULT_MAX_CONCURRENT_OPERATIONS,
            )),
            delivery: Mutex::new(()),
            counters: MetricCounters::default(),
        }
    }

    /// Replace the analyzer settings.
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: ImageAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Current state, read under one lock.
    #[must_use]
    pub fn state(&self) -> CoordinatorSnapshot {
        let record = self.lock();
        CoordinatorSnapshot {
            is_generating: record.is_generating,
            progress: record.progress,
            stage: record.stage,
        }
    }

    /// Lifetime counters.
    #[must_use]
    pub fn metrics(&self) -> CoordinatorMetrics {
        self.counters.snapshot()
    }

    /// Cancel the in-flight generation, if any.
    ///
    /// The pending [`generate`](Self::generate) call returns
    /// [`GenerationError::Cancelled`] promptly. Returns whether anything
    /// was cancelled.
    pub fn cancel_generation(&self) -> bool {
        let delivering_on = {
            let mut record = self.lock();
            if !record.is_generating {
                return false;
            }
            record.stop(GenerationStage::Cancelled);
            MetricCounters::bump(&self.counters.cancellations);
            log::info!("generation {} cancelled", record.generation);
            record.delivering_on
        };
        // Wait out a report already in flight on another thread. Called
        // from inside the callback, the report is this very call.
        if delivering_on.is_some_and(|id| id != thread::current().id()) {
            drop(self.lock_delivery());
        }
        true
    }

    /// Generate particles for `buffer`.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Busy`] if a generation is already in
    /// flight, [`GenerationError::Cancelled`] if this one is cancelled,
    /// and a stage-specific variant if a stage fails.
    pub async fn generate(
        &self,
        buffer: Arc<PixelBuffer>,
        config: &ParticleGenerationConfig,
        screen: ScreenSize,
        on_progress: &ProgressFn,
    ) -> Result<Vec<Particle>, GenerationError> {
        self.generate_with_report(buffer, config, screen, on_progress)
            .await
            .map(|output| output.particles)
    }

    /// Like [`generate`](Self::generate), also returning a
    /// [`GenerationReport`].
    ///
    /// # Errors
    ///
    /// See [`generate`](Self::generate).
    pub async fn generate_with_report(
        &self,
        buffer: Arc<PixelBuffer>,
        config: &ParticleGenerationConfig,
        screen: ScreenSize,
        on_progress: &ProgressFn,
    ) -> Result<GenerationOutput, GenerationError> {
        config.validate().map_err(invalid_config)?;
        if !screen.is_valid() {
            return Err(GenerationError::InvalidConfig(format!(
                "screen size must be positive, got {}x{}",
                screen.width, screen.height
            )));
        }

        let active = self.begin(config.max_concurrent_operations, on_progress)?;
        log::debug!(
            "generation {}: {}x{} image, {} particles, {} / {}",
            active.id,
            buffer.width(),
            buffer.height(),
            config.target_particle_count,
            config.quality_tier,
            config.sampling_strategy,
        );

        let outcome = match self.run(&active, buffer, config, screen).await {
            Ok(output) => active.complete().map(|()| output),
            Err(e) => Err(e),
        };
        match &outcome {
            Ok(output) => log::info!(
                "generation {} completed: {} particles in {:.1}ms{}",
                active.id,
                output.particles.len(),
                output.report.total_duration.as_secs_f64() * 1000.0,
                if output.report.summary.cache_hit {
                    " (cached)"
                } else {
                    ""
                },
            ),
            Err(e) => active.fail(e),
        }
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the coordinator for a new generation.
    fn begin<'a>(
        &'a self,
        max_concurrent_operations: usize,
        on_progress: &'a ProgressFn,
    ) -> Result<ActiveGeneration<'a>, GenerationError> {
        let mut record = self.lock();
        if record.is_generating {
            MetricCounters::bump(&self.counters.rejected_busy);
            return Err(GenerationError::Busy);
        }

        let pool_size = max_concurrent_operations.min(Semaphore::MAX_PERMITS);
        if record.pool_size != pool_size {
            // Permits held by stages of earlier generations stay on the
            // old semaphore and are released there.
            record.pool = Arc::new(Semaphore::new(pool_size));
            record.pool_size = pool_size;
        }

        let token = CancellationToken::new();
        record.generation += 1;
        record.is_generating = true;
        record.progress = 0.0;
        record.stage = GenerationStage::Starting;
        record.token = Some(token.clone());
        MetricCounters::bump(&self.counters.generations);

        Ok(ActiveGeneration {
            coordinator: self,
            id: record.generation,
            token,
            pool: Arc::clone(&record.pool),
            on_progress,
        })
    }

    async fn run(
        &self,
        active: &ActiveGeneration<'_>,
        buffer: Arc<PixelBuffer>,
        config: &ParticleGenerationConfig,
        screen: ScreenSize,
    ) -> Result<GenerationOutput, GenerationError> {
        let started = Instant::now();
        let dimensions = buffer.dimensions();
        let key = cache_key(dimensions, config);
        let caching = config.enable_caching && self.cache.is_some();

        let lookup_started = Instant::now();
        let cached = self.lookup(active, &key, dimensions, config).await?;
        let cache_hit = cached.is_some();
        let cache_lookup = StageReport {
            duration: lookup_started.elapsed(),
            metrics: StageMetrics::CacheLookup {
                enabled: caching,
                hit: cache_hit,
            },
        };

        let (samples, analysis, sampling) = match cached {
            Some(entry) => (entry.samples, None, None),
            None => {
                active.advance(0.0, GenerationStage::Starting)?;
                let fresh = self.analyze_and_sample(active, &buffer, config).await?;
                (fresh.samples, Some(fresh.analysis), Some(fresh.sampling))
            }
        };
        let sample_count = samples.len();

        active.enter(GenerationStage::Assembling)?;
        MetricCounters::bump(&self.counters.assemblies);
        let assembly_started = Instant::now();
        let assembler = Arc::clone(&self.assembler);
        let assembly_config = config.clone();
        let (assembled, samples) = active
            .blocking(move || {
                let assembled = assembler.assemble(&samples, dimensions, screen, &assembly_config);
                (assembled, samples)
            })
            .await?;
        let particles = assembled?;
        let assembly = StageReport {
            duration: assembly_started.elapsed(),
            metrics: StageMetrics::Assembly {
                sample_count,
                particle_count: particles.len(),
            },
        };

        if !cache_hit {
            active.advance(ASSEMBLED, GenerationStage::Assembling)?;
            self.store(active, key.clone(), config, samples).await?;
        }

        Ok(GenerationOutput {
            report: GenerationReport {
                cache_key: key,
                cache_lookup,
                analysis,
                sampling,
                assembly,
                total_duration: started.elapsed(),
                summary: GenerationSummary {
                    image_width: dimensions.width,
                    image_height: dimensions.height,
                    quality_tier: config.quality_tier,
                    target_particle_count: config.target_particle_count,
                    sample_count,
                    particle_count: particles.len(),
                    cache_hit,
                },
            },
            particles,
        })
    }

    /// Look up cached samples. An entry written for a different particle
    /// count is a miss.
    async fn lookup(
        &self,
        active: &ActiveGeneration<'_>,
        key: &str,
        dimensions: Dimensions,
        config: &ParticleGenerationConfig,
    ) -> Result<Option<CachedSamples>, GenerationError> {
        let Some(cache) = self.cache.as_ref().filter(|_| config.enable_caching) else {
            return Ok(None);
        };
        let cache = Arc::clone(cache);
        let owned_key = key.to_string();
        let entry = active
            .blocking(move || cache.get::<CachedSamples>(&owned_key))
            .await?;

        match entry {
            Some(entry) if entry.matches(dimensions, config) => {
                MetricCounters::bump(&self.counters.cache_hits);
                log::debug!("cache hit for {key}: {} samples", entry.samples.len());
                Ok(Some(entry))
            }
            Some(entry) => {
                MetricCounters::bump(&self.counters.cache_misses);
                log::debug!(
                    "cache entry for {key} holds {} samples for {} requested, regenerating",
                    entry.samples.len(),
                    entry.target_particle_count,
                );
                Ok(None)
            }
            None => {
                MetricCounters::bump(&self.counters.cache_misses);
                Ok(None)
            }
        }
    }

    async fn analyze_and_sample(
        &self,
        active: &ActiveGeneration<'_>,
        buffer: &Arc<PixelBuffer>,
        config: &ParticleGenerationConfig,
    ) -> Result<FreshSamples, GenerationError> {
        active.enter(GenerationStage::Analyzing)?;
        MetricCounters::bump(&self.counters.analyses);
        let stage_started = Instant::now();
        let analyzer = self.analyzer;
        let stage_buffer = Arc::clone(buffer);
        let token = active.token.clone();
        let analysis = active
            .blocking(move || {
                analyzer.analyze_with_cancel(&stage_buffer, &|| token.is_cancelled())
            })
            .await?
            .map_err(GenerationError::analysis)?;
        log::debug!(
            "analysis: complexity {}, edge density {:.3}, {} colored pixels",
            analysis.complexity,
            analysis.edge_density,
            analysis.colored_pixel_count,
        );
        let analysis_report = StageReport {
            duration: stage_started.elapsed(),
            metrics: StageMetrics::Analysis {
                complexity: analysis.complexity,
                edge_density: analysis.edge_density,
                colored_pixel_count: analysis.colored_pixel_count,
            },
        };
        active.advance(ANALYZED, GenerationStage::Analyzing)?;

        active.enter(GenerationStage::Sampling)?;
        MetricCounters::bump(&self.counters.samplings);
        let stage_started = Instant::now();
        let params = SamplingParams::for_config(config);
        let strategy = config.sampling_strategy;
        let target = config.target_particle_count;
        let stage_buffer = Arc::clone(buffer);
        let token = active.token.clone();
        let samples = active
            .blocking(move || {
                sampling::sample_with_cancel(
                    &analysis,
                    &stage_buffer,
                    target,
                    &params,
                    strategy,
                    &|| token.is_cancelled(),
                )
            })
            .await?
            .map_err(GenerationError::sampling)?;
        let sampling_report = StageReport {
            duration: stage_started.elapsed(),
            metrics: StageMetrics::Sampling {
                strategy,
                sample_count: samples.len(),
            },
        };
        active.advance(SAMPLED, GenerationStage::Sampling)?;

        Ok(FreshSamples {
            samples,
            analysis: analysis_report,
            sampling: sampling_report,
        })
    }

    /// Best-effort cache write. Only cancellation is propagated.
    async fn store(
        &self,
        active: &ActiveGeneration<'_>,
        key: String,
        config: &ParticleGenerationConfig,
        samples: Vec<Sample>,
    ) -> Result<(), GenerationError> {
        let Some(cache) = self.cache.as_ref().filter(|_| config.enable_caching) else {
            return Ok(());
        };
        let cache = Arc::clone(cache);
        let entry = CachedSamples {
            target_particle_count: config.target_particle_count,
            samples,
        };
        let stored = active
            .blocking(move || cache.put(&key, &entry).map(|stored| (key, stored)))
            .await?;
        match stored {
            Ok((key, true)) => log::debug!("cached samples under {key}"),
            Ok((key, false)) => log::debug!("samples for {key} exceed the per-entry limit, not cached"),
            Err(e) => log::warn!("failed to cache samples: {e}"),
        }
        Ok(())
    }
}

/// Output of the analysis and sampling stages.
struct FreshSamples {
    samples: Vec<Sample>,
    analysis: StageReport,
    sampling: StageReport,
}

fn invalid_config(error: pointillist_pipeline::PipelineError) -> GenerationError {
    match error {
        pointillist_pipeline::PipelineError::InvalidConfig(msg) => {
            GenerationError::InvalidConfig(msg)
        }
        other => GenerationError::InvalidConfig(other.to_string()),
    }
}

/// Handle for the generation currently owning the coordinator.
///
/// Dropping it while its generation is still current (the caller dropped
/// the future, or a stage unwound) marks the generation cancelled.
struct ActiveGeneration<'a> {
    coordinator: &'a GenerationCoordinator,
    id: u64,
    token: CancellationToken,
    pool: Arc<Semaphore>,
    on_progress: &'a ProgressFn,
}

impl ActiveGeneration<'_> {
    /// Move to `stage` without reporting progress.
    fn enter(&self, stage: GenerationStage) -> Result<(), GenerationError> {
        let mut record = self.coordinator.lock();
        if !record.is_current(self.id) {
            return Err(GenerationError::Cancelled);
        }
        record.stage = stage;
        Ok(())
    }

    /// Record and report progress. Progress never goes backwards.
    fn advance(&self, progress: f32, stage: GenerationStage) -> Result<(), GenerationError> {
        self.deliver(|record| {
            record.progress = record.progress.max(progress);
            record.stage = stage;
        })
    }

    /// Finish successfully, reporting `1.0`.
    fn complete(&self) -> Result<(), GenerationError> {
        self.deliver(|record| {
            record.progress = 1.0;
            record.stage = GenerationStage::Completed;
        })
    }

    /// Apply `update` to the record if this generation is still current,
    /// then report the new progress with the state lock released. An
    /// update that lands on a terminal stage ends the generation.
    fn deliver(&self, update: impl FnOnce(&mut Record)) -> Result<(), GenerationError> {
        let _delivery = self.coordinator.lock_delivery();
        let (progress, stage) = {
            let mut record = self.coordinator.lock();
            if !record.is_current(self.id) {
                return Err(GenerationError::Cancelled);
            }
            update(&mut *record);
            if record.stage.is_terminal() {
                record.is_generating = false;
                record.token = None;
            }
            record.delivering_on = Some(thread::current().id());
            (record.progress, record.stage)
        };
        (self.on_progress)(progress, stage);
        self.coordinator.lock().delivering_on = None;
        Ok(())
    }

    /// Finish with `error`. A no-op if the generation was already
    /// cancelled from outside.
    fn fail(&self, error: &GenerationError) {
        let mut record = self.coordinator.lock();
        if !record.is_current(self.id) {
            log::debug!("generation {} ended after cancellation: {error}", self.id);
            return;
        }
        let counters = &self.coordinator.counters;
        if error.is_cancellation() {
            record.stop(GenerationStage::Cancelled);
            MetricCounters::bump(&counters.cancellations);
            log::info!("generation {} cancelled", self.id);
        } else {
            record.stop(GenerationStage::Failed);
            MetricCounters::bump(&counters.failures);
            log::warn!("generation {} failed: {error}", self.id);
        }
    }

    /// Run `work` on the blocking pool, racing it against cancellation.
    ///
    /// On cancellation the worker keeps running to completion in the
    /// background (holding its permit) but its result is dropped.
    async fn blocking<T, F>(&self, work: F) -> Result<T, GenerationError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = tokio::select! {
            () = self.token.cancelled() => return Err(GenerationError::Cancelled),
            permit = Arc::clone(&self.pool).acquire_owned() => {
                permit.map_err(|e| GenerationError::Worker(e.to_string()))?
            }
        };

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        });

        tokio::select! {
            () = self.token.cancelled() => Err(GenerationError::Cancelled),
            joined = handle => joined.map_err(|e| GenerationError::Worker(e.to_string())),
        }
    }
}

impl Drop for ActiveGeneration<'_> {
    fn drop(&mut self) {
        let mut record = self.coordinator.lock();
        if record.is_current(self.id) {
            record.stop(GenerationStage::Cancelled);
            MetricCounters::bump(&self.coordinator.counters.cancellations);
            log::debug!("generation {} abandoned", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_stop_cancels_token() {
        let mut record = Record::new(2);
        let token = CancellationToken::new();
        record.generation = 3;
        record.is_generating = true;
        record.progress = 0.7;
        record.token = Some(token.clone());
        assert!(record.is_current(3));

        record.stop(GenerationStage::Failed);
        assert!(token.is_cancelled());
        assert!(!record.is_current(3));
        assert!(record.progress.abs() < f32::EPSILON);
        assert_eq!(record.stage, GenerationStage::Failed);
    }

    #[test]
    fn invalid_config_keeps_message() {
        let err = invalid_config(pointillist_pipeline::PipelineError::InvalidConfig(
            "edge_radius must be at least 1".to_string(),
        ));
        assert_eq!(
            err.to_string(),
            "invalid generation configuration: edge_radius must be at least 1"
        );
    }

    #[test]
    fn coordinator_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GenerationCoordinator>();
    }
}
