/*!
 * Entry point for normalizing catalog sources
 *
 * A `Normalizer` resolves each source's mapper from its registry and runs
 * it. Files share no mutable state, so `normalize_all` runs them on a rayon
 * pool when the `parallel` feature is enabled; one file failing never
 * affects another.
 */

use std::time::Instant;

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::catalog::{CancellationToken, MapContext, SourceRecord};
use crate::config::NormalizeConfig;
use crate::mapper::{MapperRegistry, SourceMapper};
use crate::outcome::{MappingOutcome, RunStatus};
use crate::Result;

/// Result of normalizing one catalog source
#[derive(Debug)]
pub struct SourceRun {
    pub source: SourceRecord,
    pub result: Result<MappingOutcome>,
}

impl SourceRun {
    pub fn hospital_id(&self) -> &str {
        &self.source.hospital_id
    }

    pub fn status(&self) -> RunStatus {
        match &self.result {
            Ok(outcome) => outcome.status(),
            Err(e) => RunStatus::Failed(e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs mappers over catalog sources
#[derive(Debug, Clone)]
pub struct Normalizer {
    registry: MapperRegistry,
    config: NormalizeConfig,
    cancellation: Option<CancellationToken>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(NormalizeConfig::default())
    }
}

impl Normalizer {
    /// Normalizer with the built-in mappers
    pub fn new(config: NormalizeConfig) -> Self {
        Self {
            registry: MapperRegistry::with_defaults(),
            config,
            cancellation: None,
        }
    }

    pub fn builder() -> NormalizerBuilder {
        NormalizerBuilder::new()
    }

    pub fn registry(&self) -> &MapperRegistry {
        &self.registry
    }

    pub fn config(&self) -> &NormalizeConfig {
        &self.config
    }

    /// Normalize one source
    pub fn normalize(&self, source: &SourceRecord) -> Result<MappingOutcome> {
        self.run(source, self.config.enable_progress_bar)
    }

    fn run(&self, source: &SourceRecord, show_progress: bool) -> Result<MappingOutcome> {
        source.validate()?;
        let mapper = self.registry.resolve(&source.mapper_id)?;

        let mut ctx = MapContext::new(source.clone(), self.config.clone()).with_progress(show_progress);
        if let Some(token) = &self.cancellation {
            ctx = ctx.with_cancellation(token.clone());
        }

        mapper.map_file(&source.file_path, &ctx).map_err(|e| {
            tracing::error!(hospital_id = %source.hospital_id, error = %e, "Normalization failed");
            e
        })
    }

    /// Normalize many sources independently; results keep the input order
    pub fn normalize_all(&self, sources: &[SourceRecord]) -> Vec<SourceRun> {
        let start_time = Instant::now();
        let show_file_progress = sources.len() == 1 && self.config.enable_progress_bar;

        #[cfg(feature = "progress")]
        let progress_bar = if self.config.enable_progress_bar && sources.len() > 1 {
            let pb = ProgressBar::new(sources.len() as u64);
            let style = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} sources {msg}")
                .map(|s| s.progress_chars("#>-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
            Some(pb)
        } else {
            None
        };

        let run_one = |source: &SourceRecord| {
            let result = self.run(source, show_file_progress);
            #[cfg(feature = "progress")]
            if let Some(ref pb) = progress_bar {
                pb.set_message(source.hospital_id.clone());
                pb.inc(1);
            }
            SourceRun { source: source.clone(), result }
        };

        #[cfg(feature = "parallel")]
        let runs: Vec<SourceRun> = {
            use rayon::prelude::*;

            match self.config.parallel_threads {
                Some(threads) => match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                    Ok(pool) => pool.install(|| sources.par_iter().map(run_one).collect()),
                    Err(e) => {
                        tracing::warn!(error = %e, "Falling back to the global thread pool");
                        sources.par_iter().map(run_one).collect()
                    }
                },
                None => sources.par_iter().map(run_one).collect(),
            }
        };

        #[cfg(not(feature = "parallel"))]
        let runs: Vec<SourceRun> = sources.iter().map(run_one).collect();

        #[cfg(feature = "progress")]
        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }

        let failed = runs.iter().filter(|r| !r.is_success()).count();
        tracing::info!(
            sources = runs.len(),
            failed,
            elapsed_secs = start_time.elapsed().as_secs_f64(),
            "Batch normalization complete"
        );
        runs
    }
}

/// Builder for a `Normalizer` with a custom registry or cancellation
#[derive(Debug, Default)]
pub struct NormalizerBuilder {
    registry: Option<MapperRegistry>,
    config: Option<NormalizeConfig>,
    cancellation: Option<CancellationToken>,
}

impl NormalizerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(mut self, registry: MapperRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register one more mapper on top of the built-in ones
    pub fn mapper<M: SourceMapper + 'static>(mut self, mapper: M) -> Self {
        self.registry
            .get_or_insert_with(MapperRegistry::with_defaults)
            .register(mapper);
        self
    }

    pub fn config(mut self, config: NormalizeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Build the normalizer, validating the configuration
    pub fn build(self) -> Result<Normalizer> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(Normalizer {
            registry: self.registry.unwrap_or_default(),
            config,
            cancellation: self.cancellation,
        })
    }
}
