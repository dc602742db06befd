//! Engine configuration, layered from built-in defaults, an optional file and
//! `ARCSCRIPT_*` environment variables (later layers win).

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;
use crate::storage::IndexingStrategy;

pub const ENV_PREFIX: &str = "ARCSCRIPT";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Gate per-entry tasks behind an admission semaphore.
    pub use_semaphore: bool,
    pub filter_permits: usize,
    pub projection_permits: usize,
    /// Worker permits shared by pipeline mapping stages, 0 means available parallelism.
    pub pipeline_workers: usize,
    pub nulls_first: bool,
    /// Strategy given to implicitly inserted index instructions.
    pub default_strategy: IndexingStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_semaphore: true,
            filter_permits: 5,
            projection_permits: 10,
            pipeline_workers: 0,
            nulls_first: true,
            default_strategy: IndexingStrategy::Initial,
        }
    }
}

impl EngineConfig {
    /// Reads the configuration, `path` naming an optional file (any format the
    /// `config` crate recognizes by extension).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("use_semaphore", defaults.use_semaphore)?
            .set_default("filter_permits", defaults.filter_permits as i64)?
            .set_default("projection_permits", defaults.projection_permits as i64)?
            .set_default("pipeline_workers", defaults.pipeline_workers as i64)?
            .set_default("nulls_first", defaults.nulls_first)?
            .set_default("default_strategy", "initial")?;
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Permits for the per-entry admission semaphore, `None` when gating is off.
    pub fn entry_permits(&self, projecting: bool) -> Option<usize> {
        if !self.use_semaphore {
            return None;
        }
        let permits = if projecting { self.projection_permits } else { self.filter_permits };
        Some(permits.max(1))
    }

    pub fn worker_count(&self) -> usize {
        if self.pipeline_workers > 0 {
            return self.pipeline_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
