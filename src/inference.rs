//! Inference Engine

use crate::bundle::ModelBundle;
use crate::features::{ConnectionRecord, Verdict};
use crate::router::{ArbitrationRouter, Prediction};
use crate::store::ModelStore;
use crate::{DlhaError, Result};
use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared classifier over a hot-swappable bundle.
///
/// Each call loads the current bundle once and finishes on it, so a
/// concurrent reload never mixes stages from two bundles.
pub struct InferenceEngine {
    /// Current bundle (atomically swappable)
    bundle: ArcSwapOption<ModelBundle>,
    router: ArbitrationRouter,
    /// Incremented on every install
    version: AtomicU64,
    stats: Arc<RwLock<InferenceStats>>,
    started: Instant,
}

impl InferenceEngine {
    /// Engine with no bundle installed yet
    pub fn new(router: ArbitrationRouter) -> Self {
        Self {
            bundle: ArcSwapOption::empty(),
            router,
            version: AtomicU64::new(0),
            stats: Arc::new(RwLock::new(InferenceStats::default())),
            started: Instant::now(),
        }
    }

    /// Engine serving `bundle`
    pub fn with_bundle(bundle: ModelBundle, router: ArbitrationRouter) -> Self {
        let engine = Self::new(router);
        engine.install(bundle);
        engine
    }

    /// Whether a bundle is installed
    pub fn is_loaded(&self) -> bool {
        self.bundle.load().is_some()
    }

    /// Current bundle
    pub fn bundle(&self) -> Option<Arc<ModelBundle>> {
        self.bundle.load_full()
    }

    /// Number of bundles installed so far
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Arbitration settings
    pub fn router(&self) -> &ArbitrationRouter {
        &self.router
    }

    /// Time since the engine was created
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Atomically replace the bundle
    pub fn install(&self, bundle: ModelBundle) {
        let components = bundle.reducer().n_components();
        self.bundle.store(Some(Arc::new(bundle)));
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;

        // Arbitration settings live in the server config, not the bundle
        tracing::info!(
            "Serving bundle version {} ({} components), threshold {}, {:?} confidence",
            version,
            components,
            self.router.threshold(),
            self.router.confidence_mode()
        );
    }

    /// Reload the bundle from disk (hot reload).
    ///
    /// On failure the previous bundle stays in service.
    pub fn reload(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        tracing::info!("Hot-reloading model bundle from {}", path.display());
        let bundle = ModelStore::load(path)?;
        self.install(bundle);
        self.stats.write().reloads += 1;
        Ok(())
    }

    /// Label and confidence per record
    pub fn predict(&self, records: &[ConnectionRecord]) -> Result<Vec<Prediction>> {
        let bundle = self.bundle.load_full().ok_or(DlhaError::UnfitModel("model bundle"))?;

        let start = Instant::now();
        let predictions = bundle.predict(&self.router, records)?;
        let elapsed = start.elapsed();

        let mut stats = self.stats.write();
        stats.total_inferences += predictions.len() as u64;
        stats.total_latency_us += elapsed.as_micros() as u64;
        for p in &predictions {
            match p.label {
                Verdict::Unknown => stats.unknown_verdicts += 1,
                label if label.is_attack() => stats.attack_verdicts += 1,
                _ => stats.normal_verdicts += 1,
            }
        }

        Ok(predictions)
    }

    /// Label per record
    pub fn classify(&self, records: &[ConnectionRecord]) -> Result<Vec<Verdict>> {
        Ok(self.predict(records)?.into_iter().map(|p| p.label).collect())
    }

    /// Confidence per record
    pub fn score(&self, records: &[ConnectionRecord]) -> Result<Vec<f64>> {
        Ok(self.predict(records)?.into_iter().map(|p| p.confidence).collect())
    }

    /// Get inference stats
    pub fn stats(&self) -> InferenceStats {
        self.stats.read().clone()
    }
}

impl Default for InferenceEngine {
    fn default() -> Self {
        Self::new(ArbitrationRouter::default())
    }
}

/// Inference statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct InferenceStats {
    /// Records scored
    pub total_inferences: u64,
    /// Cumulative scoring time
    pub total_latency_us: u64,
    /// Records labeled `Normal`
    pub normal_verdicts: u64,
    /// Records labeled with an attack family
    pub attack_verdicts: u64,
    /// Records labeled `Unknown`
    pub unknown_verdicts: u64,
    /// Successful hot reloads
    pub reloads: u64,
}

impl InferenceStats {
    /// Average latency in microseconds
    pub fn avg_latency_us(&self) -> f64 {
        if self.total_inferences == 0 {
            0.0
        } else {
            self.total_latency_us as f64 / self.total_inferences as f64
        }
    }

    /// Records scored per second over `elapsed`
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.total_inferences as f64 / secs
        }
    }
}
