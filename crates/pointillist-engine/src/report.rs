//! Per-generation timing and count report.
//!
//! [`GenerationReport`] records how long each stage of one generation
//! took and what it produced. Stages skipped on a cache hit are `None`.

use std::time::Duration;

use pointillist_pipeline::{QualityTier, SamplingStrategy};
use serde::{Deserialize, Serialize};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom("duration seconds must be finite and non-negative")
        })
    }
}

/// Report for one completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    /// Key the samples were looked up and stored under.
    pub cache_key: String,
    /// Cache lookup, including the decision to skip it.
    pub cache_lookup: StageReport,
    /// Analysis, `None` on a cache hit.
    pub analysis: Option<StageReport>,
    /// Sampling, `None` on a cache hit.
    pub sampling: Option<StageReport>,
    /// Assembly.
    pub assembly: StageReport,
    /// Wall-clock duration of the whole generation.
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts.
    pub summary: GenerationSummary,
}

/// Timing and metrics for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Cache lookup.
    CacheLookup {
        /// Whether caching was enabled for this request.
        enabled: bool,
        /// Whether a matching entry was found.
        hit: bool,
    },
    /// Image analysis.
    Analysis {
        /// Complexity score, 0 to 10.
        complexity: u8,
        /// Fraction of analyzed pixels on an edge.
        edge_density: f32,
        /// Pixels above the transparency threshold.
        colored_pixel_count: u64,
    },
    /// Sample selection.
    Sampling {
        /// Strategy used.
        strategy: SamplingStrategy,
        /// Samples produced.
        sample_count: usize,
    },
    /// Particle assembly.
    Assembly {
        /// Samples handed to the assembler.
        sample_count: usize,
        /// Particles produced.
        particle_count: usize,
    },
}

/// Summary counts for a generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSummary {
    /// Source image width.
    pub image_width: u32,
    /// Source image height.
    pub image_height: u32,
    /// Quality tier requested.
    pub quality_tier: QualityTier,
    /// Particle count requested.
    pub target_particle_count: usize,
    /// Samples selected (or loaded from the cache).
    pub sample_count: usize,
    /// Particles returned.
    pub particle_count: usize,
    /// Whether sampling was skipped thanks to the cache.
    pub cache_hit: bool,
}

impl GenerationReport {
    /// Format the report as a human-readable table.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Generation Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{}  |  quality: {}  |  key: {}",
            self.summary.image_width,
            self.summary.image_height,
            self.summary.quality_tier,
            self.cache_key,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);

        let mut stages = vec![("Cache Lookup", &self.cache_lookup)];
        if let Some(ref a) = self.analysis {
            stages.push(("Analysis", a));
        }
        if let Some(ref s) = self.sampling {
            stages.push(("Sampling", s));
        }
        stages.push(("Assembly", &self.assembly));

        for (name, stage) in &stages {
            let ms = duration_ms(stage.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&stage.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Requested: {}  |  Samples: {}  |  Particles: {}{}",
            self.summary.target_particle_count,
            self.summary.sample_count,
            self.summary.particle_count,
            if self.summary.cache_hit { "  (cached)" } else { "" },
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to fractional milliseconds.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::CacheLookup { enabled: false, .. } => "disabled".to_string(),
        StageMetrics::CacheLookup { hit: true, .. } => "hit".to_string(),
        StageMetrics::CacheLookup { hit: false, .. } => "miss".to_string(),
        StageMetrics::Analysis {
            complexity,
            edge_density,
            colored_pixel_count,
        } => format!(
            "complexity={complexity} edges={edge_density:.3} colored={colored_pixel_count}"
        ),
        StageMetrics::Sampling {
            strategy,
            sample_count,
        } => format!("{strategy}: {sample_count} samples"),
        StageMetrics::Assembly {
            sample_count,
            particle_count,
        } => format!("{sample_count} samples -> {particle_count} particles"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_report(cache_hit: bool) -> GenerationReport {
        let stage = |ms, metrics| StageReport {
            duration: Duration::from_millis(ms),
            metrics,
        };
        GenerationReport {
            cache_key: "10x10|50|standard|hybrid|0.30".to_string(),
            cache_lookup: stage(1, StageMetrics::CacheLookup {
                enabled: true,
                hit: cache_hit,
            }),
            analysis: (!cache_hit).then(|| {
                stage(4, StageMetrics::Analysis {
                    complexity: 3,
                    edge_density: 0.125,
                    colored_pixel_count: 100,
                })
            }),
            sampling: (!cache_hit).then(|| {
                stage(3, StageMetrics::Sampling {
                    strategy: SamplingStrategy::Hybrid,
                    sample_count: 50,
                })
            }),
            assembly: stage(2, StageMetrics::Assembly {
                sample_count: 50,
                particle_count: 50,
            }),
            total_duration: Duration::from_millis(10),
            summary: GenerationSummary {
                image_width: 10,
                image_height: 10,
                quality_tier: QualityTier::Standard,
                target_particle_count: 50,
                sample_count: 50,
                particle_count: 50,
                cache_hit,
            },
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn report_lists_every_stage_run() {
        let text = sample_report(false).report();
        assert!(text.contains("Cache Lookup"));
        assert!(text.contains("Analysis"));
        assert!(text.contains("complexity=3"));
        assert!(text.contains("hybrid: 50 samples"));
        assert!(text.contains("40.0%"));
        assert!(!text.contains("(cached)"));
    }

    #[test]
    fn report_on_cache_hit_skips_stages() {
        let text = sample_report(true).report();
        assert!(text.contains("hit"));
        assert!(!text.contains("Analysis"));
        assert!(!text.contains("Sampling"));
        assert!(text.contains("(cached)"));
    }

    #[test]
    fn serde_round_trip_keeps_durations() {
        let json = serde_json::to_string(&sample_report(false)).unwrap();
        let back: GenerationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total_duration, Duration::from_millis(10));
        assert!(back.analysis.is_some());
    }
}
