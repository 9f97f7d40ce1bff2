//! Greedy load shifting from carbon-intensive hours toward cleaner ones.

use crate::config::OptimizerConfig;

/// Signal steering the optimizer.
#[derive(Debug, Clone, Copy)]
pub enum Signal<'a> {
    /// Carbon intensity per hour (kg CO₂/MWh). Preferred mode.
    Intensity(&'a [f64]),
    /// Renewable availability per hour (MW). Used when no intensity is known.
    Renewable(&'a [f64]),
}

/// Result of one optimizer pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftOutcome {
    /// Load per hour after shifting.
    pub optimized: Vec<f64>,
    /// Total load moved between hours (MW).
    pub shifted: f64,
}

/// Per-run constraints, all derived from the baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftLimits {
    /// Destination hours may not be pushed above this load.
    pub peak_guard: f64,
    /// Largest amount one hour may gain or lose per transfer.
    pub max_shift_per_hour: f64,
    /// Cumulative transfer budget of the run.
    pub total_budget: f64,
}

impl ShiftLimits {
    /// Derives the limits for `base` under `cfg`.
    pub fn for_base(base: &[f64], cfg: &OptimizerConfig) -> Self {
        let max_load = base.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let max_shift_per_hour = cfg
            .min_shift_per_hour
            .max((max_load * cfg.max_shift_ratio).round());
        Self {
            peak_guard: max_load * cfg.peak_threshold_ratio,
            max_shift_per_hour,
            total_budget: (base.len() as f64 * max_shift_per_hour * cfg.budget_ratio).round(),
        }
    }

    /// Load `dest` can still absorb: bounded by its baseline plus one
    /// hourly shift, and by the peak guard.
    fn headroom(&self, base: &[f64], optimized: &[f64], dest: usize) -> f64 {
        let allowance = (base[dest] + self.max_shift_per_hour - optimized[dest]).max(0.0);
        allowance.min((self.peak_guard - optimized[dest]).max(0.0))
    }
}

/// Load-shifting optimizer.
///
/// Deterministic and side-effect free: identical inputs always produce
/// identical outputs.
#[derive(Debug, Clone, Default)]
pub struct Optimizer {
    config: OptimizerConfig,
}

/// Finite `(hour, value)` pairs sorted by value, highest first. Ties keep hour order.
fn ranked_desc(values: &[f64], hours: usize) -> Vec<(usize, f64)> {
    let mut ranked: Vec<(usize, f64)> = (0..hours)
        .filter_map(|h| values.get(h).copied().filter(|v| v.is_finite()).map(|v| (h, v)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Redistributes `base` according to `signal`.
    ///
    /// Hours missing from the signal, or with a non-finite value, neither
    /// give nor receive load. The sum of the returned series equals the sum
    /// of `base` up to floating-point rounding.
    pub fn optimize(&self, base: &[f64], signal: Signal<'_>) -> ShiftOutcome {
        if base.is_empty() {
            return ShiftOutcome {
                optimized: Vec::new(),
                shifted: 0.0,
            };
        }

        let limits = ShiftLimits::for_base(base, &self.config);
        match signal {
            Signal::Intensity(intensity) => self.shift_by_intensity(base, intensity, &limits),
            Signal::Renewable(renewable) => shift_toward_renewables(base, renewable, &limits),
        }
    }

    fn shift_by_intensity(
        &self,
        base: &[f64],
        intensity: &[f64],
        limits: &ShiftLimits,
    ) -> ShiftOutcome {
        let mut optimized = base.to_vec();
        let mut budget = limits.total_budget;
        let mut shifted = 0.0;

        let dirty = ranked_desc(intensity, base.len());
        let clean: Vec<(usize, f64)> = dirty.iter().rev().copied().collect();

        for &(src, src_intensity) in &dirty {
            if budget <= 0.0 {
                break;
            }

            let available = limits
                .max_shift_per_hour
                .min(budget)
                .min(optimized[src]);
            if available <= 0.0 {
                continue;
            }

            let Some(&(dest, _)) = clean.iter().find(|&&(hour, value)| {
                hour != src && src_intensity - value >= self.config.min_intensity_delta
            }) else {
                continue;
            };

            let transferable = available.min(limits.headroom(base, &optimized, dest));
            if transferable <= 0.0 {
                continue;
            }

            optimized[src] -= transferable;
            optimized[dest] += transferable;
            budget -= transferable;
            shifted += transferable;
        }

        ShiftOutcome { optimized, shifted }
    }
}

/// Fallback mode: trims load above the peak guard, pouring it into the
/// hours with the most renewable supply first.
fn shift_toward_renewables(base: &[f64], renewable: &[f64], limits: &ShiftLimits) -> ShiftOutcome {
    let mut optimized = base.to_vec();
    let mut budget = limits.total_budget;
    let mut shifted = 0.0;

    let overage: Vec<f64> = base
        .iter()
        .map(|&load| (load - limits.peak_guard).max(0.0))
        .collect();
    let dirty: Vec<(usize, f64)> = ranked_desc(&overage, base.len())
        .into_iter()
        .filter(|&(_, excess)| excess > 0.0)
        .collect();
    let targets = ranked_desc(renewable, base.len());

    for &(src, _) in &dirty {
        if budget <= 0.0 {
            break;
        }

        let mut available = limits
            .max_shift_per_hour
            .min(budget)
            .min((optimized[src] - limits.peak_guard).max(0.0));

        for &(dest, _) in &targets {
            if available <= 0.0 {
                break;
            }
            if dest == src {
                continue;
            }

            let transferable = available.min(limits.headroom(base, &optimized, dest));
            if transferable <= 0.0 {
                continue;
            }

            optimized[src] -= transferable;
            optimized[dest] += transferable;
            available -= transferable;
            budget -= transferable;
            shifted += transferable;
        }
    }

    ShiftOutcome { optimized, shifted }
}
