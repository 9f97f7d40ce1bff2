//! Scores an optimized series against its baseline.

use crate::config::MetricsConfig;

use super::types::Metrics;

/// Computes peak reduction, renewable gain and avoided emissions.
#[derive(Debug, Clone, Default)]
pub struct MetricsEngine {
    config: MetricsConfig,
}

impl MetricsEngine {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Scores `optimized` against `base`.
    ///
    /// # Arguments
    ///
    /// * `base` - Baseline load per hour
    /// * `optimized` - Shifted load per hour
    /// * `renewable` - Renewable availability per hour; missing hours count as zero
    /// * `intensity` - Carbon intensity per hour; ignored unless its length matches `base`
    ///
    /// # Returns
    ///
    /// All-zero metrics for an empty baseline. Percentages are zero when
    /// their denominator is zero. `co2_avoided_kg` is negative when the plan
    /// increases emissions, except in the constant-factor fallback, which
    /// never reports a loss.
    pub fn compute(
        &self,
        base: &[f64],
        optimized: &[f64],
        renewable: &[f64],
        intensity: Option<&[f64]>,
    ) -> Metrics {
        if base.is_empty() {
            return Metrics::default();
        }

        let max_base = base.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let threshold = self.config.peak_threshold_ratio * max_base;
        let peak_overage =
            |series: &[f64]| -> f64 { series.iter().map(|v| (v - threshold).max(0.0)).sum() };
        let overlap = |series: &[f64]| -> f64 {
            series
                .iter()
                .enumerate()
                .map(|(i, v)| v.min(renewable.get(i).copied().unwrap_or(0.0)))
                .sum()
        };

        let peak_base = peak_overage(base);
        let peak_reduction_pct = if peak_base == 0.0 {
            0.0
        } else {
            (peak_base - peak_overage(optimized)) / peak_base * 100.0
        };

        let overlap_base = overlap(base);
        let overlap_opt = overlap(optimized);
        let renewable_gain_pct = if overlap_base == 0.0 {
            0.0
        } else {
            (overlap_opt - overlap_base) / overlap_base * 100.0
        };

        let co2_avoided_kg = match intensity {
            Some(intensity) if intensity.len() == base.len() => {
                let emissions = |series: &[f64]| -> f64 {
                    series.iter().zip(intensity).map(|(load, i)| load * i).sum()
                };
                emissions(base) - emissions(optimized)
            }
            _ => (overlap_opt - overlap_base).max(0.0) * self.config.fallback_intensity_factor,
        };

        Metrics {
            peak_reduction_pct: self.round(peak_reduction_pct),
            renewable_gain_pct: self.round(renewable_gain_pct),
            co2_avoided_kg: self.round(co2_avoided_kg),
        }
    }

    fn round(&self, value: f64) -> f64 {
        let scale = 10_f64.powi(self.config.decimals as i32);
        (value * scale).round() / scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MetricsEngine {
        MetricsEngine::default()
    }

    #[test]
    fn empty_base_is_all_zero() {
        assert_eq!(engine().compute(&[], &[], &[], None), Metrics::default());
    }

    #[test]
    fn unchanged_plan_reports_no_gain() {
        let base = [100.0, 40.0, 70.0, 95.0];
        let renewable = [10.0, 60.0, 20.0, 5.0];
        let m = engine().compute(&base, &base, &renewable, None);
        assert_eq!(m.peak_reduction_pct, 0.0);
        assert_eq!(m.renewable_gain_pct, 0.0);
        assert_eq!(m.co2_avoided_kg, 0.0);
    }

    #[test]
    fn idle_profile_reports_zero_not_nan() {
        let base = [0.0; 4];
        let optimized = [0.0, 0.0, 0.0, 0.0];
        let m = engine().compute(&base, &optimized, &[0.0; 4], None);
        assert_eq!(m.peak_reduction_pct, 0.0);
        assert_eq!(m.renewable_gain_pct, 0.0);
        assert!(m.peak_reduction_pct.is_finite());
    }

    #[test]
    fn peak_reduction_and_intensity_emissions() {
        let base = [100.0, 40.0, 40.0, 40.0];
        let optimized = [90.0, 40.0, 40.0, 50.0];
        let renewable = [0.0, 0.0, 0.0, 60.0];
        let intensity = [500.0, 50.0, 50.0, 50.0];
        let m = engine().compute(&base, &optimized, &renewable, Some(&intensity));
        assert_eq!(m.peak_reduction_pct, 100.0);
        assert_eq!(m.renewable_gain_pct, 25.0);
        // 10 MW moved from 500 to 50 kg/MWh
        assert_eq!(m.co2_avoided_kg, 4500.0);
    }

    #[test]
    fn worse_plan_reports_negative_emissions() {
        let base = [40.0, 40.0];
        let optimized = [30.0, 50.0];
        let intensity = [100.0, 300.0];
        let m = engine().compute(&base, &optimized, &[0.0, 0.0], Some(&intensity));
        assert_eq!(m.co2_avoided_kg, -2000.0);
    }

    #[test]
    fn fallback_factor_used_without_matching_intensity() {
        let base = [100.0, 40.0];
        let optimized = [90.0, 50.0];
        let renewable = [0.0, 60.0];
        let m = engine().compute(&base, &optimized, &renewable, Some(&[1.0]));
        // overlap 40 -> 50, gain 10 * 0.4
        assert_eq!(m.co2_avoided_kg, 4.0);

        let worse = engine().compute(&optimized, &base, &renewable, None);
        assert_eq!(worse.co2_avoided_kg, 0.0);
    }

    #[test]
    fn outputs_rounded_to_two_places() {
        let base = [90.0, 30.0, 30.0];
        let optimized = [80.0, 30.0, 40.0];
        let renewable = [0.0, 0.0, 35.0];
        let m = engine().compute(&base, &optimized, &renewable, None);
        // overlap 30 -> 35 => 16.666..%
        assert_eq!(m.renewable_gain_pct, 16.67);
    }
}
