//! Time-domain heart rate variability metrics.
//!
//! Every function here takes an immutable RR snapshot (milliseconds) and is
//! safe to call from any thread. Sequences shorter than two intervals yield
//! zeroed metrics rather than dividing by zero.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Successive differences above this many milliseconds count toward pNN50.
const NN50_THRESHOLD_MS: f64 = 50.0;

/// Minimum number of intervals before the LF/HF approximation is attempted.
const LF_HF_MIN_SAMPLES: usize = 10;

/// Weighting applied to the squared RR sum for the low-frequency term.
const LF_WEIGHT: f64 = 0.5;

/// Weighting applied to the squared RR sum for the high-frequency term.
const HF_WEIGHT: f64 = 0.3;

/// Derived HRV statistics for an RR sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HrvMetrics {
    /// Sample standard deviation of RR intervals (ms)
    pub sdnn_ms: f64,
    /// Root mean square of successive differences (ms)
    pub rmssd_ms: f64,
    /// Percentage of successive differences above 50 ms
    pub pnn50_pct: f64,
    /// Approximate LF/HF ratio (not a spectral estimate)
    pub lf_hf_ratio: f64,
    /// Mean RR interval (ms)
    pub mean_rr_ms: f64,
    /// Composite 0-100 score derived from RMSSD
    pub score: u8,
    /// Number of RR intervals the metrics were computed from
    pub sample_count: usize,
}

impl HrvMetrics {
    /// Compute all metrics over an RR snapshot.
    pub fn compute(rr: &[u16]) -> Self {
        let rmssd_ms = rmssd(rr);
        Self {
            sdnn_ms: sdnn(rr),
            rmssd_ms,
            pnn50_pct: pnn50(rr),
            lf_hf_ratio: lf_hf_ratio(rr),
            mean_rr_ms: mean_rr(rr),
            score: score(rmssd_ms),
            sample_count: rr.len(),
        }
    }
}

impl HrvMetrics {
    /// Classify these metrics into qualitative bands.
    pub fn assess(&self) -> HrvAssessment {
        HrvAssessment::from_metrics(self)
    }
}

/// Overall band of the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Excellent,
    Good,
    Moderate,
    Poor,
}

impl ScoreBand {
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => ScoreBand::Excellent,
            60..=79 => ScoreBand::Good,
            40..=59 => ScoreBand::Moderate,
            _ => ScoreBand::Poor,
        }
    }
}

/// Parasympathetic activity as read from RMSSD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RmssdBand {
    High,
    Normal,
    Low,
}

impl RmssdBand {
    pub fn from_rmssd(rmssd_ms: f64) -> Self {
        if rmssd_ms > 50.0 {
            RmssdBand::High
        } else if rmssd_ms > 20.0 {
            RmssdBand::Normal
        } else {
            RmssdBand::Low
        }
    }
}

/// Sympathetic/parasympathetic balance as read from the LF/HF ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceBand {
    SympatheticHigh,
    Balanced,
    Low,
}

impl BalanceBand {
    pub fn from_ratio(lf_hf_ratio: f64) -> Self {
        if lf_hf_ratio > 2.0 {
            BalanceBand::SympatheticHigh
        } else if lf_hf_ratio < 0.5 {
            BalanceBand::Low
        } else {
            BalanceBand::Balanced
        }
    }
}

/// Qualitative reading of a set of HRV metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HrvAssessment {
    pub overall: ScoreBand,
    pub rmssd: RmssdBand,
    pub balance: BalanceBand,
}

impl HrvAssessment {
    pub fn from_metrics(metrics: &HrvMetrics) -> Self {
        Self {
            overall: ScoreBand::from_score(metrics.score),
            rmssd: RmssdBand::from_rmssd(metrics.rmssd_ms),
            balance: BalanceBand::from_ratio(metrics.lf_hf_ratio),
        }
    }
}

impl std::fmt::Display for ScoreBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoreBand::Excellent => write!(f, "excellent"),
            ScoreBand::Good => write!(f, "good"),
            ScoreBand::Moderate => write!(f, "moderate"),
            ScoreBand::Poor => write!(f, "poor"),
        }
    }
}

impl std::fmt::Display for RmssdBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RmssdBand::High => write!(f, "high parasympathetic activity"),
            RmssdBand::Normal => write!(f, "normal parasympathetic activity"),
            RmssdBand::Low => write!(f, "low parasympathetic activity"),
        }
    }
}

impl std::fmt::Display for BalanceBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceBand::SympatheticHigh => write!(f, "sympathetic dominance"),
            BalanceBand::Balanced => write!(f, "balanced"),
            BalanceBand::Low => write!(f, "low sympathetic tone"),
        }
    }
}

/// Sample standard deviation (n - 1 denominator).
pub fn sdnn(rr: &[u16]) -> f64 {
    if rr.len() < 2 {
        return 0.0;
    }
    rr.iter().map(|&v| f64::from(v)).std_dev()
}

/// Root mean square of successive differences.
pub fn rmssd(rr: &[u16]) -> f64 {
    if rr.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = successive_differences(rr).map(|d| d * d).sum();
    (sum_sq / (rr.len() - 1) as f64).sqrt()
}

/// Percentage of successive differences whose magnitude exceeds 50 ms.
pub fn pnn50(rr: &[u16]) -> f64 {
    if rr.len() < 2 {
        return 0.0;
    }
    let nn50 = successive_differences(rr)
        .filter(|d| d.abs() > NN50_THRESHOLD_MS)
        .count();
    100.0 * nn50 as f64 / (rr.len() - 1) as f64
}

/// Simplified LF/HF ratio.
///
/// Both bands are a fixed fraction of the summed squared RR values in
/// seconds, so any non-trivial input yields `LF_WEIGHT / HF_WEIGHT`. A real
/// spectral estimate (FFT or Lomb-Scargle over a resampled tachogram) would
/// replace both band sums.
pub fn lf_hf_ratio(rr: &[u16]) -> f64 {
    if rr.len() < LF_HF_MIN_SAMPLES {
        return 1.0;
    }
    let power: f64 = rr
        .iter()
        .map(|&v| {
            let secs = f64::from(v) / 1000.0;
            secs * secs
        })
        .sum();
    let lf = power * LF_WEIGHT;
    let hf = power * HF_WEIGHT;
    if hf == 0.0 {
        return 1.0;
    }
    lf / hf
}

/// Arithmetic mean of the RR intervals, 0 when empty.
pub fn mean_rr(rr: &[u16]) -> f64 {
    if rr.is_empty() {
        return 0.0;
    }
    rr.iter().map(|&v| f64::from(v)).sum::<f64>() / rr.len() as f64
}

/// Map RMSSD onto a 0-100 scale.
///
/// Each linear segment truncates toward zero, so the 30-60 ms segment tops
/// out at 99 before saturating at 100.
pub fn score(rmssd_ms: f64) -> u8 {
    if rmssd_ms <= 0.0 || !rmssd_ms.is_finite() {
        return 0;
    }
    if rmssd_ms < 10.0 {
        (rmssd_ms * 3.0) as u8
    } else if rmssd_ms < 30.0 {
        30 + ((rmssd_ms - 10.0) * 2.0) as u8
    } else if rmssd_ms < 60.0 {
        70 + (rmssd_ms - 30.0) as u8
    } else {
        100
    }
}

fn successive_differences(rr: &[u16]) -> impl Iterator<Item = f64> + '_ {
    rr.windows(2)
        .map(|pair| f64::from(pair[1]) - f64::from(pair[0]))
}

/// Append-only RR interval buffer for one monitoring session.
#[derive(Debug, Clone, Default)]
pub struct RrBuffer {
    intervals: Vec<u16>,
}

impl RrBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one interval. Zero-length intervals are not beats and are ignored.
    pub fn push(&mut self, rr_ms: u16) -> bool {
        if rr_ms == 0 {
            return false;
        }
        self.intervals.push(rr_ms);
        true
    }

    /// Append every interval of a decoded sample, returning how many were kept.
    pub fn extend_from_slice(&mut self, rr_ms: &[u16]) -> usize {
        rr_ms.iter().filter(|&&rr| self.push(rr)).count()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.intervals
    }

    /// Copy the current contents for computation outside any lock.
    pub fn snapshot(&self) -> Vec<u16> {
        self.intervals.clone()
    }

    /// Discard all intervals (session start only).
    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    pub fn metrics(&self) -> HrvMetrics {
        HrvMetrics::compute(&self.intervals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: [u16; 5] = [800, 810, 790, 850, 800];

    #[test]
    fn test_score_band_edges() {
        assert_eq!(ScoreBand::from_score(100), ScoreBand::Excellent);
        assert_eq!(ScoreBand::from_score(80), ScoreBand::Excellent);
        assert_eq!(ScoreBand::from_score(79), ScoreBand::Good);
        assert_eq!(ScoreBand::from_score(60), ScoreBand::Good);
        assert_eq!(ScoreBand::from_score(59), ScoreBand::Moderate);
        assert_eq!(ScoreBand::from_score(40), ScoreBand::Moderate);
        assert_eq!(ScoreBand::from_score(39), ScoreBand::Poor);
        assert_eq!(ScoreBand::from_score(0), ScoreBand::Poor);
    }

    #[test]
    fn test_rmssd_band_edges() {
        assert_eq!(RmssdBand::from_rmssd(50.1), RmssdBand::High);
        assert_eq!(RmssdBand::from_rmssd(50.0), RmssdBand::Normal);
        assert_eq!(RmssdBand::from_rmssd(20.1), RmssdBand::Normal);
        assert_eq!(RmssdBand::from_rmssd(20.0), RmssdBand::Low);
        assert_eq!(RmssdBand::from_rmssd(0.0), RmssdBand::Low);
    }

    #[test]
    fn test_balance_band_edges() {
        assert_eq!(BalanceBand::from_ratio(2.01), BalanceBand::SympatheticHigh);
        assert_eq!(BalanceBand::from_ratio(2.0), BalanceBand::Balanced);
        assert_eq!(BalanceBand::from_ratio(0.5), BalanceBand::Balanced);
        assert_eq!(BalanceBand::from_ratio(0.49), BalanceBand::Low);
    }

    #[test]
    fn test_fixture_assessment() {
        // score 80, RMSSD 40.6, LF/HF placeholder 1.0 for a short series
        let assessment = HrvMetrics::compute(&FIXTURE).assess();
        assert_eq!(
            assessment,
            HrvAssessment {
                overall: ScoreBand::Excellent,
                rmssd: RmssdBand::Normal,
                balance: BalanceBand::Balanced,
            }
        );
    }

    #[test]
    fn test_fixture_reference_values() {
        // diffs 10, -20, 60, -50 -> squares sum 6600 over 4
        assert!((rmssd(&FIXTURE) - 40.620_192_023_179_8).abs() < 1e-9);
        // only |60| exceeds 50
        assert!((pnn50(&FIXTURE) - 25.0).abs() < 1e-12);
        // mean 810, squared deviations sum 2200 over 4
        assert!((sdnn(&FIXTURE) - 23.452_078_799_117_15).abs() < 1e-9);
        assert!((mean_rr(&FIXTURE) - 810.0).abs() < 1e-12);
        assert_eq!(score(rmssd(&FIXTURE)), 80);
    }

    #[test]
    fn test_short_sequences_are_zero() {
        for rr in [&[][..], &[900][..]] {
            let metrics = HrvMetrics::compute(rr);
            assert_eq!(metrics.sdnn_ms, 0.0);
            assert_eq!(metrics.rmssd_ms, 0.0);
            assert_eq!(metrics.pnn50_pct, 0.0);
            assert_eq!(metrics.score, 0);
            assert_eq!(metrics.lf_hf_ratio, 1.0);
        }
    }

    #[test]
    fn test_lf_hf_placeholder() {
        assert_eq!(lf_hf_ratio(&FIXTURE), 1.0);
        let long = [800u16; 12];
        assert!((lf_hf_ratio(&long) - 0.5 / 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_score_segments() {
        assert_eq!(score(0.0), 0);
        assert_eq!(score(5.0), 15);
        assert_eq!(score(10.0), 30);
        assert_eq!(score(20.5), 51);
        assert_eq!(score(30.0), 70);
        assert_eq!(score(59.9), 99);
        assert_eq!(score(60.0), 100);
        assert_eq!(score(250.0), 100);
    }

    #[test]
    fn test_constant_sequence_has_no_variability() {
        let metrics = HrvMetrics::compute(&[1000, 1000, 1000, 1000]);
        assert_eq!(metrics.sdnn_ms, 0.0);
        assert_eq!(metrics.rmssd_ms, 0.0);
        assert_eq!(metrics.score, 0);
    }

    #[test]
    fn test_rr_buffer_rejects_zero() {
        let mut buffer = RrBuffer::new();
        assert_eq!(buffer.extend_from_slice(&[800, 0, 820]), 2);
        assert_eq!(buffer.as_slice(), &[800, 820]);

        let snapshot = buffer.snapshot();
        buffer.push(830);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(buffer.len(), 3);

        buffer.clear();
        assert!(buffer.is_empty());
    }
}
