//! The derived 1-D pattern: intensity as a function of two-theta.

use ndarray::Array2;

/// Default number of two-theta bins for azimuthal integration.
pub const INTEGRATION_BINS: usize = 1000;

/// A 1-D pattern as parallel x/y sequences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pattern {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// Pattern state of one model: the current pattern and its source name.
#[derive(Debug, Default)]
pub struct PatternModel {
    pattern: Pattern,
    filename: String,
}

impl PatternModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn set(&mut self, pattern: Pattern, filename: impl Into<String>) {
        self.pattern = pattern;
        self.filename = filename.into();
    }
}

/// Azimuthally integrate an image: mean intensity per two-theta bin.
///
/// Empty bins are skipped, so the result length is at most `bins`.
#[must_use]
pub fn integrate(intensities: &Array2<f32>, two_theta: &Array2<f64>, bins: usize) -> Pattern {
    if intensities.is_empty() || bins == 0 {
        return Pattern::default();
    }

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &t in two_theta {
        min = min.min(t);
        max = max.max(t);
    }
    if !(max > min) {
        return Pattern::default();
    }

    #[allow(clippy::cast_precision_loss)]
    let width = (max - min) / bins as f64;
    let mut sums = vec![0.0f64; bins];
    let mut counts = vec![0usize; bins];

    for (&value, &t) in intensities.iter().zip(two_theta.iter()) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bin = (((t - min) / width) as usize).min(bins - 1);
        sums[bin] += f64::from(value);
        counts[bin] += 1;
    }

    let mut pattern = Pattern::default();
    for (bin, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        #[allow(clippy::cast_precision_loss)]
        pattern.x.push(min + (bin as f64 + 0.5) * width);
        #[allow(clippy::cast_precision_loss)]
        pattern.y.push(sums[bin] / count as f64);
    }
    pattern
}

#[cfg(test)]
#[path = "pattern_test.rs"]
mod tests;
