//! Detector calibration and scattering-angle geometry.
//!
//! Pixel coordinates are `(x, y)` = (column, row). Two-theta and azimuth
//! are reported in degrees; wavelength is stored in meters.

use std::f64::consts::PI;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Flat-detector geometry in normal incidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// X-ray wavelength in meters.
    pub wavelength: f64,
    /// Sample-detector distance in meters.
    pub distance: f64,
    /// Beam center column, in pixels.
    pub center_x: f64,
    /// Beam center row, in pixels.
    pub center_y: f64,
    /// Pixel edge length in meters.
    pub pixel_size: f64,
}

impl Geometry {
    /// Two-theta at a pixel, in degrees.
    #[must_use]
    pub fn two_theta(&self, x: f64, y: f64) -> f64 {
        let dx = (x - self.center_x) * self.pixel_size;
        let dy = (y - self.center_y) * self.pixel_size;
        (dx.hypot(dy) / self.distance).atan().to_degrees()
    }

    /// Azimuth of a pixel around the beam center, in degrees.
    #[must_use]
    pub fn azimuth(&self, x: f64, y: f64) -> f64 {
        (y - self.center_y).atan2(x - self.center_x).to_degrees()
    }
}

/// Momentum transfer q (1/Å) for a two-theta value in degrees.
#[must_use]
pub fn q_from_two_theta(tth: f64, wavelength: f64) -> f64 {
    4.0 * PI * (tth / 360.0 * PI).sin() / wavelength / 1e10
}

/// Lattice spacing d (Å) for a two-theta value in degrees.
#[must_use]
pub fn d_from_two_theta(tth: f64, wavelength: f64) -> f64 {
    wavelength / (2.0 * (tth / 360.0 * PI).sin()) * 1e10
}

/// Calibration state of one model: absent until a calibrated project or a
/// live calibration provides a [`Geometry`].
#[derive(Debug, Default)]
pub struct CalibrationModel {
    geometry: Option<Geometry>,
}

impl CalibrationModel {
    #[must_use]
    pub fn new() -> Self {
        Self { geometry: None }
    }

    #[must_use]
    pub fn is_calibrated(&self) -> bool {
        self.geometry.is_some()
    }

    #[must_use]
    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    pub fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = Some(geometry);
    }

    #[must_use]
    pub fn wavelength(&self) -> Option<f64> {
        self.geometry.map(|g| g.wavelength)
    }

    /// Two-theta in degrees for every pixel of a `(rows, cols)` detector.
    #[must_use]
    pub fn two_theta_field(&self, dim: (usize, usize)) -> Option<Array2<f64>> {
        let geometry = self.geometry?;
        #[allow(clippy::cast_precision_loss)]
        let field = Array2::from_shape_fn(dim, |(row, col)| {
            geometry.two_theta(col as f64, row as f64)
        });
        Some(field)
    }
}

#[cfg(test)]
#[path = "calibration_test.rs"]
mod tests;
