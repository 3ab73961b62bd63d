//! The per-session analysis model: image, derived pattern, calibration,
//! and overlay curves, with change hooks for every mutation.
//!
//! ARCHITECTURE
//! ============
//! All mutation goes through `Model` methods; sub-models are only readable
//! from outside. Each successful mutation fires [`ModelEvent`]s on an
//! ordered observer list — observers run synchronously, in registration
//! order, and receive a shared borrow of the whole model so they can read
//! whatever state the event refers to.
//!
//! A failed mutation (unreadable file, malformed payload) leaves the model
//! untouched and fires nothing.

pub mod calibration;
pub mod contour;
pub mod image;
pub mod overlay;
pub mod pattern;
pub mod project;

use std::path::Path;

use calibration::CalibrationModel;
use image::{ImageError, ImageModel};
use overlay::{OverlayError, OverlayModel};
use pattern::{Pattern, PatternModel};
use project::{ProjectError, ProjectFile};

/// Iso-contour rings are reported as at most this many segments.
pub const MAX_RING_SEGMENTS: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Project(#[from] ProjectError),
}

/// One kind of model-internal mutation, as observed by change hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelEvent {
    ImageChanged,
    PatternChanged,
    OverlayAdded,
    OverlayChanged(usize),
    OverlayRemoved(usize),
}

type Observer = Box<dyn Fn(&Model, ModelEvent) + Send + Sync>;

// =============================================================================
// QUERY RESULTS
// =============================================================================

/// Scattering angles at one image pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageAngles {
    pub tth: f64,
    pub azi: f64,
    pub q: f64,
    pub d: f64,
}

/// Derived quantities for one two-theta value on the pattern axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternAngles {
    pub q: f64,
    pub d: f64,
}

/// Segments of an iso-two-theta ring in image coordinates (pixel centers).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ring {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<Vec<f64>>,
}

// =============================================================================
// MODEL
// =============================================================================

pub struct Model {
    image: ImageModel,
    pattern: PatternModel,
    calibration: CalibrationModel,
    overlays: OverlayModel,
    observers: Vec<Observer>,
}

impl Model {
    #[must_use]
    pub fn new() -> Self {
        Self {
            image: ImageModel::new(),
            pattern: PatternModel::new(),
            calibration: CalibrationModel::new(),
            overlays: OverlayModel::new(),
            observers: Vec::new(),
        }
    }

    /// Register a change observer. Observers fire in registration order.
    pub fn observe(&mut self, observer: impl Fn(&Model, ModelEvent) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn emit(&self, event: ModelEvent) {
        for observer in &self.observers {
            observer(self, event);
        }
    }

    // =========================================================================
    // READ ACCESS
    // =========================================================================

    #[must_use]
    pub fn image(&self) -> &ImageModel {
        &self.image
    }

    #[must_use]
    pub fn pattern(&self) -> &PatternModel {
        &self.pattern
    }

    #[must_use]
    pub fn calibration(&self) -> &CalibrationModel {
        &self.calibration
    }

    #[must_use]
    pub fn overlays(&self) -> &OverlayModel {
        &self.overlays
    }

    // =========================================================================
    // IMAGE & PROJECT MUTATIONS
    // =========================================================================

    /// Load an image file. Fires image-changed, and pattern-changed when a
    /// calibration allows re-integration.
    ///
    /// # Errors
    ///
    /// Propagates [`ImageError`]; the model is unchanged on failure.
    pub fn load_image(&mut self, path: &Path) -> Result<(), ImageError> {
        self.image.load(path)?;
        let integrated = self.reintegrate();
        self.emit(ModelEvent::ImageChanged);
        if integrated {
            self.emit(ModelEvent::PatternChanged);
        }
        Ok(())
    }

    /// Load the next image of the current filename sequence.
    ///
    /// # Errors
    ///
    /// Propagates [`ImageError`]; the model is unchanged on failure.
    pub fn load_next_image(&mut self) -> Result<(), ImageError> {
        self.image.load_next()?;
        let integrated = self.reintegrate();
        self.emit(ModelEvent::ImageChanged);
        if integrated {
            self.emit(ModelEvent::PatternChanged);
        }
        Ok(())
    }

    /// Load the previous image of the current filename sequence.
    ///
    /// # Errors
    ///
    /// Propagates [`ImageError`]; the model is unchanged on failure.
    pub fn load_previous_image(&mut self) -> Result<(), ImageError> {
        self.image.load_previous()?;
        let integrated = self.reintegrate();
        self.emit(ModelEvent::ImageChanged);
        if integrated {
            self.emit(ModelEvent::PatternChanged);
        }
        Ok(())
    }

    /// Load a saved project: calibration geometry, then image, then pattern.
    /// Fires image-changed / pattern-changed for whatever the project set.
    ///
    /// # Errors
    ///
    /// Propagates project parse and image load failures; calibration already
    /// applied before a later failure stays applied.
    pub fn load_project(&mut self, path: &Path) -> Result<(), ModelError> {
        let file = ProjectFile::read(path)?;

        if let Some(geometry) = file.calibration {
            self.calibration.set_geometry(geometry);
        }

        let mut image_changed = false;
        let mut pattern_changed = false;

        if let Some(image_path) = file.image_path(path) {
            self.image.load(&image_path)?;
            pattern_changed = self.reintegrate();
            image_changed = true;
        }
        if let Some(p) = file.pattern {
            let filename = p.filename.unwrap_or_default();
            self.pattern.set(Pattern { x: p.x, y: p.y }, filename);
            pattern_changed = true;
        }

        if image_changed {
            self.emit(ModelEvent::ImageChanged);
        }
        if pattern_changed {
            self.emit(ModelEvent::PatternChanged);
        }
        Ok(())
    }

    /// Apply a calibration geometry directly (live calibration path).
    pub fn set_calibration(&mut self, geometry: calibration::Geometry) {
        self.calibration.set_geometry(geometry);
    }

    /// Re-integrate the pattern from the current image, when calibrated.
    fn reintegrate(&mut self) -> bool {
        if self.image.data().is_empty() {
            return false;
        }
        let Some(field) = self.calibration.two_theta_field(self.image.data().dim()) else {
            return false;
        };
        let integrated = pattern::integrate(self.image.data(), &field, pattern::INTEGRATION_BINS);
        let filename = Path::new(self.image.filename())
            .with_extension("xy")
            .to_string_lossy()
            .into_owned();
        self.pattern.set(integrated, filename);
        true
    }

    // =========================================================================
    // OVERLAY MUTATIONS
    // =========================================================================

    /// Add the current pattern as a new overlay. Fires overlay-added.
    pub fn add_pattern_overlay(&mut self) {
        let name = Path::new(self.pattern.filename())
            .file_stem()
            .map_or_else(|| "pattern".to_string(), |s| s.to_string_lossy().into_owned());
        self.overlays.add_pattern(name, self.pattern.pattern());
        self.emit(ModelEvent::OverlayAdded);
    }

    /// Remove one overlay. Fires overlay-removed with the freed index.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::NotFound`] for an out-of-range index.
    pub fn remove_overlay(&mut self, index: usize) -> Result<(), OverlayError> {
        self.overlays.remove(index)?;
        self.emit(ModelEvent::OverlayRemoved(index));
        Ok(())
    }

    /// Drop all overlays. Fires overlay-removed once per overlay, from the
    /// highest index down, so receivers never have to shift their view.
    pub fn clear_overlays(&mut self) {
        let count = self.overlays.clear();
        for index in (0..count).rev() {
            self.emit(ModelEvent::OverlayRemoved(index));
        }
    }

    /// # Errors
    ///
    /// Returns [`OverlayError::NotFound`] for an out-of-range index.
    pub fn set_overlay_scaling(&mut self, index: usize, scaling: f64) -> Result<(), OverlayError> {
        self.overlays.set_scaling(index, scaling)?;
        self.emit(ModelEvent::OverlayChanged(index));
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`OverlayError::NotFound`] for an out-of-range index.
    pub fn set_overlay_offset(&mut self, index: usize, offset: f64) -> Result<(), OverlayError> {
        self.overlays.set_offset(index, offset)?;
        self.emit(ModelEvent::OverlayChanged(index));
        Ok(())
    }

    // =========================================================================
    // GEOMETRY QUERIES
    // =========================================================================

    /// Scattering angles at pixel `(x, y)`; `None` while uncalibrated.
    #[must_use]
    pub fn image_angles(&self, x: f64, y: f64) -> Option<ImageAngles> {
        let geometry = self.calibration.geometry()?;
        let tth = geometry.two_theta(x, y);
        Some(ImageAngles {
            tth,
            azi: geometry.azimuth(x, y),
            q: calibration::q_from_two_theta(tth, geometry.wavelength),
            d: calibration::d_from_two_theta(tth, geometry.wavelength),
        })
    }

    /// q and d for a two-theta value in degrees; `None` while uncalibrated.
    #[must_use]
    pub fn pattern_angles(&self, tth: f64) -> Option<PatternAngles> {
        let wavelength = self.calibration.wavelength()?;
        Some(PatternAngles {
            q: calibration::q_from_two_theta(tth, wavelength),
            d: calibration::d_from_two_theta(tth, wavelength),
        })
    }

    /// Segments of the iso-two-theta contour at `tth` degrees over the
    /// current image; `None` while uncalibrated.
    #[must_use]
    pub fn azimuthal_ring(&self, tth: f64) -> Option<Ring> {
        let field = self.calibration.two_theta_field(self.image.data().dim())?;
        let mut ring = Ring::default();
        for segment in contour::find_contours(&field, tth).into_iter().take(MAX_RING_SEGMENTS) {
            let mut xs = Vec::with_capacity(segment.len());
            let mut ys = Vec::with_capacity(segment.len());
            for (row, col) in segment {
                xs.push(col + 0.5);
                ys.push(row + 0.5);
            }
            ring.x.push(xs);
            ring.y.push(ys);
        }
        Some(ring)
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
