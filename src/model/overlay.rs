//! Overlay curves displayed alongside the primary pattern.
//!
//! Overlays are addressed by position. Indices are dense `0..N-1`; removing
//! index `k` shifts every later overlay down by one, so clients must
//! re-resolve indices after any removal.

use super::pattern::Pattern;

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("overlay index out of range: {0}")]
    NotFound(usize),
}

/// One auxiliary curve: a named pattern with display offset and scaling.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub name: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub offset: f64,
    pub scaling: f64,
}

/// The ordered overlay sequence of one model.
#[derive(Debug, Default)]
pub struct OverlayModel {
    overlays: Vec<Overlay>,
}

impl OverlayModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pattern as a new overlay with neutral offset and scaling.
    /// Returns the new overlay's index.
    pub fn add_pattern(&mut self, name: impl Into<String>, pattern: &Pattern) -> usize {
        self.overlays.push(Overlay {
            name: name.into(),
            x: pattern.x.clone(),
            y: pattern.y.clone(),
            offset: 0.0,
            scaling: 1.0,
        });
        self.overlays.len() - 1
    }

    /// Remove the overlay at `index`, shifting later overlays down by one.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::NotFound`] when `index` is out of range.
    pub fn remove(&mut self, index: usize) -> Result<Overlay, OverlayError> {
        if index >= self.overlays.len() {
            return Err(OverlayError::NotFound(index));
        }
        Ok(self.overlays.remove(index))
    }

    /// Drop all overlays, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.overlays.len();
        self.overlays.clear();
        count
    }

    /// # Errors
    ///
    /// Returns [`OverlayError::NotFound`] when `index` is out of range.
    pub fn set_scaling(&mut self, index: usize, scaling: f64) -> Result<(), OverlayError> {
        self.get_mut(index)?.scaling = scaling;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`OverlayError::NotFound`] when `index` is out of range.
    pub fn set_offset(&mut self, index: usize, offset: f64) -> Result<(), OverlayError> {
        self.get_mut(index)?.offset = offset;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`OverlayError::NotFound`] when `index` is out of range.
    pub fn get(&self, index: usize) -> Result<&Overlay, OverlayError> {
        self.overlays.get(index).ok_or(OverlayError::NotFound(index))
    }

    #[must_use]
    pub fn all(&self) -> &[Overlay] {
        &self.overlays
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut Overlay, OverlayError> {
        self.overlays
            .get_mut(index)
            .ok_or(OverlayError::NotFound(index))
    }
}

#[cfg(test)]
#[path = "overlay_test.rs"]
mod tests;
