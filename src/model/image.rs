//! Image state: the current detector frame and its source file.
//!
//! Sequence navigation follows the trailing number in the file stem
//! (`image_001.npy` → `image_002.npy`), preserving zero padding.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::npy;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image file not readable: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] npy::CodecError),
    #[error("filename carries no sequence number: {0:?}")]
    NoSequence(String),
    #[error("no file before the start of the sequence: {0:?}")]
    OutOfSequence(String),
}

/// The currently loaded image. Empty (0x0, no filename) until a load
/// succeeds; a failed load leaves the previous state untouched.
#[derive(Debug)]
pub struct ImageModel {
    data: Array2<f32>,
    filename: String,
}

impl ImageModel {
    #[must_use]
    pub fn new() -> Self {
        Self { data: Array2::zeros((0, 0)), filename: String::new() }
    }

    #[must_use]
    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Load an NPY image file, replacing the current image on success only.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Io`] for unreadable paths and
    /// [`ImageError::Codec`] for malformed payloads.
    pub fn load(&mut self, path: &Path) -> Result<(), ImageError> {
        let bytes = std::fs::read(path)?;
        let data = npy::decode(&bytes)?;
        self.data = data;
        self.filename = path.to_string_lossy().into_owned();
        Ok(())
    }

    /// Load the next file in the current filename sequence.
    ///
    /// # Errors
    ///
    /// Fails when the current filename has no trailing number or the
    /// neighboring file cannot be loaded.
    pub fn load_next(&mut self) -> Result<(), ImageError> {
        let path = self.step_filename(1)?;
        self.load(&path)
    }

    /// Load the previous file in the current filename sequence.
    ///
    /// # Errors
    ///
    /// Fails when the current filename has no trailing number, the sequence
    /// number is already zero, or the neighboring file cannot be loaded.
    pub fn load_previous(&mut self) -> Result<(), ImageError> {
        let path = self.step_filename(-1)?;
        self.load(&path)
    }

    fn step_filename(&self, step: i64) -> Result<PathBuf, ImageError> {
        let path = Path::new(&self.filename);
        let stem = path
            .file_stem()
            .and_then(OsStr::to_str)
            .ok_or_else(|| ImageError::NoSequence(self.filename.clone()))?;

        let digits_start = stem.rfind(|c: char| !c.is_ascii_digit()).map_or(0, |i| i + 1);
        let digits = &stem[digits_start..];
        let number: i64 = digits
            .parse()
            .map_err(|_| ImageError::NoSequence(self.filename.clone()))?;

        let next = number + step;
        if next < 0 {
            return Err(ImageError::OutOfSequence(self.filename.clone()));
        }

        let width = digits.len();
        let mut name = format!("{}{:0width$}", &stem[..digits_start], next);
        if let Some(ext) = path.extension().and_then(OsStr::to_str) {
            name.push('.');
            name.push_str(ext);
        }
        Ok(path.with_file_name(name))
    }
}

impl Default for ImageModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "image_test.rs"]
mod tests;
