//! Binary codec for 2-D image arrays on the streaming channel.
//!
//! DESIGN
//! ======
//! The wire (and on-disk) format is NPY v1.0: magic, version, little-endian
//! header length, a Python-dict header carrying dtype / order / shape, then
//! raw little-endian element data. The format is self-describing so shape
//! and dtype survive the round trip to any client.
//!
//! Encoding always writes `<f4`. Decoding accepts `<f4` and `<u2` (detector
//! counts), widening the latter to f32.

use ndarray::Array2;

/// `\x93NUMPY` — the NPY magic string.
const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Offset of the header text: magic + version + header length.
const HEADER_START: usize = 10;

/// The header is padded with spaces so the data section is 64-byte aligned.
const HEADER_ALIGN: usize = 64;

/// Error returned by [`decode`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("not an NPY payload (bad magic)")]
    BadMagic,
    #[error("unsupported NPY version: {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("malformed NPY header")]
    BadHeader,
    #[error("unsupported dtype: {0}")]
    UnsupportedDtype(String),
    #[error("fortran-ordered arrays are not supported")]
    FortranOrder,
    #[error("payload is not a 2-D array")]
    NotTwoDimensional,
    #[error("data length does not match header shape")]
    LengthMismatch,
}

/// Encode a 2-D f32 array as an NPY v1.0 payload.
#[must_use]
pub fn encode(array: &Array2<f32>) -> Vec<u8> {
    let (rows, cols) = array.dim();
    let mut header =
        format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({rows}, {cols}), }}")
            .into_bytes();

    let unpadded = HEADER_START + header.len() + 1;
    let pad = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.extend(std::iter::repeat_n(b' ', pad));
    header.push(b'\n');

    let mut out = Vec::with_capacity(HEADER_START + header.len() + array.len() * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&u16::try_from(header.len()).unwrap_or(u16::MAX).to_le_bytes());
    out.extend_from_slice(&header);
    for value in array {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Decode an NPY v1.0 payload into a 2-D f32 array.
///
/// # Errors
///
/// Returns a [`CodecError`] for malformed payloads, unsupported dtypes or
/// versions, fortran-ordered data, and non-2-D shapes.
pub fn decode(bytes: &[u8]) -> Result<Array2<f32>, CodecError> {
    if bytes.len() < HEADER_START || &bytes[..6] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let (major, minor) = (bytes[6], bytes[7]);
    if (major, minor) != (1, 0) {
        return Err(CodecError::UnsupportedVersion(major, minor));
    }

    let header_len = usize::from(u16::from_le_bytes([bytes[8], bytes[9]]));
    let header_end = HEADER_START + header_len;
    if bytes.len() < header_end {
        return Err(CodecError::BadHeader);
    }
    let header = std::str::from_utf8(&bytes[HEADER_START..header_end]).map_err(|_| CodecError::BadHeader)?;

    let descr = dict_str_value(header, "descr").ok_or(CodecError::BadHeader)?;
    if dict_flag(header, "fortran_order").ok_or(CodecError::BadHeader)? {
        return Err(CodecError::FortranOrder);
    }
    let (rows, cols) = dict_shape(header)?;

    let data = &bytes[header_end..];
    let expected = rows * cols;
    let values = match descr {
        "<f4" => {
            if data.len() != expected * 4 {
                return Err(CodecError::LengthMismatch);
            }
            data.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect::<Vec<_>>()
        }
        "<u2" => {
            if data.len() != expected * 2 {
                return Err(CodecError::LengthMismatch);
            }
            data.chunks_exact(2)
                .map(|c| f32::from(u16::from_le_bytes([c[0], c[1]])))
                .collect::<Vec<_>>()
        }
        other => return Err(CodecError::UnsupportedDtype(other.to_string())),
    };

    Array2::from_shape_vec((rows, cols), values).map_err(|_| CodecError::LengthMismatch)
}

// =============================================================================
// HEADER PARSING
// =============================================================================

/// Extract a quoted string value (`'key': '<value>'`) from the header dict.
fn dict_str_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let rest = header.split_once(&format!("'{key}':"))?.1.trim_start();
    let rest = rest.strip_prefix('\'')?;
    let end = rest.find('\'')?;
    Some(&rest[..end])
}

/// Extract a `True`/`False` value from the header dict.
fn dict_flag(header: &str, key: &str) -> Option<bool> {
    let rest = header.split_once(&format!("'{key}':"))?.1.trim_start();
    if rest.starts_with("True") {
        Some(true)
    } else if rest.starts_with("False") {
        Some(false)
    } else {
        None
    }
}

/// Extract the shape tuple, requiring exactly two dimensions.
fn dict_shape(header: &str) -> Result<(usize, usize), CodecError> {
    let rest = header
        .split_once("'shape':")
        .ok_or(CodecError::BadHeader)?
        .1
        .trim_start();
    let rest = rest.strip_prefix('(').ok_or(CodecError::BadHeader)?;
    let end = rest.find(')').ok_or(CodecError::BadHeader)?;
    let dims = rest[..end]
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<usize>().map_err(|_| CodecError::BadHeader))
        .collect::<Result<Vec<_>, _>>()?;
    match dims.as_slice() {
        [rows, cols] => Ok((*rows, *cols)),
        _ => Err(CodecError::NotTwoDimensional),
    }
}

#[cfg(test)]
#[path = "npy_test.rs"]
mod tests;
