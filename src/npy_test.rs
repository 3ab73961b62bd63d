use super::*;
use ndarray::array;

/// Hand-build an NPY payload with an arbitrary header dict and raw data.
fn raw_npy(header_dict: &str, data: &[u8]) -> Vec<u8> {
    let mut header = header_dict.as_bytes().to_vec();
    let unpadded = HEADER_START + header.len() + 1;
    let pad = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.extend(std::iter::repeat_n(b' ', pad));
    header.push(b'\n');

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&u16::try_from(header.len()).unwrap().to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(data);
    out
}

#[test]
fn encode_layout_is_self_describing() {
    let bytes = encode(&array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]]);

    assert_eq!(&bytes[..6], MAGIC);
    assert_eq!(&bytes[6..8], &[1, 0]);

    let header_len = usize::from(u16::from_le_bytes([bytes[8], bytes[9]]));
    // Data section is 64-byte aligned.
    assert_eq!((HEADER_START + header_len) % HEADER_ALIGN, 0);

    let header = std::str::from_utf8(&bytes[HEADER_START..HEADER_START + header_len]).unwrap();
    assert!(header.contains("'descr': '<f4'"));
    assert!(header.contains("'fortran_order': False"));
    assert!(header.contains("'shape': (2, 3)"));
    assert!(header.ends_with('\n'));

    assert_eq!(bytes.len(), HEADER_START + header_len + 6 * 4);
}

#[test]
fn round_trip_preserves_shape_and_values() {
    let original = array![[0.5f32, -1.25], [3.75, 1e30]];
    let decoded = decode(&encode(&original)).expect("decode");
    assert_eq!(decoded, original);
}

#[test]
fn decode_widens_u16_counts() {
    let mut data = Vec::new();
    for v in [0u16, 1, 65535, 42] {
        data.extend_from_slice(&v.to_le_bytes());
    }
    let bytes = raw_npy("{'descr': '<u2', 'fortran_order': False, 'shape': (2, 2), }", &data);

    let decoded = decode(&bytes).expect("decode");
    assert_eq!(decoded, array![[0.0f32, 1.0], [65535.0, 42.0]]);
}

#[test]
fn decode_rejects_bad_magic() {
    assert!(matches!(decode(b"NOTNPY\x01\x00\x00\x00"), Err(CodecError::BadMagic)));
    assert!(matches!(decode(&[]), Err(CodecError::BadMagic)));
}

#[test]
fn decode_rejects_unknown_version() {
    let mut bytes = encode(&array![[1.0f32]]);
    bytes[6] = 2;
    assert!(matches!(decode(&bytes), Err(CodecError::UnsupportedVersion(2, 0))));
}

#[test]
fn decode_rejects_truncated_data() {
    let mut bytes = encode(&array![[1.0f32, 2.0]]);
    bytes.truncate(bytes.len() - 1);
    assert!(matches!(decode(&bytes), Err(CodecError::LengthMismatch)));
}

#[test]
fn decode_rejects_fortran_order() {
    let bytes = raw_npy(
        "{'descr': '<f4', 'fortran_order': True, 'shape': (1, 1), }",
        &1.0f32.to_le_bytes(),
    );
    assert!(matches!(decode(&bytes), Err(CodecError::FortranOrder)));
}

#[test]
fn decode_rejects_non_two_dimensional() {
    let mut data = Vec::new();
    for v in [1.0f32, 2.0, 3.0, 4.0] {
        data.extend_from_slice(&v.to_le_bytes());
    }
    let bytes = raw_npy("{'descr': '<f4', 'fortran_order': False, 'shape': (4,), }", &data);
    assert!(matches!(decode(&bytes), Err(CodecError::NotTwoDimensional)));
}

#[test]
fn decode_rejects_unsupported_dtype() {
    let bytes = raw_npy(
        "{'descr': '<f8', 'fortran_order': False, 'shape': (1, 1), }",
        &1.0f64.to_le_bytes(),
    );
    assert!(matches!(decode(&bytes), Err(CodecError::UnsupportedDtype(d)) if d == "<f8"));
}

#[test]
fn encode_empty_array() {
    let decoded = decode(&encode(&Array2::<f32>::zeros((0, 0)))).expect("decode");
    assert_eq!(decoded.dim(), (0, 0));
}
