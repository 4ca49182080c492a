//! Readers for the raw CIFAR-10 image, label and parameter dumps.
//!
//! All files are headerless little-endian arrays. Images are `(3, 32, 32)` `f32`
//! tensors back to back, labels are `i32`, and the parameter blob holds every
//! layer's weights followed by its bias in architecture order.

use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};

use thiserror::Error;

/// Floats per `(3, 32, 32)` image.
pub const IMAGE_FLOATS: usize = 3 * 32 * 32;

/// Bytes expected in `network.bin` for the VGG16 CIFAR-10 parameter set.
pub const NETWORK_BYTES: usize = 60_980_520;

pub const DEFAULT_IMAGES_FILE: &str = "cifar10_image.bin";
pub const DEFAULT_LABELS_FILE: &str = "cifar10_label.bin";
pub const DEFAULT_NETWORK_FILE: &str = "network.bin";

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: {expected} bytes are expected, but {actual} bytes are read", path.display())]
    ShortRead {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("label {value} at index {index} is outside 0..10")]
    LabelOutOfRange { index: usize, value: i32 },
}

/// Read exactly the first `n` bytes of `path`.
pub fn read_bytes(path: &Path, n: usize) -> Result<Vec<u8>, DatasetError> {
    let file = File::open(path).map_err(|source| DatasetError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut bytes = Vec::with_capacity(n);
    file.take(n as u64)
        .read_to_end(&mut bytes)
        .map_err(|source| DatasetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if bytes.len() != n {
        return Err(DatasetError::ShortRead {
            path: path.to_path_buf(),
            expected: n,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

/// Read `n` images as one flat channel-major `f32` array.
pub fn read_images(path: &Path, n: usize) -> Result<Vec<f32>, DatasetError> {
    let bytes = read_bytes(path, n * IMAGE_FLOATS * size_of::<f32>())?;
    Ok(decode_f32(&bytes))
}

/// Read `n` ground-truth labels.
pub fn read_labels(path: &Path, n: usize) -> Result<Vec<usize>, DatasetError> {
    let bytes = read_bytes(path, n * size_of::<i32>())?;
    bytes
        .chunks_exact(4)
        .enumerate()
        .map(|(index, chunk)| {
            let value = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            usize::try_from(value)
                .ok()
                .filter(|label| *label < 10)
                .ok_or(DatasetError::LabelOutOfRange { index, value })
        })
        .collect()
}

/// Read the whole parameter blob.
pub fn read_network(path: &Path) -> Result<Vec<f32>, DatasetError> {
    let bytes = read_bytes(path, NETWORK_BYTES)?;
    Ok(decode_f32(&bytes))
}

fn decode_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Encode floats the way the readers expect them; used to build fixtures.
pub fn encode_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn short_file_reports_expected_and_actual_sizes() {
        let file = NamedTempFile::new().expect("tempfile");
        fs::write(file.path(), [0u8; 10]).expect("write");
        match read_bytes(file.path(), 16) {
            Err(DatasetError::ShortRead {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 16);
                assert_eq!(actual, 10);
            }
            other => panic!("expected short read, got {other:?}"),
        }
    }

    #[test]
    fn longer_file_is_truncated_to_request() {
        let file = NamedTempFile::new().expect("tempfile");
        fs::write(file.path(), encode_f32(&[1.0, 2.0, 3.0])).expect("write");
        let bytes = read_bytes(file.path(), 8).expect("read");
        assert_eq!(decode_f32(&bytes), vec![1.0, 2.0]);
    }

    #[test]
    fn images_decode_little_endian_floats() {
        let file = NamedTempFile::new().expect("tempfile");
        let values: Vec<f32> = (0..IMAGE_FLOATS).map(|i| i as f32 * 0.25).collect();
        fs::write(file.path(), encode_f32(&values)).expect("write");
        let images = read_images(file.path(), 1).expect("read images");
        assert_eq!(images, values);
    }

    #[test]
    fn labels_outside_class_range_are_rejected() {
        let file = NamedTempFile::new().expect("tempfile");
        let raw: Vec<u8> = [3i32, 12].iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(file.path(), raw).expect("write");
        match read_labels(file.path(), 2) {
            Err(DatasetError::LabelOutOfRange { index, value }) => {
                assert_eq!(index, 1);
                assert_eq!(value, 12);
            }
            other => panic!("expected out-of-range label, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = read_network(Path::new("does/not/exist/network.bin")).unwrap_err();
        assert!(matches!(err, DatasetError::Open { .. }));
    }
}
