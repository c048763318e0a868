//! Headerless binary tensor files.
//!
//! A file holds the raw native-endian elements of one tensor and nothing else;
//! the shape travels out of band. `f32` files carry values, `i64` files carry
//! indices (MaxPool argmax, NMS selections).

use std::fs;
use std::path::Path;

use bytemuck::Pod;
use tracing::debug;

use crate::error::{KernelError, Result};

fn write_pod<T: Pod>(path: &Path, data: &[T]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytemuck::cast_slice::<T, u8>(data))?;
    debug!(path = %path.display(), elements = data.len(), "wrote tensor");
    Ok(())
}

fn read_pod<T: Pod>(path: &Path, expected_len: Option<usize>) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(KernelError::MissingResource { path: path.to_path_buf() });
    }
    let bytes = fs::read(path)?;
    let size = std::mem::size_of::<T>();
    let name = path.display().to_string();
    if bytes.len() % size != 0 {
        return Err(KernelError::shape(
            &name,
            format!("{} bytes is not a whole number of {size}-byte elements", bytes.len()),
        ));
    }
    let len = bytes.len() / size;
    if let Some(expected) = expected_len {
        if len != expected {
            return Err(KernelError::shape(&name, format!("holds {len} elements, expected {expected}")));
        }
    }
    // The byte buffer has no alignment guarantee for T.
    Ok(bytemuck::pod_collect_to_vec::<u8, T>(&bytes))
}

/// Write `data` as raw native-endian `f32`, creating parent directories.
///
/// # Errors
/// `Io` if the file cannot be written.
pub fn write_f32(path: &Path, data: &[f32]) -> Result<()> {
    write_pod(path, data)
}

/// Read a raw `f32` file, optionally checking its element count.
///
/// # Errors
/// `MissingResource` if the file is absent; `ShapeMismatch` if its size is
/// not a whole number of elements or differs from `expected_len`.
pub fn read_f32(path: &Path, expected_len: Option<usize>) -> Result<Vec<f32>> {
    read_pod(path, expected_len)
}

/// Write `data` as raw native-endian `i64`.
///
/// # Errors
/// `Io` if the file cannot be written.
pub fn write_i64(path: &Path, data: &[i64]) -> Result<()> {
    write_pod(path, data)
}

/// Read a raw `i64` index file.
///
/// # Errors
/// As [`read_f32`].
pub fn read_i64(path: &Path, expected_len: Option<usize>) -> Result<Vec<i64>> {
    read_pod(path, expected_len)
}
