//! Big-endian byte reading and writing utilities for class file parsing.
//!
//! The class file format stores every multi-byte quantity in big-endian order (JVMS §4).
//! This module provides the [`crate::file::io::ClassIO`] trait together with bounds-checked
//! helpers for reading values out of byte slices and appending values to output buffers.
//!
//! # Key Components
//!
//! - [`crate::file::io::ClassIO`] - Conversion between primitive types and big-endian bytes
//! - [`crate::file::io::read_be`] - Read a value from the start of a buffer
//! - [`crate::file::io::read_be_at`] - Read a value at an offset and advance the offset
//! - [`crate::file::io::write_be`] - Append a value to a growable buffer
//! - [`crate::file::io::write_be_at`] - Overwrite a value at an offset of a fixed buffer
//!
//! # Usage Examples
//!
//! ```rust,ignore
//! use classweave::file::io::{read_be_at, write_be};
//!
//! let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x34];
//! let mut offset = 0;
//! let magic: u32 = read_be_at(&data, &mut offset)?;
//! let major: u16 = read_be_at(&data, &mut offset)?;
//! assert_eq!((magic, major, offset), (0xCAFEBABE, 52, 6));
//!
//! let mut out = Vec::new();
//! write_be(&mut out, 0xCAFEBABE_u32);
//! assert_eq!(out, [0xCA, 0xFE, 0xBA, 0xBE]);
//! # Ok::<(), classweave::Error>(())
//! ```
//!
//! # Error Handling
//!
//! Reading functions return [`crate::Error::OutOfBounds`] if the buffer holds fewer bytes
//! than the requested type needs.
//!
//! # Thread Safety
//!
//! All functions are pure and operate on caller-owned buffers.

use crate::{Error::OutOfBounds, Result};

/// Trait for implementing type-specific big-endian conversion.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array required for that particular type (e.g., `[u8; 4]` for `u32`).
pub trait ClassIO: Sized + Copy {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in big-endian
    fn from_be_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in big-endian
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_class_io {
    ($($ty:ty => $size:expr),* $(,)?) => {
        $(
            impl ClassIO for $ty {
                type Bytes = [u8; $size];

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_be_bytes(self) -> Self::Bytes {
                    <$ty>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_class_io!(
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
);

/// Safely reads a value of type `T` in big-endian byte order from the start of a buffer.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be<T: ClassIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_be_at(data, &mut offset)
}

/// Safely reads a value of type `T` in big-endian byte order at a specific offset.
///
/// The offset is advanced by the number of bytes read.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be_at<T: ClassIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_be_bytes(read))
}

/// Appends `value` in big-endian byte order to a growable buffer.
pub fn write_be<T: ClassIO>(data: &mut Vec<u8>, value: T) {
    data.extend_from_slice(value.to_be_bytes().as_ref());
}

/// Overwrites the bytes at `offset` with `value` in big-endian order and advances the offset.
///
/// Used to patch placeholders (lengths, branch offsets) once their value is known.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too short.
pub fn write_be_at<T: ClassIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_be_bytes();
    let bytes = bytes.as_ref();
    let end = offset.checked_add(bytes.len()).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;
    Ok(())
}

/// Appends a `u16` length prefix for `len`, failing if it exceeds the class file limit.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if `len` does not fit in 16 bits.
pub fn write_u16_len(data: &mut Vec<u8>, len: usize, what: &str) -> Result<()> {
    let len = u16::try_from(len)
        .map_err(|_| malformed_error!("Too many {} for a u16 count: {}", what, len))?;
    write_be(data, len);
    Ok(())
}

/// Appends a `u32` length prefix for `len`.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if `len` does not fit in 32 bits.
pub fn write_u32_len(data: &mut Vec<u8>, len: usize, what: &str) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| malformed_error!("{} is too large for a u32 length: {}", what, len))?;
    write_be(data, len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_be_u16() {
        let result = read_be::<u16>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0102);
    }

    #[test]
    fn read_be_i32_negative() {
        let data = [0xFF, 0xFF, 0xFF, 0xFE];
        assert_eq!(read_be::<i32>(&data).unwrap(), -2);
    }

    #[test]
    fn read_be_at_advances() {
        let mut offset = 2;
        let value = read_be_at::<u32>(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(value, 0x03040506);
        assert_eq!(offset, 6);
    }

    #[test]
    fn read_out_of_bounds() {
        let mut offset = 6;
        let result = read_be_at::<u32>(&TEST_BUFFER, &mut offset);
        assert!(matches!(result, Err(OutOfBounds)));
        assert_eq!(offset, 6);
    }

    #[test]
    fn write_and_patch() {
        let mut out = Vec::new();
        write_be(&mut out, 0xCAFEBABE_u32);
        write_be(&mut out, 0_u16);

        let mut offset = 4;
        write_be_at(&mut out, &mut offset, 0x0034_u16).unwrap();

        assert_eq!(out, [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x34]);
        assert_eq!(offset, 6);
    }

    #[test]
    fn patch_past_end_fails() {
        let mut out = vec![0_u8; 3];
        let mut offset = 1;
        assert!(write_be_at(&mut out, &mut offset, 1_u32).is_err());
    }

    #[test]
    fn u16_length_limit() {
        let mut out = Vec::new();
        assert!(write_u16_len(&mut out, 65_535, "entries").is_ok());
        assert!(write_u16_len(&mut out, 65_536, "entries").is_err());
    }
}
