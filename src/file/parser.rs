//! Cursor-based byte stream parser for class file and bytecode decoding.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a bounds-checked cursor
//! over a byte slice. Every class file structure (constant pool, members, attributes, the
//! instruction stream of a `Code` attribute) is read through it.
//!
//! # Usage Examples
//!
//! ```rust
//! use classweave::Parser;
//!
//! let data = [0x00, 0x34, 0x00, 0x10];
//! let mut parser = Parser::new(&data);
//!
//! let major = parser.read_be::<u16>()?;
//! assert_eq!(major, 52);
//! assert_eq!(parser.remaining(), 2);
//! # Ok::<(), classweave::Error>(())
//! ```

use crate::{
    file::io::{read_be_at, ClassIO},
    Error::OutOfBounds,
    Result,
};

/// A generic binary data parser for reading class file structures.
///
/// `Parser` maintains an internal position cursor and validates every read against the
/// end of the buffer, so truncated or malicious input results in
/// [`crate::Error::OutOfBounds`] instead of a panic.
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`crate::file::parser::Parser`] from a byte slice.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use classweave::Parser;
    /// let data = [0x01, 0x02, 0x03, 0x04];
    /// let parser = Parser::new(&data);
    /// assert_eq!(parser.len(), 4);
    /// ```
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there are bytes left to read.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Get the current position of the parser within the data buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Number of bytes between the cursor and the end of the buffer.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move the position forward by the specified number of bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if advancing would exceed the data length.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let end = self.position.checked_add(step).ok_or(OutOfBounds)?;
        if end > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = end;
        Ok(())
    }

    /// Skip the padding bytes up to the next multiple of `alignment`.
    ///
    /// `tableswitch` and `lookupswitch` pad their operands to a 4-byte boundary measured
    /// from the start of the code array, which is why callers create the parser over the
    /// code array alone.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if aligning would exceed the data length.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use classweave::Parser;
    /// let data = [0xAA, 0x00, 0x00, 0x00, 0x07];
    /// let mut parser = Parser::new(&data);
    ///
    /// parser.read_be::<u8>()?;
    /// parser.align(4)?;
    /// assert_eq!(parser.read_be::<u8>()?, 0x07);
    /// # Ok::<(), classweave::Error>(())
    /// ```
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = (alignment - (self.position % alignment)) % alignment;
        self.advance_by(padding)
    }

    /// Read a type `T` from the current position in big-endian format and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_be<T: ClassIO>(&mut self) -> Result<T> {
        read_be_at::<T>(self.data, &mut self.position)
    }

    /// Reads a slice of `length` bytes and advances past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading `length` bytes would exceed the data.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.position.checked_add(length).ok_or(OutOfBounds)?;
        if end > self.data.len() {
            return Err(OutOfBounds);
        }

        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Reads a `u16` count followed by that many items produced by `read_item`.
    ///
    /// This is the shape of nearly every table in a class file (interfaces, fields,
    /// methods, attributes, exception tables).
    ///
    /// # Errors
    /// Propagates any error from reading the count or an item.
    pub fn read_table<T, F>(&mut self, mut read_item: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        let count = self.read_be::<u16>()?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(read_item(self)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_sequence() {
        let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_be::<u32>().unwrap(), 0xCAFEBABE);
        assert_eq!(parser.read_be::<u16>().unwrap(), 0);
        assert_eq!(parser.read_be::<u16>().unwrap(), 52);
        assert!(!parser.has_more_data());
        assert!(parser.read_be::<u8>().is_err());
    }

    #[test]
    fn advance_to_end_is_allowed() {
        let data = [0x01, 0x02];
        let mut parser = Parser::new(&data);
        assert!(parser.advance_by(2).is_ok());
        assert!(parser.advance_by(1).is_err());
        assert!(parser.read_be::<u8>().is_err());
    }

    #[test]
    fn align_relative_to_start() {
        let data = [0xAA, 0x00, 0x00, 0x00, 0x01, 0x02];
        let mut parser = Parser::new(&data);
        parser.advance_by(1).unwrap();
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 4);

        // Already aligned: no movement
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 4);
    }

    #[test]
    fn read_bytes_bounds() {
        let data = [0x01, 0x02, 0x03];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_bytes(2).unwrap(), &[0x01, 0x02]);
        assert!(parser.read_bytes(2).is_err());
        assert_eq!(parser.pos(), 2);
    }

    #[test]
    fn read_table_of_u16() {
        let data = [0x00, 0x02, 0x00, 0x07, 0x00, 0x09];
        let mut parser = Parser::new(&data);
        let items = parser.read_table(|p| p.read_be::<u16>()).unwrap();
        assert_eq!(items, vec![7, 9]);
    }

    #[test]
    fn read_table_truncated() {
        let data = [0x00, 0x03, 0x00, 0x07];
        let mut parser = Parser::new(&data);
        assert!(parser.read_table(|p| p.read_be::<u16>()).is_err());
    }
}
