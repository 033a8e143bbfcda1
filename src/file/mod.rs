//! Low-level byte access for class file parsing and generation.
//!
//! # Key Components
//!
//! - [`crate::file::parser::Parser`] - Bounds-checked cursor used by every decoder
//! - [`crate::file::io`] - Big-endian read and write helpers
//!
//! Everything here works on plain byte slices. Loading code units from disk or from a jar
//! is the job of [`crate::dispatch`], which hands the bytes to the parsers in
//! [`crate::classfile`].

pub mod io;
pub mod parser;
