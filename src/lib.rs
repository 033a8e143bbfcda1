// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![deny(unsafe_code)]

//! # classweave
//!
//! Incremental JVM bytecode instrumentation for build pipelines.
//!
//! `classweave` takes the compiled classes of a build (jars and class directories), weaves
//! caller-supplied hooks into every selected method and writes the result to an output area.
//! Each instrumented method:
//!
//! - runs the **enter** hook once, before its original first instruction
//! - runs the **return** hook immediately before every return instruction
//! - runs the **error** hook on every exceptional exit, then rethrows the same exception
//!
//! The error hook is implemented as a catch-all handler around the whole original body, so
//! exactly one of return or error fires per invocation. Incremental builds only reprocess
//! what changed: unchanged inputs are copied through and removed inputs have their outputs
//! deleted.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use classweave::prelude::*;
//!
//! let chain = HookChain::new().with(CallbackHook::new("com/example/Trace"))?;
//! let dispatcher = Dispatcher::new(OutputLayout::new("build/instrumented"), chain);
//!
//! let inputs: Vec<InputSource> = vec![
//!     ArchiveInput::new("libs/okio.jar", ChangeStatus::AddedOrChanged).into(),
//!     DirectoryInput::new("build/classes").into(),
//! ];
//! let report = dispatcher.run(&inputs, BuildMode::Full)?;
//! println!("{}", report);
//! # Ok::<(), classweave::Error>(())
//! ```
//!
//! ### Rewriting a single class
//!
//! ```rust,no_run
//! use classweave::weave::{CallbackHook, CodeUnitRewriter, DefaultSelector, HookChain, UnitOutcome};
//!
//! let chain = HookChain::new().with(CallbackHook::new("com/example/Trace"))?;
//! let rewriter = CodeUnitRewriter::new(&chain, &DefaultSelector);
//!
//! let bytes = std::fs::read("Foo.class")?;
//! if let UnitOutcome::Rewritten { bytes, methods, .. } = rewriter.rewrite(&bytes)? {
//!     println!("{} methods instrumented", methods);
//!     std::fs::write("Foo.class", bytes)?;
//! }
//! # Ok::<(), classweave::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`classfile`] - Class file parsing and encoding (constant pool, attributes, frames)
//! - [`assembly`] - Instruction decoding and label-based encoding
//! - [`method`] - Editable, label-based method bodies
//! - [`weave`] - Hook policies and the method and class rewriters
//! - [`dispatch`] - Change-set driven processing of jars and directories
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Logging
//!
//! The crate logs through the [`log`](https://docs.rs/log) facade and never installs a
//! logger. Runs are summarised at `info`, per-input decisions at `debug`, and per-method
//! details at `trace`. Signed jars produce a `warn`.
//!
//! ## Error Handling
//!
//! Every failure is fatal for the run. Errors name the class (and method) they occurred in:
//!
//! ```rust,no_run
//! use classweave::{prelude::*, Error};
//!
//! let chain = HookChain::new().with(CallbackHook::new("com/example/Trace"))?;
//! let dispatcher = Dispatcher::new(OutputLayout::new("out"), chain);
//! match dispatcher.run(&[DirectoryInput::new("classes").into()], BuildMode::Full) {
//!     Ok(report) => println!("{}", report),
//!     Err(Error::Unit { unit, source }) => println!("{} failed: {}", unit, source),
//!     Err(e) => println!("Error: {}", e),
//! }
//! # Ok::<(), classweave::Error>(())
//! ```
//!
//! ## Fuzzing
//!
//! ```bash
//! cargo +nightly fuzz run classfile --release
//! cargo +nightly fuzz run rewrite --release
//! ```

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use classweave::prelude::*;
///
/// let chain = HookChain::new().with(CallbackHook::new("com/example/Trace"))?;
/// let rewriter = CodeUnitRewriter::new(&chain, &DefaultSelector);
/// # Ok::<(), classweave::Error>(())
/// ```
pub mod prelude;

/// JVM class file model (JVMS §4)
pub mod classfile;

/// JVM instruction decoding and encoding
///
/// Instructions decode to absolute offsets and encode from symbolic
/// [`assembly::Label`]s; the encoder picks branch widths and resolves every label.
///
/// # Examples
///
/// ```rust
/// use classweave::assembly::decode_stream;
///
/// // iload_0; iload_1; iadd; ireturn
/// let code = decode_stream(&[0x1A, 0x1B, 0x60, 0xAC])?;
/// assert_eq!(code.len(), 4);
/// assert_eq!(code[2].1.mnemonic(), "iadd");
/// # Ok::<(), classweave::Error>(())
/// ```
pub mod assembly;

/// Label-based method bodies
pub mod method;

/// Hook policies, the hook chain and the method and class rewriters
pub mod weave;

/// Incremental dispatch of jars and class directories
pub mod dispatch;

/// `classweave` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `classweave` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// Parsed class file, see [`classfile::ClassFile`].
pub use classfile::ClassFile;

/// Bounds-checked big-endian cursor used by all decoders.
pub use file::parser::Parser;
