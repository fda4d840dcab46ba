//! Pipeline stages of a single conversion.
//!
//! Each submodule implements exactly one step of the lifecycle driven by
//! [`crate::process::Conversion`]. The stages are free functions over the
//! [`crate::api::ConversionApi`] seam so each can be tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! create ──▶ upload ──▶ poll ──▶ download
//! (process)  (multipart) (status)  (result file)
//! ```
//!
//! 1. [`upload`]: stream the source file into a multipart body through a
//!    bounded producer/consumer pipe
//! 2. [`poll`]: fetch status until `finished` or `error`, sleeping an
//!    interval estimated from the reported progress
//! 3. [`download`]: resolve the result URL and stream it to the destination
//!    with an atomic rename

pub mod download;
pub mod poll;
pub mod upload;
