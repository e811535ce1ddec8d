//! # prose-core
//!
//! Markup-aware grammar checking: the pieces that turn a LaTeX, Markdown, reStructuredText,
//! Org or program source buffer into natural-language text an analysis engine can check,
//! and map the engine's findings back onto the buffer.
//!
//! Layout
//!
//!     annotated   plain-text projection of a source plus the offset mapping between them
//!     building    one markup builder per dialect, producing annotated text
//!     dialect     dialect ids from file extensions
//!     dummy       placeholder words for markup that reads as a noun
//!     fragment    splitting a document where inline directives or languages change
//!     document    open buffers, position conversion, edit application, caret tracking
//!     checking    the pipeline: fragmentize, build, check, remap, filter, cache
//!     engine      analysis engines (HTTP server, local speller)
//!     settings    immutable checking settings with `with_*` updates
//!     error       error types shared by the layers above
//!
//!     Offsets are byte offsets into Rust strings throughout. Conversion to editor
//!     positions (UTF-16 columns) lives in [`document`].

#![allow(rustdoc::invalid_html_tags)]

pub mod annotated;
pub mod building;
pub mod checking;
pub mod dialect;
pub mod document;
pub mod dummy;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod settings;

pub use annotated::{AnnotatedText, AnnotatedTextBuilder};
pub use checking::{
    CancellationCounter, CancellationToken, CheckRequest, CheckResult, DocumentChecker, RuleMatch,
};
pub use document::{Document, Position, TextChange};
pub use settings::Settings;
