//! Language Server Protocol (LSP) implementation for prose checking
//!
//!     The server checks the natural-language content of LaTeX, Markdown, reStructuredText,
//!     Org, BibTeX and program comment text, and reports grammar and spelling findings as
//!     diagnostics with quick fixes.
//!
//! Architecture
//!
//!     LSP Layer (tower-lsp):
//!         - JSON-RPC transport, capability negotiation, request routing
//!
//!     Server Layer ([`server`]):
//!         - Implements the LanguageServer trait
//!         - Owns the per-document cancellation counters
//!         - Turns every notification and request into a job for the worker
//!
//!     Worker (`worker`):
//!         - Owns the open documents and applies jobs one at a time, in arrival order
//!         - Runs checks on the blocking pool and publishes diagnostics
//!
//!     Feature Layer ([`features`]):
//!         - Stateless conversions: matches to diagnostics, code actions, command payloads
//!         - All logic and dense unit tests
//!
//! Settings
//!
//!     Settings come from three layers, later ones winning: built-in defaults, an optional
//!     TOML file passed with `--config`, and the client's `prose` section (pulled through
//!     `workspace/configuration`, or taken from `didChangeConfiguration`).
//!
//! Usage
//!
//!     $ prose-lsp [--config prose.toml] [--log-level debug]
//!     Starts the language server on stdin/stdout. Logs go to stderr.

pub mod features;
pub mod server;
mod worker;

pub use server::{DefaultEngineProvider, EngineProvider, LspClient, ProseLanguageServer};
