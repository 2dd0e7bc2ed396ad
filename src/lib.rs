//! `DecorLedger` - the data core for a decoration/event business app
//!
//! This crate provides the inventory, design-canvas, and finance data layer:
//! a SQLite relational store with versioned migrations, a blob store for
//! image files, and the backup engine that exports/imports the whole state
//! as a portable archive while a garbage collector keeps database rows and
//! filesystem blobs from drifting apart.

// Deny the most critical lints that could lead to bugs or security issues
#![deny(
    // Security and correctness
    unsafe_code,
    unsafe_op_in_unsafe_fn,

    // Code quality - things that are almost always bugs
    unreachable_code,
    unreachable_patterns,
    unused_must_use,

    // Documentation - broken links are bugs
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links,
)]
// Warn on things that should be fixed but aren't necessarily bugs
#![warn(
    missing_docs,

    // Clippy categories for overall code quality
    clippy::all,
    clippy::pedantic,

    // Correctness
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::exit,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used,

    // Future compatibility
    future_incompatible,
    rust_2018_idioms,
)]
// Allow some pedantic lints that are too noisy or not applicable
#![allow(
    clippy::module_name_repetitions,  // Common pattern in Rust
    clippy::missing_errors_doc,        // Will add gradually
    clippy::missing_panics_doc,        // Will add gradually
)]

/// Backup archive container (tar.gz pack/unpack)
pub mod archive;
/// Image blob store - copy-in, best-effort deletion, orphan collection
pub mod blobs;
/// Configuration for database, image, and backup locations
pub mod config;
/// SQLite relational store - per-entity CRUD and versioned migrations
pub mod db;
/// Unified error types and result handling
pub mod errors;
/// Record id and blob filename generation
pub mod ids;
/// Entity models and typed payloads shared across the store and backups
pub mod models;
/// Backup exporter/importer and the blob garbage collector
pub mod services;
