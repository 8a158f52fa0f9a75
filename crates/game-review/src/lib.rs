//! Game Review - annotate chess games with engine analysis.
//!
//! This crate wires the `chess-analysis` pipeline to files: PGN in,
//! annotated PGN and JSON reports out, with evaluations and opening
//! statistics kept in SQLite between runs.
//!
//! # Modules
//!
//! - [`config`] - `game-review.toml` loading and validation
//! - [`pgn`] - PGN reading and annotated writing
//! - [`storage`] - SQLite evaluation store and statistics store
//! - [`json_output`] - JSON report generation
//! - [`review`] - Batch analysis of parsed games

pub mod config;
pub mod json_output;
pub mod pgn;
pub mod review;
pub mod storage;

#[cfg(test)]
mod test_support;
