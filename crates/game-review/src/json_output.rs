//! JSON report of an analysis run.
//!
//! The report carries every analyzed game (per-ply records with both
//! evaluations, summaries and completion status) plus the evaluation cache
//! counters of the run.

use std::path::Path;

use chess_analysis::{AnalyzedGame, CacheStats};
use chrono::Utc;
use serde::Serialize;

#[derive(Serialize)]
struct ReportJson<'a> {
    /// Version of the tool that produced the report.
    generator: String,
    games: &'a [AnalyzedGame],
    cache: CacheStats,
    /// ISO 8601 timestamp when the file was created.
    created_at: String,
}

/// Writes the analyzed games and cache counters to a pretty-printed JSON file.
///
/// # Arguments
///
/// * `path` - The filesystem path where the JSON file should be written.
/// * `games` - Games in input order; partial and failed games are included
///   with their status.
/// * `cache` - Cache counters at the end of the run.
///
/// # Errors
///
/// Returns an `std::io::Error` if the file cannot be created or written to.
///
/// # File Format
///
/// ```json
/// {
///   "generator": "game-review 0.1.0",
///   "games": [
///     {
///       "info": { "id": "...", "white": "Alice", "black": "Bob", "result": "1-0" },
///       "plies": [{ "ply": 1, "uci": "e2e4", "san": "e4", "outcome": { "state": "analyzed" } }],
///       "summary": { "white": { "accuracy_percent": 91.2 }, "narrative": "..." },
///       "status": { "status": "completed" }
///     }
///   ],
///   "cache": { "hits": 12, "store_hits": 40, "coalesced": 0, "computed": 30, "failures": 0 },
///   "created_at": "2024-01-15T12:00:00Z"
/// }
/// ```
pub fn write_report<P: AsRef<Path>>(path: P, games: &[AnalyzedGame], cache: CacheStats) -> std::io::Result<()> {
    let report = ReportJson {
        generator: format!("game-review {}", env!("CARGO_PKG_VERSION")),
        games,
        cache,
        created_at: Utc::now().to_rfc3339(),
    };

    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, &report)?;
    Ok(())
}
