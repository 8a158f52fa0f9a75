//! SQLite storage for engine evaluations and game statistics.
//!
//! Two stores share one database file: [`SqliteEvaluationStore`] is the
//! durable layer behind the evaluation cache, and [`SqliteStatisticsStore`]
//! receives every analyzed game.

use std::fmt::Display;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chess_analysis::{
    AnalysisRequest, AnalyzedGame, CompletionStatus, Evaluation, EvaluationStore, GamePhase, MoveQuality,
    StatisticsSink, StoreError,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use serde::Serialize;

/// Remaining clock below which a move counts as played in time trouble.
const TIME_TROUBLE: Duration = Duration::from_secs(60);

fn store_error(err: impl Display) -> StoreError {
    StoreError(err.to_string())
}

fn open_connection(path: &Path) -> SqliteResult<Connection> {
    let conn = Connection::open(path)?;
    // In-memory databases answer "memory" here.
    let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/// Evaluations keyed by (position key, search limit, line count).
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(SqliteEvaluationStore::open("data/game-review.db")?);
/// let cache = EvaluationCache::with_store(store.clone());
/// // ... analyze ...
/// store.prune(200_000)?;
/// ```
pub struct SqliteEvaluationStore {
    conn: Mutex<Connection>,
}

impl SqliteEvaluationStore {
    /// Opens or creates the database at `path` and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or if schema
    /// initialization fails.
    pub fn open<P: AsRef<Path>>(path: P) -> SqliteResult<Self> {
        let conn = open_connection(path.as_ref())?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS evaluations (
                position_key TEXT NOT NULL,
                search_limit TEXT NOT NULL,
                lines INTEGER NOT NULL,
                evaluation TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (position_key, search_limit, lines)
            );
            ",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> SqliteResult<usize> {
        let count: i64 = self.conn().query_row("SELECT COUNT(*) FROM evaluations", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> SqliteResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Deletes all but the `max_entries` most recently written evaluations.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self, max_entries: usize) -> SqliteResult<usize> {
        let keep = i64::try_from(max_entries).unwrap_or(i64::MAX);
        self.conn().execute(
            "DELETE FROM evaluations WHERE rowid NOT IN (
                SELECT rowid FROM evaluations ORDER BY created_at DESC, rowid DESC LIMIT ?1
            )",
            [keep],
        )
    }
}

impl EvaluationStore for SqliteEvaluationStore {
    fn load(&self, request: &AnalysisRequest) -> Result<Option<Evaluation>, StoreError> {
        let json: Option<String> = self
            .conn()
            .query_row(
                "SELECT evaluation FROM evaluations
                 WHERE position_key = ?1 AND search_limit = ?2 AND lines = ?3",
                params![request.position.key(), request.limit.to_string(), request.lines],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_error)?;
        json.map(|json| serde_json::from_str(&json).map_err(store_error)).transpose()
    }

    fn save(&self, request: &AnalysisRequest, evaluation: &Evaluation) -> Result<(), StoreError> {
        let json = serde_json::to_string(evaluation).map_err(store_error)?;
        self.conn()
            .execute(
                "INSERT INTO evaluations (position_key, search_limit, lines, evaluation, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (position_key, search_limit, lines) DO NOTHING",
                params![
                    request.position.key(),
                    request.limit.to_string(),
                    request.lines,
                    json,
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(store_error)?;
        Ok(())
    }
}

/// Aggregated history of one opening position.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PositionStats {
    pub position_key: String,
    /// Analyzed moves played from this position
    pub occurrences: u32,
    pub average_loss: f64,
    pub brilliant: u32,
    pub great: u32,
    pub good: u32,
    pub inaccuracies: u32,
    pub mistakes: u32,
    pub blunders: u32,
    pub forced: u32,
    pub total_time_spent_ms: u64,
    /// Moves made with less than a minute on the clock
    pub time_trouble: u32,
}

fn quality_column(quality: MoveQuality) -> &'static str {
    match quality {
        MoveQuality::Brilliant => "brilliant",
        MoveQuality::Great => "great",
        MoveQuality::Good => "good",
        MoveQuality::Inaccuracy => "inaccuracies",
        MoveQuality::Mistake => "mistakes",
        MoveQuality::Blunder => "blunders",
        MoveQuality::Forced => "forced",
    }
}

/// Per-game aggregates and per-position opening statistics.
pub struct SqliteStatisticsStore {
    conn: Mutex<Connection>,
}

impl SqliteStatisticsStore {
    /// Opens or creates the database at `path` and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or if schema
    /// initialization fails.
    pub fn open<P: AsRef<Path>>(path: P) -> SqliteResult<Self> {
        let conn = open_connection(path.as_ref())?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> SqliteResult<()> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS games (
                id TEXT PRIMARY KEY,
                white TEXT NOT NULL,
                black TEXT NOT NULL,
                result TEXT NOT NULL,
                status TEXT NOT NULL,
                status_reason TEXT,
                white_accuracy REAL,
                black_accuracy REAL,
                white_acpl REAL,
                black_acpl REAL,
                eval_volatility REAL NOT NULL,
                archetype TEXT NOT NULL,
                narrative TEXT NOT NULL,
                analyzed_plies INTEGER NOT NULL,
                total_plies INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS game_positions (
                game_id TEXT NOT NULL,
                ply INTEGER NOT NULL,
                PRIMARY KEY (game_id, ply)
            );

            CREATE TABLE IF NOT EXISTS position_stats (
                position_key TEXT PRIMARY KEY,
                occurrences INTEGER NOT NULL DEFAULT 0,
                average_loss REAL NOT NULL DEFAULT 0,
                brilliant INTEGER NOT NULL DEFAULT 0,
                great INTEGER NOT NULL DEFAULT 0,
                good INTEGER NOT NULL DEFAULT 0,
                inaccuracies INTEGER NOT NULL DEFAULT 0,
                mistakes INTEGER NOT NULL DEFAULT 0,
                blunders INTEGER NOT NULL DEFAULT 0,
                forced INTEGER NOT NULL DEFAULT 0,
                total_time_spent_ms INTEGER NOT NULL DEFAULT 0,
                time_trouble INTEGER NOT NULL DEFAULT 0
            );
            ",
        )
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Saves a game's aggregates and folds its opening plies into the
    /// position statistics.
    ///
    /// Plies already recorded for this game id are skipped, so storing a
    /// game twice updates the game row without double counting positions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; nothing is written
    /// in that case.
    pub fn save_game(&self, game: &AnalyzedGame) -> SqliteResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let info = game.info();
        let summary = game.summary();
        let reason = match game.status() {
            CompletionStatus::Completed => None,
            CompletionStatus::PartiallyCompleted(reason) | CompletionStatus::Failed(reason) => Some(reason.as_str()),
        };
        let archetype = serde_json::to_value(summary.archetype)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        tx.execute(
            "INSERT INTO games (id, white, black, result, status, status_reason, white_accuracy,
                black_accuracy, white_acpl, black_acpl, eval_volatility, archetype, narrative,
                analyzed_plies, total_plies, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(id) DO UPDATE SET
                white = excluded.white,
                black = excluded.black,
                result = excluded.result,
                status = excluded.status,
                status_reason = excluded.status_reason,
                white_accuracy = excluded.white_accuracy,
                black_accuracy = excluded.black_accuracy,
                white_acpl = excluded.white_acpl,
                black_acpl = excluded.black_acpl,
                eval_volatility = excluded.eval_volatility,
                archetype = excluded.archetype,
                narrative = excluded.narrative,
                analyzed_plies = excluded.analyzed_plies,
                total_plies = excluded.total_plies,
                recorded_at = excluded.recorded_at",
            params![
                info.id,
                info.white,
                info.black,
                info.result,
                game.status().label(),
                reason,
                summary.white.accuracy_percent,
                summary.black.accuracy_percent,
                summary.white.avg_cp_loss,
                summary.black.avg_cp_loss,
                summary.eval_volatility,
                archetype,
                summary.narrative,
                summary.analyzed_plies as i64,
                game.total_plies() as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;

        for record in game.plies().iter().filter(|r| r.phase == GamePhase::Opening) {
            let Some(verdict) = record.verdict() else {
                continue;
            };
            let fresh = tx.execute(
                "INSERT OR IGNORE INTO game_positions (game_id, ply) VALUES (?1, ?2)",
                params![info.id, record.ply as i64],
            )?;
            if fresh == 0 {
                continue;
            }
            let spent = record.time_spent.map_or(0, |d| d.as_millis() as i64);
            let trouble = i64::from(record.clock.is_some_and(|c| c < TIME_TROUBLE));
            let column = quality_column(verdict.quality);
            tx.execute(
                &format!(
                    "INSERT INTO position_stats (position_key, occurrences, average_loss, {column},
                        total_time_spent_ms, time_trouble)
                     VALUES (?1, 1, ?2, 1, ?3, ?4)
                     ON CONFLICT(position_key) DO UPDATE SET
                        average_loss = (average_loss * occurrences + excluded.average_loss) / (occurrences + 1),
                        occurrences = occurrences + 1,
                        {column} = {column} + 1,
                        total_time_spent_ms = total_time_spent_ms + excluded.total_time_spent_ms,
                        time_trouble = time_trouble + excluded.time_trouble"
                ),
                params![record.position_before.key(), f64::from(verdict.loss), spent, trouble],
            )?;
        }

        tx.commit()
    }

    /// Statistics for the position with the given key, if it was ever recorded.
    pub fn position_stats(&self, position_key: &str) -> SqliteResult<Option<PositionStats>> {
        self.conn()
            .query_row(
                "SELECT occurrences, average_loss, brilliant, great, good, inaccuracies, mistakes,
                    blunders, forced, total_time_spent_ms, time_trouble
                 FROM position_stats WHERE position_key = ?1",
                [position_key],
                |row| {
                    Ok(PositionStats {
                        position_key: position_key.to_string(),
                        occurrences: row.get(0)?,
                        average_loss: row.get(1)?,
                        brilliant: row.get(2)?,
                        great: row.get(3)?,
                        good: row.get(4)?,
                        inaccuracies: row.get(5)?,
                        mistakes: row.get(6)?,
                        blunders: row.get(7)?,
                        forced: row.get(8)?,
                        total_time_spent_ms: row.get::<_, i64>(9)? as u64,
                        time_trouble: row.get(10)?,
                    })
                },
            )
            .optional()
    }
}

impl StatisticsSink for SqliteStatisticsStore {
    fn record_game(&self, game: &AnalyzedGame) -> Result<(), StoreError> {
        self.save_game(game).map_err(store_error)
    }
}
