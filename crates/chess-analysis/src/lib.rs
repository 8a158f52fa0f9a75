//! Chess game analysis driven by a pool of UCI engines.
//!
//! Games are replayed through a [`RulesEngine`], each position is evaluated
//! by a [`PositionEvaluator`] (usually an [`EvaluationCache`] in front of a
//! [`WorkerPool`]), every move is classified and the results are sealed into
//! an [`AnalyzedGame`].
//!
//! # Overview
//!
//! - [`ProtocolChannel`] - Line-oriented UCI session with one engine process
//! - [`EngineWorker`] - One engine process with crash recovery
//! - [`WorkerPool`] - Fixed set of workers serving requests in arrival order
//! - [`EvaluationCache`] - Coalescing cache keyed by position, limit and lines
//! - [`classify`] - Move quality from a pair of evaluations
//! - [`GameAnalyzer`] - Analyzes complete games
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use chess_analysis::*;
//!
//! let pool = WorkerPool::start(ProcessLauncher::new("stockfish"), PoolConfig::default()).await?;
//! let evaluator = Arc::new(CachedEvaluator::new(EvaluationCache::new(), Arc::new(pool)));
//! let analyzer = GameAnalyzer::new(evaluator, Arc::new(StandardRules), AnalysisConfig::default())?;
//! let game = GameInput::from_uci(GameInfo::default(), &["e2e4", "e7e5", "g1f3"]);
//! let analyzed = analyzer.analyze(&game, &AtomicBool::new(false)).await?;
//! if let Some(accuracy) = analyzed.summary().white.accuracy_percent {
//!     println!("White accuracy: {:.1}%", accuracy);
//! }
//! ```

pub mod analyzer;
pub mod cache;
pub mod channel;
pub mod classifier;
pub mod error;
pub mod evaluation;
pub mod pool;
pub mod position;
pub mod quality;
pub mod rules;
pub mod summary;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use analyzer::{AnalysisConfig, AnalysisEvent, GameAnalyzer, GameInput, PlayedMove, StatisticsSink};
pub use cache::{CacheStats, CachedEvaluator, EvaluationCache, EvaluationStore, MemoryStore};
pub use channel::{EngineIdentity, EngineIo, EngineLauncher, EngineProcess, ProcessLauncher, ProtocolChannel};
pub use classifier::{classify, ClassifierConfig, MoveContext};
pub use error::{AnalyzerError, ChannelError, EngineError, RulesError, StoreError};
pub use evaluation::{Evaluation, PositionEvaluator, PvLine, Score};
pub use pool::{PoolConfig, WorkerPool};
pub use position::{AnalysisRequest, Position, SearchLimit, Side, START_FEN};
pub use quality::{
    AnalyzedGame, ClassificationVerdict, CompletionStatus, GameInfo, GamePhase, MoveQuality, PlyOutcome,
    PlyRecord, VerdictFlags,
};
pub use rules::{Outcome, RulesEngine, StandardRules};
pub use summary::{accuracy, phase_of, summarize, Archetype, GameSummary, PlayerStats, SummaryConfig};
pub use worker::{EngineWorker, WorkerConfig, WorkerStatus};
