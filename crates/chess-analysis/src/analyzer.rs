//! Game analysis with move quality classification.
//!
//! [`GameAnalyzer`] replays a game through the rules capability, asks its
//! evaluator for one evaluation per position, classifies every ply and seals
//! the records into an [`AnalyzedGame`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::classifier::{classify, ClassifierConfig, MoveContext};
use crate::error::{AnalyzerError, EngineError, RulesError, StoreError};
use crate::evaluation::{Evaluation, PositionEvaluator, Score};
use crate::position::{AnalysisRequest, Position, SearchLimit};
use crate::quality::{
    AnalyzedGame, CompletionStatus, GameInfo, MoveQuality, PlyOutcome, PlyRecord,
};
use crate::rules::{Outcome, RulesEngine};
use crate::summary::{phase_of, SummaryConfig};

/// One move of the input game.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayedMove {
    /// The move in UCI notation (e.g., "e2e4").
    pub uci: String,
    /// Thinking time, when the source recorded clocks.
    pub time_spent: Option<Duration>,
    /// Clock remaining after the move.
    pub clock: Option<Duration>,
}

impl PlayedMove {
    pub fn new(uci: impl Into<String>) -> Self {
        Self { uci: uci.into(), time_spent: None, clock: None }
    }
}

/// A parsed game ready for analysis.
#[derive(Debug, Clone)]
pub struct GameInput {
    pub info: GameInfo,
    pub start: Position,
    pub moves: Vec<PlayedMove>,
}

impl GameInput {
    /// Game from the standard starting position, moves in UCI notation.
    pub fn from_uci(info: GameInfo, moves: &[&str]) -> Self {
        Self {
            info,
            start: Position::startpos(),
            moves: moves.iter().map(|m| PlayedMove::new(*m)).collect(),
        }
    }
}

/// Configuration for game analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Search limit for every position.
    pub limit: SearchLimit,
    /// Principal variations requested per position.
    pub lines: u32,
    /// Number of opening plies classified as book moves.
    pub opening_book_plies: usize,
    pub classifier: ClassifierConfig,
    pub summary: SummaryConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            limit: SearchLimit::Depth(11),
            lines: 3,
            opening_book_plies: 0,
            classifier: ClassifierConfig::default(),
            summary: SummaryConfig::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), AnalyzerError> {
        match self.limit {
            SearchLimit::Depth(0) | SearchLimit::MoveTime(0) => {
                return Err(AnalyzerError::InvalidConfig("search limit must be positive".to_string()));
            }
            _ => {}
        }
        if self.lines == 0 {
            return Err(AnalyzerError::InvalidConfig("at least one line must be requested".to_string()));
        }
        self.classifier.validate().map_err(AnalyzerError::InvalidConfig)
    }
}

/// Progress notifications, one stream per analyzer.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisEvent {
    Started { game: String, plies: usize },
    PlyAnalyzed { game: String, ply: usize, quality: MoveQuality, loss: i32 },
    PlySkipped { game: String, ply: usize, reason: String },
    Finished { game: String, status: CompletionStatus },
}

/// Write-only destination for finished games.
pub trait StatisticsSink: Send + Sync {
    fn record_game(&self, game: &AnalyzedGame) -> Result<(), StoreError>;
}

/// Board facts for one ply, computed before any engine work.
struct Replayed {
    before: Position,
    after: Position,
    san: String,
    legal_moves: usize,
    terminal: Option<Outcome>,
}

/// Analyzes chess games to classify move quality.
pub struct GameAnalyzer<E: ?Sized> {
    evaluator: Arc<E>,
    rules: Arc<dyn RulesEngine>,
    config: AnalysisConfig,
    sink: Option<Arc<dyn StatisticsSink>>,
    events: Option<UnboundedSender<AnalysisEvent>>,
}

impl<E: PositionEvaluator + ?Sized> GameAnalyzer<E> {
    /// Creates a new game analyzer.
    ///
    /// # Arguments
    ///
    /// * `evaluator` - Pool, cache or anything else that evaluates positions.
    /// * `rules` - Move legality and notation.
    /// * `config` - Analysis configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyzerError::InvalidConfig`] if the thresholds are inconsistent.
    pub fn new(
        evaluator: Arc<E>,
        rules: Arc<dyn RulesEngine>,
        config: AnalysisConfig,
    ) -> Result<Self, AnalyzerError> {
        config.validate()?;
        Ok(Self { evaluator, rules, config, sink: None, events: None })
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatisticsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<AnalysisEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn emit(&self, event: AnalysisEvent) {
        if let Some(events) = &self.events {
            // A consumer that went away only loses notifications.
            let _ = events.send(event);
        }
    }

    fn replay(&self, game: &GameInput) -> Result<Vec<Replayed>, AnalyzerError> {
        let invalid = |ply: usize, err: RulesError| {
            AnalyzerError::InvalidGame(format!("move {} of game '{}': {}", ply + 1, game.info.id, err))
        };

        let mut replayed = Vec::with_capacity(game.moves.len());
        let mut position = game.start.clone();
        for (ply, mv) in game.moves.iter().enumerate() {
            if self.rules.outcome(&position).map_err(|e| invalid(ply, e))?.is_some() {
                return Err(AnalyzerError::InvalidGame(format!(
                    "move {} of game '{}' played after the game ended",
                    ply + 1,
                    game.info.id
                )));
            }
            let after = self.rules.apply(&position, &mv.uci).map_err(|e| invalid(ply, e))?;
            replayed.push(Replayed {
                san: self.rules.san(&position, &mv.uci).map_err(|e| invalid(ply, e))?,
                legal_moves: self.rules.legal_move_count(&position).map_err(|e| invalid(ply, e))?,
                terminal: self.rules.outcome(&after).map_err(|e| invalid(ply, e))?,
                before: std::mem::replace(&mut position, after.clone()),
                after,
            });
        }
        Ok(replayed)
    }

    async fn evaluate(&self, position: &Position) -> Result<Evaluation, EngineError> {
        let request = AnalysisRequest::new(position.clone(), self.config.limit, self.config.lines);
        self.evaluator.evaluate(request).await
    }

    /// Analyzes a complete chess game.
    ///
    /// Every move is validated before the first engine request. Each ply
    /// needs the evaluation before and after the move; the "after" of one ply
    /// is the "before" of the next, so a game of n plies costs n + 1 lookups.
    /// Checkmate and stalemate are scored without asking the engine.
    ///
    /// `cancel` is checked between plies. A cancelled game is returned as
    /// [`CompletionStatus::PartiallyCompleted`] with the plies finished so far.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyzerError::InvalidGame`] if a move cannot be played. Engine
    /// failures never fail the call: they are recorded on the ply, or end the
    /// game as [`CompletionStatus::Failed`] when the whole pool is unavailable.
    pub async fn analyze(&self, game: &GameInput, cancel: &AtomicBool) -> Result<AnalyzedGame, AnalyzerError> {
        let replayed = self.replay(game)?;
        let id = &game.info.id;
        info!(game = %id, plies = replayed.len(), "Analyzing game");
        self.emit(AnalysisEvent::Started { game: id.clone(), plies: replayed.len() });

        let mut records: Vec<PlyRecord> = Vec::with_capacity(replayed.len());
        let mut carried: Option<Evaluation> = None;
        let mut status = CompletionStatus::Completed;

        for (ply, (board, played)) in replayed.iter().zip(&game.moves).enumerate() {
            if cancel.load(Ordering::SeqCst) {
                info!(game = %id, ply, "Analysis cancelled");
                status = CompletionStatus::PartiallyCompleted("cancelled".to_string());
                break;
            }

            let evaluated = match carried.take() {
                Some(before) => Ok(before),
                None => self.evaluate(&board.before).await,
            };
            let evaluated = match (evaluated, board.terminal) {
                (Ok(before), Some(Outcome::Checkmate)) => Ok((before, Evaluation::terminal(Score::Mate(0)))),
                (Ok(before), Some(Outcome::Stalemate)) => Ok((before, Evaluation::terminal(Score::Centipawns(0)))),
                (Ok(before), None) => self.evaluate(&board.after).await.map(|after| (before, after)),
                (Err(e), _) => Err(e),
            };

            let outcome = match evaluated {
                Ok((before, after)) => {
                    let previous = records
                        .last()
                        .filter(|r| r.ply + 1 == ply)
                        .and_then(|r| r.verdict())
                        .map(|v| v.quality);
                    let verdict = classify(
                        &MoveContext {
                            before: &before,
                            after: &after,
                            played: &played.uci,
                            legal_moves: board.legal_moves,
                            book: ply < self.config.opening_book_plies,
                            previous,
                        },
                        &self.config.classifier,
                    );
                    debug!(game = %id, ply, mv = %played.uci, quality = verdict.quality.label(), loss = verdict.loss, "Classified move");
                    self.emit(AnalysisEvent::PlyAnalyzed {
                        game: id.clone(),
                        ply,
                        quality: verdict.quality,
                        loss: verdict.loss,
                    });
                    carried = Some(after.clone());
                    PlyOutcome::Analyzed { evaluation_before: before, evaluation_after: after, verdict }
                }
                Err(e) if e.is_pool_wide() => {
                    warn!(game = %id, ply, error = %e, "Engine pool unavailable, stopping game");
                    status = CompletionStatus::Failed(e.to_string());
                    break;
                }
                Err(e) => {
                    warn!(game = %id, ply, error = %e, "Ply left unanalyzed");
                    self.emit(AnalysisEvent::PlySkipped { game: id.clone(), ply, reason: e.to_string() });
                    PlyOutcome::Unanalyzed { reason: e.to_string() }
                }
            };

            records.push(PlyRecord {
                ply,
                uci: played.uci.clone(),
                san: board.san.clone(),
                mover: board.before.side_to_move(),
                position_before: board.before.clone(),
                position_after: board.after.clone(),
                phase: phase_of(&board.before, &self.config.summary),
                time_spent: played.time_spent,
                clock: played.clock,
                outcome,
            });
        }

        let remaining = game.moves[records.len()..].iter().map(|m| m.uci.clone()).collect();
        let analyzed = AnalyzedGame::seal(
            game.info.clone(),
            game.start.clone(),
            records,
            remaining,
            status,
            &self.config.summary,
        );
        info!(
            game = %id,
            status = analyzed.status().label(),
            white_accuracy = ?analyzed.summary().white.accuracy_percent,
            black_accuracy = ?analyzed.summary().black.accuracy_percent,
            "Game analyzed"
        );

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record_game(&analyzed) {
                warn!(game = %id, error = %e, "Failed to record game statistics");
            }
        }
        self.emit(AnalysisEvent::Finished { game: id.clone(), status: analyzed.status().clone() });
        Ok(analyzed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachedEvaluator, EvaluationCache};
    use crate::pool::{PoolConfig, WorkerPool};
    use crate::rules::StandardRules;
    use crate::test_support::{score_for, FakeEngine, FakeLauncher};
    use crate::worker::WorkerConfig;
    use futures_util::future::BoxFuture;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Evaluator answering from a fixed formula, with scripted failures.
    #[derive(Default)]
    struct Scripted {
        calls: AtomicUsize,
        failures: Mutex<HashMap<usize, EngineError>>,
        cancel_on: Option<(usize, Arc<AtomicBool>)>,
    }

    impl Scripted {
        fn fail_on(self, call: usize, error: EngineError) -> Self {
            self.failures.lock().unwrap().insert(call, error);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PositionEvaluator for Scripted {
        fn evaluate(&self, request: AnalysisRequest) -> BoxFuture<'_, Result<Evaluation, EngineError>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                if let Some((at, flag)) = &self.cancel_on {
                    if *at == call {
                        flag.store(true, Ordering::SeqCst);
                    }
                }
                if let Some(error) = self.failures.lock().unwrap().remove(&call) {
                    return Err(error);
                }
                Ok(Evaluation {
                    pv: vec!["e2e4".to_string(), "e7e5".to_string()],
                    depth: 12,
                    ..Evaluation::terminal(Score::Centipawns(score_for(request.position.key())))
                })
            })
        }
    }

    fn info(id: &str) -> GameInfo {
        GameInfo {
            id: id.to_string(),
            white: "Alice".to_string(),
            black: "Bob".to_string(),
            result: "*".to_string(),
            ..GameInfo::default()
        }
    }

    const SCHOLARS_MATE: [&str; 7] = ["e2e4", "e7e5", "d1h5", "b8c6", "f1c4", "g8f6", "h5f7"];

    /// 40 plies of knights going back and forth.
    fn knight_shuffle() -> GameInput {
        let moves: Vec<&str> = ["g1f3", "g8f6", "f3g1", "f6g8"].iter().copied().cycle().take(40).collect();
        GameInput::from_uci(info("shuffle"), &moves)
    }

    fn analyzer<E: PositionEvaluator + ?Sized>(evaluator: Arc<E>) -> GameAnalyzer<E> {
        let config = AnalysisConfig { limit: SearchLimit::Depth(4), lines: 1, ..AnalysisConfig::default() };
        GameAnalyzer::new(evaluator, Arc::new(StandardRules), config).unwrap()
    }

    #[tokio::test]
    async fn full_game_is_analyzed_and_mate_needs_no_engine() {
        let evaluator = Arc::new(Scripted::default());
        let game = GameInput::from_uci(info("scholar"), &SCHOLARS_MATE);
        let analyzed = analyzer(Arc::clone(&evaluator)).analyze(&game, &AtomicBool::new(false)).await.unwrap();

        assert_eq!(analyzed.status(), &CompletionStatus::Completed);
        assert_eq!(analyzed.plies().len(), 7);
        assert_eq!(analyzed.total_plies(), 7);
        // Start position plus six non-terminal positions.
        assert_eq!(evaluator.calls(), 7);

        let last = &analyzed.plies()[6];
        assert_eq!(last.san, "Qxf7#");
        let (_, after) = last.evaluations().unwrap();
        assert_eq!(after.score, Score::Mate(0));
        assert_eq!(last.verdict().unwrap().loss, 0);
        assert_eq!(analyzed.moves().collect::<Vec<_>>(), SCHOLARS_MATE);
        assert_eq!(analyzed.summary().analyzed_plies, 7);
    }

    #[tokio::test]
    async fn records_chain_and_cost_one_lookup_per_position() {
        let evaluator = Arc::new(Scripted::default());
        let analyzed = analyzer(Arc::clone(&evaluator))
            .analyze(&knight_shuffle(), &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(evaluator.calls(), 41);
        for pair in analyzed.plies().windows(2) {
            assert_eq!(pair[1].position_before, pair[0].position_after);
            assert_eq!(pair[1].evaluations().unwrap().0, pair[0].evaluations().unwrap().1);
            assert_ne!(pair[1].mover, pair[0].mover);
        }
    }

    #[tokio::test]
    async fn cancellation_keeps_finished_plies_and_stops_dispatching() {
        let flag = Arc::new(AtomicBool::new(false));
        // Call 11 evaluates the position after the tenth ply.
        let evaluator = Arc::new(Scripted { cancel_on: Some((11, Arc::clone(&flag))), ..Scripted::default() });
        let analyzed = analyzer(Arc::clone(&evaluator)).analyze(&knight_shuffle(), &flag).await.unwrap();

        assert_eq!(analyzed.status(), &CompletionStatus::PartiallyCompleted("cancelled".to_string()));
        assert_eq!(analyzed.plies().len(), 10);
        assert_eq!(analyzed.total_plies(), 40);
        assert_eq!(analyzed.remaining().len(), 30);
        assert_eq!(analyzed.remaining()[0], knight_shuffle().moves[10].uci);
        assert_eq!(evaluator.calls(), 11);
    }

    #[tokio::test]
    async fn pool_exhaustion_fails_the_game_but_keeps_the_prefix() {
        let evaluator = Arc::new(Scripted::default().fail_on(5, EngineError::PoolExhausted(Duration::from_secs(1))));
        let analyzed = analyzer(Arc::clone(&evaluator))
            .analyze(&knight_shuffle(), &AtomicBool::new(false))
            .await
            .unwrap();

        assert!(matches!(analyzed.status(), CompletionStatus::Failed(reason) if reason.contains("No engine worker")));
        assert_eq!(analyzed.plies().len(), 3);
        assert_eq!(analyzed.summary().analyzed_plies, 3);
        assert_eq!(evaluator.calls(), 5);
    }

    #[tokio::test]
    async fn single_evaluation_failure_is_local_to_its_ply() {
        let failure = EngineError::EvaluationFailed { worker: 0, reason: "crashed twice".to_string() };
        let evaluator = Arc::new(Scripted::default().fail_on(3, failure));
        let analyzed = analyzer(Arc::clone(&evaluator))
            .analyze(&knight_shuffle(), &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(analyzed.status(), &CompletionStatus::Completed);
        assert_eq!(analyzed.plies().len(), 40);
        assert!(analyzed.plies()[1].verdict().is_none());
        assert!(analyzed.plies()[2].verdict().is_some());
        assert_eq!(analyzed.summary().unanalyzed_plies, 1);
        // The next ply has to look its starting position up again.
        assert_eq!(evaluator.calls(), 42);
    }

    #[tokio::test]
    async fn illegal_move_is_rejected_before_engine_work() {
        let evaluator = Arc::new(Scripted::default());
        let game = GameInput::from_uci(info("bad"), &["e2e4", "e7e5", "e1e3"]);
        let err = analyzer(Arc::clone(&evaluator)).analyze(&game, &AtomicBool::new(false)).await.unwrap_err();

        assert!(matches!(err, AnalyzerError::InvalidGame(ref msg) if msg.contains("move 3")));
        assert_eq!(evaluator.calls(), 0);
    }

    #[tokio::test]
    async fn moves_after_mate_are_rejected() {
        let mut moves = SCHOLARS_MATE.to_vec();
        moves.push("e8f7");
        let game = GameInput::from_uci(info("late"), &moves);
        let err = analyzer(Arc::new(Scripted::default())).analyze(&game, &AtomicBool::new(false)).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidGame(_)));
    }

    #[tokio::test]
    async fn book_plies_are_forced() {
        let config = AnalysisConfig { opening_book_plies: 2, lines: 1, ..AnalysisConfig::default() };
        let analyzer = GameAnalyzer::new(Arc::new(Scripted::default()), Arc::new(StandardRules), config).unwrap();
        let game = GameInput::from_uci(info("book"), &SCHOLARS_MATE);
        let analyzed = analyzer.analyze(&game, &AtomicBool::new(false)).await.unwrap();

        let qualities: Vec<_> = analyzed.plies().iter().map(|p| p.verdict().unwrap().quality).collect();
        assert_eq!(&qualities[..2], &[MoveQuality::Forced, MoveQuality::Forced]);
        assert!(qualities[2..].iter().all(|q| *q != MoveQuality::Forced));
    }

    #[tokio::test]
    async fn invalid_thresholds_are_rejected_at_construction() {
        let config = AnalysisConfig {
            classifier: ClassifierConfig { good_max_loss: 5, ..ClassifierConfig::default() },
            ..AnalysisConfig::default()
        };
        let result = GameAnalyzer::new(Arc::new(Scripted::default()), Arc::new(StandardRules), config);
        assert!(matches!(result, Err(AnalyzerError::InvalidConfig(_))));
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<String>>);

    impl StatisticsSink for RecordingSink {
        fn record_game(&self, game: &AnalyzedGame) -> Result<(), StoreError> {
            self.0.lock().unwrap().push(game.info().id.clone());
            Ok(())
        }
    }

    struct BrokenSink;

    impl StatisticsSink for BrokenSink {
        fn record_game(&self, _game: &AnalyzedGame) -> Result<(), StoreError> {
            Err(StoreError("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn events_and_sink_see_the_finished_game() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = Arc::new(RecordingSink::default());
        let game = GameInput::from_uci(info("events"), &SCHOLARS_MATE);
        analyzer(Arc::new(Scripted::default()))
            .with_events(tx)
            .with_sink(sink.clone())
            .analyze(&game, &AtomicBool::new(false))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 9);
        assert_eq!(events[0], AnalysisEvent::Started { game: "events".to_string(), plies: 7 });
        assert!(matches!(events[3], AnalysisEvent::PlyAnalyzed { ply: 2, .. }));
        assert_eq!(
            events[8],
            AnalysisEvent::Finished { game: "events".to_string(), status: CompletionStatus::Completed }
        );
        assert_eq!(*sink.0.lock().unwrap(), vec!["events".to_string()]);
    }

    #[tokio::test]
    async fn sink_failure_does_not_fail_the_analysis() {
        let game = GameInput::from_uci(info("sink"), &SCHOLARS_MATE);
        let analyzed = analyzer(Arc::new(Scripted::default()))
            .with_sink(Arc::new(BrokenSink))
            .analyze(&game, &AtomicBool::new(false))
            .await
            .unwrap();
        assert!(analyzed.status().is_complete());
    }

    #[tokio::test]
    async fn repeated_positions_and_games_hit_the_cache() {
        let engine = FakeEngine::new();
        let pool_config = PoolConfig {
            size: 2,
            acquire_timeout: Duration::from_secs(5),
            probe_interval: Duration::from_millis(50),
            worker: WorkerConfig {
                handshake_timeout: Duration::from_secs(1),
                request_timeout: Duration::from_secs(2),
                ..WorkerConfig::default()
            },
        };
        let pool = WorkerPool::start(FakeLauncher(Arc::clone(&engine)), pool_config).await.unwrap();
        let cached = Arc::new(CachedEvaluator::new(EvaluationCache::new(), Arc::new(pool.clone())));
        let analyzer = analyzer(Arc::clone(&cached));

        let first = analyzer.analyze(&knight_shuffle(), &AtomicBool::new(false)).await.unwrap();
        // The shuffle only ever visits four distinct positions.
        assert_eq!(engine.searches(), 4);

        let second = analyzer.analyze(&knight_shuffle(), &AtomicBool::new(false)).await.unwrap();
        assert_eq!(engine.searches(), 4);
        assert_eq!(cached.cache().stats().computed, 4);

        let verdicts = |g: &AnalyzedGame| g.plies().iter().map(|p| *p.verdict().unwrap()).collect::<Vec<_>>();
        assert_eq!(verdicts(&first), verdicts(&second));
        pool.shutdown().await;
    }
}
