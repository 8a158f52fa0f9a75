//! Offline evaluator and fixtures for tests that need analyzed games.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chess_analysis::{
    AnalysisConfig, AnalysisRequest, AnalyzedGame, EngineError, Evaluation, GameAnalyzer, GameInfo, GameInput,
    PlayedMove, Position, PositionEvaluator, RulesEngine, Score, SearchLimit, StandardRules,
};
use futures_util::future::BoxFuture;

/// Scores positions from a table keyed by position key; unknown positions are level.
#[derive(Default)]
pub struct TableEvaluator {
    scores: HashMap<String, i32>,
}

impl TableEvaluator {
    /// Score (for the side to move) of the position reached after `moves`.
    pub fn with(mut self, moves: &[&str], cp: i32) -> Self {
        let rules = StandardRules;
        let position = moves
            .iter()
            .try_fold(Position::startpos(), |pos, mv| rules.apply(&pos, mv))
            .expect("legal test moves");
        self.scores.insert(position.key().to_string(), cp);
        self
    }
}

impl PositionEvaluator for TableEvaluator {
    fn evaluate(&self, request: AnalysisRequest) -> BoxFuture<'_, Result<Evaluation, EngineError>> {
        let cp = self.scores.get(request.position.key()).copied().unwrap_or(0);
        Box::pin(async move { Ok(Evaluation { depth: 8, ..Evaluation::terminal(Score::Centipawns(cp)) }) })
    }
}

pub fn info(id: &str) -> GameInfo {
    GameInfo {
        id: id.to_string(),
        white: "Alice".to_string(),
        black: "Bob".to_string(),
        result: "1-0".to_string(),
        opening: Some("Italian Game".to_string()),
        eco: Some("C50".to_string()),
        date: Some("2024.03.01".to_string()),
    }
}

pub const ITALIAN: [&str; 6] = ["e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "g8f6"];

/// Italian game where Black's ...Nf6 drops 250 centipawns, with clocks.
pub fn italian(id: &str) -> GameInput {
    let clocks = [178, 179, 170, 120, 150, 45];
    let moves = ITALIAN
        .iter()
        .zip(clocks)
        .map(|(uci, secs)| PlayedMove {
            clock: Some(Duration::from_secs(secs)),
            time_spent: Some(Duration::from_secs(2)),
            ..PlayedMove::new(*uci)
        })
        .collect();
    GameInput { info: info(id), start: Position::startpos(), moves }
}

pub fn italian_evaluator() -> TableEvaluator {
    TableEvaluator::default().with(&ITALIAN, 250)
}

pub async fn analyze(evaluator: TableEvaluator, game: &GameInput) -> AnalyzedGame {
    let config = AnalysisConfig { limit: SearchLimit::Depth(8), lines: 1, ..AnalysisConfig::default() };
    let rules: Arc<dyn RulesEngine> = Arc::new(StandardRules);
    GameAnalyzer::new(Arc::new(evaluator), rules, config)
        .expect("valid config")
        .analyze(game, &AtomicBool::new(false))
        .await
        .expect("analysis succeeds")
}
