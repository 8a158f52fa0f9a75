//! Batch orchestration: PGN text in, analyzed games out.

use std::sync::atomic::AtomicBool;

use chess_analysis::{
    AnalysisEvent, AnalyzedGame, AnalyzerError, GameAnalyzer, GameInput, PositionEvaluator, RulesEngine,
};
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pgn::{self, PgnError};

/// Parses every game in `text` and converts it to pipeline input.
///
/// Games that cannot be replayed are logged and left out; only a PGN
/// syntax error fails the whole batch.
///
/// # Errors
///
/// Returns [`PgnError::Syntax`] if the text is not well-formed PGN.
pub fn load_games(text: &str, rules: &dyn RulesEngine) -> Result<Vec<GameInput>, PgnError> {
    let mut inputs = Vec::new();
    for (index, game) in pgn::parse_pgn(text)?.iter().enumerate() {
        match pgn::to_game_input(game, rules) {
            Ok(input) => inputs.push(input),
            Err(err) => warn!(game = index + 1, error = %err, "Skipping game"),
        }
    }
    Ok(inputs)
}

/// Analyzes `games` with at most `concurrency` of them in flight.
///
/// Results come back in input order. Once `cancel` is set, running games
/// stop at their next ply and games not yet started return immediately as
/// partially completed.
pub async fn analyze_games<E>(
    analyzer: &GameAnalyzer<E>,
    games: &[GameInput],
    concurrency: usize,
    cancel: &AtomicBool,
) -> Vec<Result<AnalyzedGame, AnalyzerError>>
where
    E: PositionEvaluator + ?Sized,
{
    stream::iter(games.iter().map(|game| analyzer.analyze(game, cancel)))
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// Logs pipeline progress until every sender is dropped.
pub fn spawn_progress_logger(mut events: UnboundedReceiver<AnalysisEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                AnalysisEvent::Started { game, plies } => info!(game = %game, plies, "Analyzing game"),
                AnalysisEvent::PlyAnalyzed { game, ply, quality, loss } => {
                    debug!(game = %game, ply, quality = quality.label(), loss, "Ply classified")
                }
                AnalysisEvent::PlySkipped { game, ply, reason } => {
                    warn!(game = %game, ply, reason = %reason, "Ply not analyzed")
                }
                AnalysisEvent::Finished { game, status } => {
                    info!(game = %game, status = status.label(), "Game finished")
                }
            }
        }
    })
}

/// One-line summary of an analyzed game for the terminal.
pub fn describe(game: &AnalyzedGame) -> String {
    let info = game.info();
    let summary = game.summary();
    let mut line = format!(
        "{} vs {} ({}): accuracy {} / {}, ACPL {} / {}, {} blunders",
        info.white,
        info.black,
        info.result,
        one_decimal(summary.white.accuracy_percent, "%"),
        one_decimal(summary.black.accuracy_percent, "%"),
        one_decimal(summary.white.avg_cp_loss, ""),
        one_decimal(summary.black.avg_cp_loss, ""),
        summary.combined_blunders(),
    );
    if !game.status().is_complete() {
        line.push_str(&format!(" [{} after {}/{} plies]", game.status().label(), game.plies().len(), game.total_plies()));
    }
    line
}

fn one_decimal(value: Option<f64>, unit: &str) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.1}{}", v, unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{italian_evaluator, TableEvaluator};
    use chess_analysis::{AnalysisConfig, CompletionStatus, SearchLimit, StandardRules};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const PGN: &str = r#"[White "Alice"]
[Black "Bob"]
[Result "1-0"]

1. e4 e5 2. Nf3 Nc6 3. Bc4 Nf6 1-0

[White "Carol"]
[Black "Dan"]
[Result "*"]

1. e4 e5 2. Ke3 *

[White "Erin"]
[Black "Frank"]
[Result "1/2-1/2"]

1. d4 d5 1/2-1/2
"#;

    fn analyzer(evaluator: TableEvaluator) -> GameAnalyzer<TableEvaluator> {
        let config = AnalysisConfig { limit: SearchLimit::Depth(8), lines: 1, ..AnalysisConfig::default() };
        GameAnalyzer::new(Arc::new(evaluator), Arc::new(StandardRules), config).unwrap()
    }

    #[test]
    fn test_load_games_skips_unplayable() {
        let games = load_games(PGN, &StandardRules).unwrap();
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].info.white, "Alice");
        assert_eq!(games[1].info.white, "Erin");
        assert!(load_games("1. e4 {oops", &StandardRules).is_err());
    }

    #[tokio::test]
    async fn test_analyze_games_keeps_input_order() {
        let games = load_games(PGN, &StandardRules).unwrap();
        let results = analyze_games(&analyzer(italian_evaluator()), &games, 4, &AtomicBool::new(false)).await;

        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        let second = results[1].as_ref().unwrap();
        assert_eq!(first.info().white, "Alice");
        assert_eq!(first.summary().black.blunders, 1);
        assert_eq!(second.info().white, "Erin");
        assert_eq!(second.plies().len(), 2);
        assert!(describe(first).contains("1 blunders"));
    }

    #[tokio::test]
    async fn test_cancelled_batch_reports_partial_games() {
        let games = load_games(PGN, &StandardRules).unwrap();
        let cancel = AtomicBool::new(false);
        cancel.store(true, Ordering::SeqCst);
        let results = analyze_games(&analyzer(TableEvaluator::default()), &games, 1, &cancel).await;

        for game in results.iter().map(|r| r.as_ref().unwrap()) {
            assert!(matches!(game.status(), CompletionStatus::PartiallyCompleted(_)));
            let line = describe(game);
            assert!(line.contains("partially_completed"));
            assert!(line.contains("accuracy n/a / n/a, ACPL n/a / n/a"), "{}", line);
        }
    }

    #[tokio::test]
    async fn test_progress_logger_drains_until_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_progress_logger(rx);
        tx.send(AnalysisEvent::Started { game: "g".to_string(), plies: 2 }).unwrap();
        tx.send(AnalysisEvent::Finished { game: "g".to_string(), status: CompletionStatus::Completed }).unwrap();
        drop(tx);
        handle.await.unwrap();
    }
}
