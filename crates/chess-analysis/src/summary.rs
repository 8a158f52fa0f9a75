//! Game-level statistics and narrative, recomputed from ply records.

use serde::{Deserialize, Serialize};

use crate::position::{Position, Side};
use crate::quality::{GameInfo, GamePhase, MoveQuality, PlyRecord};

/// Constants for the accuracy curve, narrative archetypes and phase detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Accuracy is `a * exp(b * acpl) + c`, clamped to 0..=100.
    pub accuracy_a: f64,
    pub accuracy_b: f64,
    pub accuracy_c: f64,
    pub slugfest_min_std_dev: f64,
    pub slugfest_min_blunders: u32,
    /// Exact blunder count of a game decided by one moment.
    pub decisive_blunders: u32,
    pub positional_max_acpl: f64,
    /// Moves up to this fullmove number are opening moves.
    pub opening_max_fullmoves: u32,
    /// Positions with at most this many knights, bishops, rooks and queens are endgames.
    pub endgame_max_pieces: u32,
    /// Centipawn value of mate, used for the volatility series.
    pub mate_score: i32,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            accuracy_a: 103.1668,
            accuracy_b: -0.004354,
            accuracy_c: -3.1668,
            slugfest_min_std_dev: 150.0,
            slugfest_min_blunders: 2,
            decisive_blunders: 1,
            positional_max_acpl: 25.0,
            opening_max_fullmoves: 12,
            endgame_max_pieces: 7,
            mate_score: 10_000,
        }
    }
}

/// Per-color statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerStats {
    /// Moves with a verdict
    pub analyzed_moves: u32,
    pub brilliant: u32,
    pub great: u32,
    pub good: u32,
    pub inaccuracies: u32,
    pub mistakes: u32,
    pub blunders: u32,
    /// Book and only-move plies
    pub forced: u32,
    /// Average centipawn loss over unforced moves; `None` without any
    pub avg_cp_loss: Option<f64>,
    /// Accuracy percentage (0-100); `None` without unforced moves
    pub accuracy_percent: Option<f64>,
    /// Sample standard deviation of the centipawn losses
    pub cpl_std_dev: f64,
}

impl PlayerStats {
    pub fn count(&self, quality: MoveQuality) -> u32 {
        match quality {
            MoveQuality::Brilliant => self.brilliant,
            MoveQuality::Great => self.great,
            MoveQuality::Good => self.good,
            MoveQuality::Inaccuracy => self.inaccuracies,
            MoveQuality::Mistake => self.mistakes,
            MoveQuality::Blunder => self.blunders,
            MoveQuality::Forced => self.forced,
        }
    }

    fn tally(&mut self, quality: MoveQuality) {
        self.analyzed_moves += 1;
        let slot = match quality {
            MoveQuality::Brilliant => &mut self.brilliant,
            MoveQuality::Great => &mut self.great,
            MoveQuality::Good => &mut self.good,
            MoveQuality::Inaccuracy => &mut self.inaccuracies,
            MoveQuality::Mistake => &mut self.mistakes,
            MoveQuality::Blunder => &mut self.blunders,
            MoveQuality::Forced => &mut self.forced,
        };
        *slot += 1;
    }
}

/// Story the game told, picked by the first matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    TacticalSlugfest,
    DecisiveMoment,
    PositionalSqueeze,
    Standard,
}

/// Aggregates of an analyzed game.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameSummary {
    pub white: PlayerStats,
    pub black: PlayerStats,
    pub analyzed_plies: usize,
    pub unanalyzed_plies: usize,
    /// Standard deviation of the White-perspective evaluation after each move.
    pub eval_volatility: f64,
    pub archetype: Archetype,
    pub narrative: String,
}

impl GameSummary {
    pub fn player(&self, side: Side) -> &PlayerStats {
        match side {
            Side::White => &self.white,
            Side::Black => &self.black,
        }
    }

    pub fn combined_blunders(&self) -> u32 {
        self.white.blunders + self.black.blunders
    }
}

/// Map an average centipawn loss onto a 0-100 accuracy, rounded to one decimal.
pub fn accuracy(acpl: f64, config: &SummaryConfig) -> f64 {
    let raw = config.accuracy_a * (config.accuracy_b * acpl).exp() + config.accuracy_c;
    (raw.clamp(0.0, 100.0) * 10.0).round() / 10.0
}

/// Phase of the game at `position`.
pub fn phase_of(position: &Position, config: &SummaryConfig) -> GamePhase {
    if position.fullmove_number() <= config.opening_max_fullmoves {
        GamePhase::Opening
    } else if position.non_pawn_material() <= config.endgame_max_pieces {
        GamePhase::Endgame
    } else {
        GamePhase::Middlegame
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation; zero with fewer than two samples.
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let Some(avg) = mean(values) else {
        return 0.0;
    };
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Compute every aggregate of a game from its ply records.
pub fn summarize(info: &GameInfo, plies: &[PlyRecord], config: &SummaryConfig) -> GameSummary {
    let mut white = PlayerStats::default();
    let mut black = PlayerStats::default();
    let mut white_losses = Vec::new();
    let mut black_losses = Vec::new();
    let mut white_view = Vec::new();

    for record in plies {
        let (Some(verdict), Some((_, after))) = (record.verdict(), record.evaluations()) else {
            continue;
        };
        let (stats, losses) = match record.mover {
            Side::White => (&mut white, &mut white_losses),
            Side::Black => (&mut black, &mut black_losses),
        };
        stats.tally(verdict.quality);
        if verdict.quality != MoveQuality::Forced {
            losses.push(f64::from(verdict.loss));
        }

        // The evaluation after a move is from the opponent's point of view.
        let cp = after.score.to_centipawns(config.mate_score);
        let cp = match record.mover {
            Side::White => -cp,
            Side::Black => cp,
        };
        white_view.push(f64::from(cp));
    }

    for (stats, losses) in [(&mut white, &white_losses), (&mut black, &black_losses)] {
        stats.avg_cp_loss = mean(losses);
        stats.accuracy_percent = stats.avg_cp_loss.map(|acpl| accuracy(acpl, config));
        stats.cpl_std_dev = std_dev(losses);
    }

    let analyzed_plies = plies.iter().filter(|p| p.verdict().is_some()).count();
    let archetype = archetype_of(&white, &black, config);
    let mut summary = GameSummary {
        white,
        black,
        analyzed_plies,
        unanalyzed_plies: plies.len() - analyzed_plies,
        eval_volatility: (std_dev(&white_view) * 100.0).round() / 100.0,
        archetype,
        narrative: String::new(),
    };
    summary.narrative = narrate(&summary, info);
    summary
}

fn archetype_of(white: &PlayerStats, black: &PlayerStats, config: &SummaryConfig) -> Archetype {
    let blunders = white.blunders + black.blunders;
    let volatile = white.cpl_std_dev > config.slugfest_min_std_dev || black.cpl_std_dev > config.slugfest_min_std_dev;

    if volatile && blunders >= config.slugfest_min_blunders {
        Archetype::TacticalSlugfest
    } else if blunders == config.decisive_blunders {
        Archetype::DecisiveMoment
    } else if [white, black]
        .iter()
        .all(|p| p.avg_cp_loss.is_some_and(|acpl| acpl <= config.positional_max_acpl))
        && blunders == 0
    {
        Archetype::PositionalSqueeze
    } else {
        Archetype::Standard
    }
}

fn narrate(summary: &GameSummary, info: &GameInfo) -> String {
    let (w, b) = (&info.white, &info.black);
    match summary.archetype {
        Archetype::TacticalSlugfest => format!(
            "This was a tactical slugfest where {} and {} battled through a highly volatile game marked by {} combined blunders.",
            w,
            b,
            summary.combined_blunders()
        ),
        Archetype::DecisiveMoment => format!(
            "This game was defined by a single decisive moment. The outcome hinged on a critical blunder, which ultimately determined the result between {} and {}.",
            w, b
        ),
        Archetype::PositionalSqueeze => format!(
            "A clean, positional squeeze. Both {} and {} played with high accuracy, resulting in a methodical game with no major blunders.",
            w, b
        ),
        Archetype::Standard => format!(
            "A standard game between {} and {}, concluding with a result of {}.",
            w, b, info.result
        ),
    }
}
