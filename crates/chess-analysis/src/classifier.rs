//! Move classification from a pair of evaluations.
//!
//! [`classify`] is a pure function: the same inputs always give the same
//! verdict, so stored games can be re-classified under new thresholds
//! without running an engine again.

use serde::{Deserialize, Serialize};

use crate::evaluation::{Evaluation, Score};
use crate::quality::{ClassificationVerdict, MoveQuality, VerdictFlags};

/// Thresholds of the classification ladder, in centipawns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Largest loss that still counts as a best move.
    pub great_max_loss: i32,
    /// A move other than the engine's choice within this loss is Brilliant.
    pub brilliant_tolerance: i32,
    pub good_max_loss: i32,
    pub inaccuracy_max_loss: i32,
    /// Losses above this are blunders.
    pub mistake_max_loss: i32,
    /// Evaluations at or below minus this value count as lost.
    pub losing_threshold: i32,
    /// Value of mate in zero on the centipawn scale.
    pub mate_score: i32,
    /// Playing the engine's choice is Great, up to `good_max_loss`, when
    /// the second line trails it by more than this.
    pub only_move_gap: i32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            great_max_loss: 10,
            brilliant_tolerance: 5,
            good_max_loss: 50,
            inaccuracy_max_loss: 100,
            mistake_max_loss: 300,
            losing_threshold: 200,
            mate_score: 10_000,
            only_move_gap: 150,
        }
    }
}

impl ClassifierConfig {
    /// Check that the ladder is ascending and the scales make sense.
    pub fn validate(&self) -> Result<(), String> {
        let ladder = [
            self.great_max_loss,
            self.good_max_loss,
            self.inaccuracy_max_loss,
            self.mistake_max_loss,
        ];
        if ladder.iter().any(|t| *t < 0) {
            return Err("classification thresholds must not be negative".to_string());
        }
        if ladder.windows(2).any(|w| w[0] > w[1]) {
            return Err(format!("classification thresholds must be ascending, got {:?}", ladder));
        }
        if !(0..=self.great_max_loss).contains(&self.brilliant_tolerance) {
            return Err("brilliant_tolerance must lie between 0 and great_max_loss".to_string());
        }
        if self.only_move_gap < 0 {
            return Err("only_move_gap must not be negative".to_string());
        }
        if self.losing_threshold <= 0 {
            return Err("losing_threshold must be positive".to_string());
        }
        if self.mate_score <= self.losing_threshold.max(self.mistake_max_loss) + 1000 {
            return Err("mate_score must dwarf every other threshold".to_string());
        }
        Ok(())
    }
}

/// Everything the classifier looks at for one ply.
#[derive(Debug, Clone, Copy)]
pub struct MoveContext<'a> {
    /// Evaluation before the move, from the mover's point of view.
    pub before: &'a Evaluation,
    /// Evaluation after the move, from the opponent's point of view.
    pub after: &'a Evaluation,
    /// The move played, in UCI notation.
    pub played: &'a str,
    /// Legal moves available to the mover.
    pub legal_moves: usize,
    /// Inside the configured opening book.
    pub book: bool,
    /// Verdict of the opponent's preceding move, if it was analyzed.
    pub previous: Option<MoveQuality>,
}

/// Classify one ply.
///
/// Both evaluations are mapped onto the centipawn scale through
/// [`Score::to_centipawns`] and brought into the mover's frame: the score
/// after the move belongs to the opponent and is negated. The loss is the
/// drop from the best achievable score to the achieved one, clamped at zero.
pub fn classify(ctx: &MoveContext<'_>, config: &ClassifierConfig) -> ClassificationVerdict {
    let best = ctx.before.score.to_centipawns(config.mate_score);
    let achieved = -ctx.after.score.to_centipawns(config.mate_score);
    let loss = (best - achieved).max(0);

    let still_mating = matches!(ctx.after.score, Score::Mate(n) if n <= 0);
    let flags = VerdictFlags {
        missed_mate: ctx.before.score.is_winning_mate() && !still_mating,
        reciprocal_blunder: false,
    };

    let quality = if ctx.book || ctx.legal_moves <= 1 {
        MoveQuality::Forced
    } else {
        grade(loss, best, achieved, ctx, config)
    };

    ClassificationVerdict {
        quality,
        loss,
        flags: VerdictFlags {
            reciprocal_blunder: quality == MoveQuality::Blunder
                && ctx.previous == Some(MoveQuality::Blunder),
            ..flags
        },
    }
}

fn grade(loss: i32, best: i32, achieved: i32, ctx: &MoveContext<'_>, config: &ClassifierConfig) -> MoveQuality {
    let engine_choice = ctx.before.best_move();
    if loss <= config.good_max_loss && engine_choice == Some(ctx.played) && only_good_move(best, ctx, config) {
        return MoveQuality::Great;
    }
    if loss <= config.great_max_loss {
        return if engine_choice.is_some_and(|mv| mv != ctx.played) && loss <= config.brilliant_tolerance {
            MoveQuality::Brilliant
        } else {
            MoveQuality::Great
        };
    }

    let threw_it_away = best > -config.losing_threshold && achieved <= -config.losing_threshold;
    if loss > config.mistake_max_loss || (threw_it_away && loss > config.inaccuracy_max_loss) {
        MoveQuality::Blunder
    } else if loss > config.inaccuracy_max_loss {
        MoveQuality::Mistake
    } else if loss > config.good_max_loss {
        MoveQuality::Inaccuracy
    } else {
        MoveQuality::Good
    }
}

/// The runner-up line is more than `only_move_gap` below the best one.
fn only_good_move(best: i32, ctx: &MoveContext<'_>, config: &ClassifierConfig) -> bool {
    ctx.before
        .alternatives
        .first()
        .is_some_and(|second| best - second.score.to_centipawns(config.mate_score) > config.only_move_gap)
}
