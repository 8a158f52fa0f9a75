//! PGN (Portable Game Notation) reading and annotated writing.
//!
//! The reader accepts multi-game files with tag pairs, comments, NAGs and
//! nested variations (skipped). The writer produces move text with engine
//! evaluations, verdict glyphs and clock comments that reads back to the
//! same move sequence.

use std::sync::LazyLock;
use std::time::Duration;

use chess_analysis::{
    AnalyzedGame, GameInfo, GameInput, PlayedMove, PlyOutcome, PlyRecord, Position, RulesEngine, RulesError, Score,
    Side,
};
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

/// Tag pair such as `[White "Carlsen, Magnus"]`.
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\[\s*(\w+)\s+"((?:[^"\\]|\\.)*)"\s*\]$"#).expect("valid tag regex"));

/// Clock annotation `[%clk H:MM:SS.d]`; hours and fraction are optional.
static CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[%clk\s+(?:(\d+):)?(\d{1,2}):(\d{1,2})(?:\.(\d+))?\s*\]").expect("valid clock regex")
});

const RESULTS: [&str; 4] = ["1-0", "0-1", "1/2-1/2", "*"];

/// Column limit for written move text.
const LINE_WIDTH: usize = 80;

/// Errors that can occur while reading PGN text.
#[derive(Error, Debug)]
pub enum PgnError {
    /// The text is not well-formed PGN.
    #[error("PGN syntax error: {0}")]
    Syntax(String),
    /// A SAN move does not resolve to a legal move.
    #[error("Move {ply} ({san}) cannot be played: {source}")]
    IllegalMove {
        ply: usize,
        san: String,
        #[source]
        source: RulesError,
    },
    /// The `FEN` tag does not describe a position.
    #[error("Invalid start position: {0}")]
    InvalidFen(#[from] RulesError),
}

/// A move as written in the source, with the comment that followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgnMove {
    pub san: String,
    pub comment: Option<String>,
}

/// One game as read from PGN text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PgnGame {
    /// Tag pairs in source order.
    pub tags: Vec<(String, String)>,
    pub moves: Vec<PgnMove>,
    /// Termination marker, if the move text had one.
    pub result: Option<String>,
}

impl PgnGame {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.moves.is_empty() && self.result.is_none()
    }

    /// Stable identifier: the game URL when the source has one, otherwise a
    /// name-based UUID over players, date and moves.
    pub fn id(&self) -> String {
        if let Some(url) = self.tag("Link").or(self.tag("Site")).filter(|s| s.starts_with("http")) {
            return url.to_string();
        }
        let mut name = [self.tag("White"), self.tag("Black"), self.tag("Date"), self.tag("Round")]
            .map(|t| t.unwrap_or("?"))
            .join("|");
        for mv in &self.moves {
            name.push(' ');
            name.push_str(&mv.san);
        }
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    pub fn info(&self) -> GameInfo {
        let text = |name: &str, fallback: &str| self.tag(name).unwrap_or(fallback).to_string();
        GameInfo {
            id: self.id(),
            white: text("White", "?"),
            black: text("Black", "?"),
            result: self.result.clone().unwrap_or_else(|| text("Result", "*")),
            opening: self.tag("Opening").map(str::to_string),
            eco: self.tag("ECO").map(str::to_string),
            date: self.tag("Date").map(str::to_string),
        }
    }
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

/// Turn a move-text token into a SAN move, or `None` for move numbers and glyphs.
fn move_token(token: &str) -> Option<&str> {
    let without_number = token.trim_start_matches(|c: char| c.is_ascii_digit());
    let san = if without_number.len() < token.len() && (without_number.is_empty() || without_number.starts_with('.')) {
        without_number.trim_start_matches('.')
    } else {
        token
    };
    let san = san.trim_end_matches(['!', '?']);
    (!san.is_empty()).then_some(san)
}

/// Parse every game in `text`.
///
/// # Errors
///
/// Returns [`PgnError::Syntax`] for unterminated tags or comments and
/// unbalanced variations.
pub fn parse_pgn(text: &str) -> Result<Vec<PgnGame>, PgnError> {
    let mut games = Vec::new();
    let mut current = PgnGame::default();
    let mut variation_depth = 0usize;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        match c {
            c if c.is_whitespace() => rest = rest.trim_start(),
            '[' if variation_depth == 0 => {
                let end = rest.find(']').ok_or_else(|| PgnError::Syntax("unterminated tag pair".to_string()))?;
                let pair = &rest[..=end];
                rest = &rest[end + 1..];
                let caps = TAG
                    .captures(pair)
                    .ok_or_else(|| PgnError::Syntax(format!("malformed tag pair {}", pair)))?;
                if !current.moves.is_empty() {
                    games.push(std::mem::take(&mut current));
                }
                current.tags.push((caps[1].to_string(), unescape(&caps[2])));
            }
            '{' => {
                let end = rest.find('}').ok_or_else(|| PgnError::Syntax("unterminated comment".to_string()))?;
                let comment = rest[1..end].trim();
                rest = &rest[end + 1..];
                if variation_depth > 0 || comment.is_empty() {
                    continue;
                }
                if let Some(last) = current.moves.last_mut() {
                    last.comment = Some(match last.comment.take() {
                        Some(previous) => format!("{} {}", previous, comment),
                        None => comment.to_string(),
                    });
                }
            }
            '}' => return Err(PgnError::Syntax("unbalanced '}'".to_string())),
            ';' => rest = &rest[rest.find('\n').unwrap_or(rest.len())..],
            '(' => {
                variation_depth += 1;
                rest = &rest[1..];
            }
            ')' => {
                variation_depth = variation_depth
                    .checked_sub(1)
                    .ok_or_else(|| PgnError::Syntax("unbalanced ')'".to_string()))?;
                rest = &rest[1..];
            }
            _ => {
                let end = rest
                    .find(|ch: char| ch.is_whitespace() || "{}();".contains(ch) || (ch == '[' && variation_depth == 0))
                    .unwrap_or(rest.len())
                    .max(c.len_utf8());
                let token = &rest[..end];
                rest = &rest[end..];
                if variation_depth > 0 || token.starts_with('$') {
                    continue;
                }
                if RESULTS.contains(&token) {
                    current.result = Some(token.to_string());
                    games.push(std::mem::take(&mut current));
                } else if let Some(san) = move_token(token) {
                    current.moves.push(PgnMove { san: san.to_string(), comment: None });
                }
            }
        }
    }

    if variation_depth > 0 {
        return Err(PgnError::Syntax("unterminated variation".to_string()));
    }
    if !current.is_empty() {
        games.push(current);
    }
    Ok(games)
}

/// Remaining clock from a `[%clk ...]` annotation.
///
/// Returns `None` when there is no clock or minutes/seconds are out of range.
pub fn parse_clock(comment: &str) -> Option<Duration> {
    let caps = CLOCK.captures(comment)?;
    let hours: u64 = caps.get(1).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;
    if minutes >= 60 || seconds >= 60 {
        return None;
    }
    let nanos: u32 = match caps.get(4) {
        Some(digits) => format!("{:0<9.9}", digits.as_str()).parse().ok()?,
        None => 0,
    };
    Some(Duration::new(hours * 3600 + minutes * 60 + seconds, nanos))
}

/// Base time and increment from a `TimeControl` tag such as `300+2`.
fn time_control(tag: Option<&str>) -> (Option<Duration>, Duration) {
    let Some(tag) = tag else {
        return (None, Duration::ZERO);
    };
    let mut parts = tag.splitn(2, '+');
    let base = parts.next().and_then(|b| b.parse::<u64>().ok()).map(Duration::from_secs);
    let increment = parts.next().and_then(|i| i.parse::<u64>().ok()).map_or(Duration::ZERO, Duration::from_secs);
    (base, increment)
}

/// Convert a parsed game into pipeline input, resolving SAN through `rules`.
///
/// Time spent per move is the mover's previous clock (or the base time for
/// their first move) plus the increment, minus the clock after the move.
///
/// # Errors
///
/// Returns [`PgnError::InvalidFen`] for a bad `FEN` tag and
/// [`PgnError::IllegalMove`] for a move that cannot be played.
pub fn to_game_input(game: &PgnGame, rules: &dyn RulesEngine) -> Result<GameInput, PgnError> {
    let start = match game.tag("FEN") {
        Some(fen) => rules.parse_fen(fen)?,
        None => rules.start_position(),
    };
    let (base, increment) = time_control(game.tag("TimeControl"));
    let mut last_clock = [base, base];

    let mut position = start.clone();
    let mut moves = Vec::with_capacity(game.moves.len());
    for (ply, mv) in game.moves.iter().enumerate() {
        let illegal = |source| PgnError::IllegalMove { ply: ply + 1, san: mv.san.clone(), source };
        let uci = rules.parse_san(&position, &mv.san).map_err(illegal)?;
        let slot = match position.side_to_move() {
            Side::White => 0,
            Side::Black => 1,
        };
        position = rules.apply(&position, &uci).map_err(illegal)?;

        let clock = mv.comment.as_deref().and_then(parse_clock);
        let time_spent = match (last_clock[slot], clock) {
            (Some(before), Some(after)) => Some((before + increment).saturating_sub(after)),
            _ => None,
        };
        if clock.is_some() {
            last_clock[slot] = clock;
        }
        moves.push(PlayedMove { uci, time_spent, clock });
    }

    Ok(GameInput { info: game.info(), start, moves })
}

fn format_clock(clock: Duration) -> String {
    let total = clock.as_secs();
    let tenths = clock.subsec_millis() / 100;
    let base = format!("{}:{:02}:{:02}", total / 3600, total / 60 % 60, total % 60);
    if tenths > 0 {
        format!("{}.{}", base, tenths)
    } else {
        base
    }
}

/// Evaluation after the move from White's point of view, in PGN `%eval` form.
fn format_eval(record: &PlyRecord, score: Score) -> Option<String> {
    // The score belongs to the side to move after the move, i.e. the opponent.
    let sign = match record.mover {
        Side::White => -1,
        Side::Black => 1,
    };
    match score {
        Score::Mate(0) => None,
        Score::Mate(n) => Some(format!("#{}", sign * n)),
        Score::Centipawns(cp) => Some(format!("{:.2}", f64::from(sign * cp) / 100.0)),
    }
}

fn ply_comment(record: &PlyRecord, rules: &dyn RulesEngine) -> String {
    let mut parts = Vec::new();
    match &record.outcome {
        PlyOutcome::Analyzed { evaluation_before, evaluation_after, verdict } => {
            if let Some(eval) = format_eval(record, evaluation_after.score) {
                parts.push(format!("[%eval {}]", eval));
            }
            if let Some(clock) = record.clock {
                parts.push(format!("[%clk {}]", format_clock(clock)));
            }
            parts.push(format!("{} ({}).", verdict.quality.label(), verdict.loss));
            if let Some(best) = evaluation_before.best_move().filter(|best| *best != record.uci) {
                if let Ok(san) = rules.san(&record.position_before, best) {
                    parts.push(format!("Best was {}.", san));
                }
            }
            if verdict.flags.missed_mate {
                parts.push("Missed a forced mate.".to_string());
            }
        }
        PlyOutcome::Unanalyzed { reason } => {
            if let Some(clock) = record.clock {
                parts.push(format!("[%clk {}]", format_clock(clock)));
            }
            parts.push(format!("not analyzed: {}", reason));
        }
    }
    comment(&parts.join(" "))
}

/// Brace comment; a `}` inside would end it early.
fn comment(text: &str) -> String {
    format!("{{{}}}", text.replace('}', ")"))
}

/// Greedy word wrap. Words longer than the limit get a line of their own.
fn wrap(words: &[String]) -> String {
    let mut out = String::new();
    let mut line_len = 0;
    for word in words {
        if line_len > 0 && line_len + 1 + word.len() > LINE_WIDTH {
            out.push('\n');
            line_len = 0;
        } else if line_len > 0 {
            out.push(' ');
            line_len += 1;
        }
        out.push_str(word);
        line_len += word.len();
    }
    out.push('\n');
    out
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render an analyzed game as annotated PGN.
///
/// Analyzed plies carry NAGs and comments. Moves the analysis never reached
/// follow without annotation, so the movetext always holds the whole game.
/// The result token is `*` only if those moves cannot be replayed.
pub fn write_annotated(game: &AnalyzedGame, rules: &dyn RulesEngine) -> String {
    let info = game.info();

    let mut words: Vec<String> = Vec::new();
    let narrative = comment(&format!("{} [{}]", game.summary().narrative, game.status().label()));
    words.extend(narrative.split_whitespace().map(str::to_string));

    for record in game.plies() {
        let number = record.position_before.fullmove_number();
        words.push(match record.mover {
            Side::White => format!("{}.", number),
            Side::Black => format!("{}...", number),
        });
        words.push(record.san.clone());
        if let Some(nag) = record.verdict().and_then(|v| v.quality.nag()) {
            words.push(format!("${}", nag));
        }
        words.extend(ply_comment(record, rules).split_whitespace().map(str::to_string));
    }

    let mut position = game.plies().last().map_or_else(|| game.start().clone(), |r| r.position_after.clone());
    let mut complete = true;
    for (i, uci) in game.remaining().iter().enumerate() {
        let step = rules.san(&position, uci).and_then(|san| Ok((san, rules.apply(&position, uci)?)));
        let Ok((san, after)) = step else {
            complete = false;
            break;
        };
        match position.side_to_move() {
            Side::White => words.push(format!("{}.", position.fullmove_number())),
            // A comment precedes the first unannotated move.
            Side::Black if i == 0 => words.push(format!("{}...", position.fullmove_number())),
            Side::Black => {}
        }
        words.push(san);
        position = after;
    }
    let result = if complete { info.result.as_str() } else { "*" };
    words.push(result.to_string());

    let mut tags = vec![
        ("Event", "Game review".to_string()),
        ("Site", info.id.clone()),
        ("Date", info.date.clone().unwrap_or_else(|| "????.??.??".to_string())),
        ("White", info.white.clone()),
        ("Black", info.black.clone()),
        ("Result", result.to_string()),
    ];
    if let Some(eco) = &info.eco {
        tags.push(("ECO", eco.clone()));
    }
    if let Some(opening) = &info.opening {
        tags.push(("Opening", opening.clone()));
    }
    if *game.start() != Position::startpos() {
        tags.push(("SetUp", "1".to_string()));
        tags.push(("FEN", game.start().fen()));
    }
    tags.push(("Annotator", format!("game-review {}", env!("CARGO_PKG_VERSION"))));

    let mut out = String::new();
    for (name, value) in tags {
        out.push_str(&format!("[{} \"{}\"]\n", name, escape(&value)));
    }
    out.push('\n');
    out.push_str(&wrap(&words));
    out
}
