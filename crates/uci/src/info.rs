//! UCI `info` line types.

use serde::{Deserialize, Serialize};
use std::iter::Peekable;

/// Score in centipawns or mate distance, relative to the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Score {
    /// Centipawn score (100 = 1 pawn advantage).
    Cp(i32),
    /// Mate in N moves (positive = side to move mates, negative = side to move is mated).
    Mate(i32),
}

/// Marks a score as a search-window bound rather than an exact value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBound {
    Lower,
    Upper,
}

/// Search information from engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineInfo {
    /// Search depth in plies.
    pub depth: Option<u32>,
    /// Selective search depth.
    pub seldepth: Option<u32>,
    /// 1-based index of the line when the engine reports several.
    pub multipv: Option<u32>,
    /// Score evaluation.
    pub score: Option<Score>,
    /// Set when `score` is only a bound.
    pub bound: Option<ScoreBound>,
    /// Nodes searched.
    pub nodes: Option<u64>,
    /// Nodes per second.
    pub nps: Option<u64>,
    /// Time spent in milliseconds.
    pub time: Option<u64>,
    /// Hash table usage (per mille).
    pub hashfull: Option<u32>,
    /// Principal variation (best line found).
    pub pv: Vec<String>,
    /// Current move being searched.
    pub currmove: Option<String>,
    /// Arbitrary string info.
    pub string: Option<String>,
}

impl EngineInfo {
    /// Create a new empty info.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the line carries an exact score a client can rely on.
    pub fn is_exact_score(&self) -> bool {
        self.score.is_some() && self.bound.is_none()
    }

    /// Format as UCI info string.
    pub fn to_uci(&self) -> String {
        let mut parts = vec!["info".to_string()];

        if let Some(d) = self.depth {
            parts.push(format!("depth {}", d));
        }
        if let Some(d) = self.seldepth {
            parts.push(format!("seldepth {}", d));
        }
        if let Some(k) = self.multipv {
            parts.push(format!("multipv {}", k));
        }
        if let Some(s) = self.score {
            match s {
                Score::Cp(cp) => parts.push(format!("score cp {}", cp)),
                Score::Mate(m) => parts.push(format!("score mate {}", m)),
            }
            match self.bound {
                Some(ScoreBound::Lower) => parts.push("lowerbound".to_string()),
                Some(ScoreBound::Upper) => parts.push("upperbound".to_string()),
                None => {}
            }
        }
        if let Some(n) = self.nodes {
            parts.push(format!("nodes {}", n));
        }
        if let Some(n) = self.nps {
            parts.push(format!("nps {}", n));
        }
        if let Some(h) = self.hashfull {
            parts.push(format!("hashfull {}", h));
        }
        if let Some(t) = self.time {
            parts.push(format!("time {}", t));
        }
        if let Some(ref m) = self.currmove {
            parts.push(format!("currmove {}", m));
        }
        if !self.pv.is_empty() {
            parts.push(format!("pv {}", self.pv.join(" ")));
        }
        if let Some(ref s) = self.string {
            parts.push(format!("string {}", s));
        }

        parts.join(" ")
    }

    /// Parse UCI info line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace().peekable();
        if tokens.next()? != "info" {
            return None;
        }

        let mut info = EngineInfo::new();
        while let Some(keyword) = tokens.next() {
            match keyword {
                "depth" => info.depth = next_number(&mut tokens),
                "seldepth" => info.seldepth = next_number(&mut tokens),
                "multipv" => info.multipv = next_number(&mut tokens),
                "nodes" => info.nodes = next_number(&mut tokens),
                "nps" => info.nps = next_number(&mut tokens),
                "time" => info.time = next_number(&mut tokens),
                "hashfull" => info.hashfull = next_number(&mut tokens),
                "currmove" => info.currmove = tokens.next().map(str::to_string),
                "score" => {
                    info.score = match tokens.next() {
                        Some("cp") => next_number(&mut tokens).map(Score::Cp),
                        Some("mate") => next_number(&mut tokens).map(Score::Mate),
                        _ => None,
                    };
                    info.bound = match tokens.peek() {
                        Some(&"lowerbound") => Some(ScoreBound::Lower),
                        Some(&"upperbound") => Some(ScoreBound::Upper),
                        _ => None,
                    };
                    if info.bound.is_some() {
                        tokens.next();
                    }
                }
                "pv" => {
                    while let Some(mv) = tokens.next_if(|t| !is_info_keyword(t)) {
                        info.pv.push(mv.to_string());
                    }
                }
                "string" => {
                    // String consumes rest of line
                    info.string = Some(tokens.by_ref().collect::<Vec<_>>().join(" "));
                }
                _ => {}
            }
        }

        Some(info)
    }
}

fn next_number<'a, T, I>(tokens: &mut Peekable<I>) -> Option<T>
where
    T: std::str::FromStr,
    I: Iterator<Item = &'a str>,
{
    tokens.next().and_then(|t| t.parse().ok())
}

fn is_info_keyword(s: &str) -> bool {
    matches!(
        s,
        "depth" | "seldepth" | "multipv" | "score" | "nodes" | "nps" | "time" | "pv"
            | "currmove" | "currmovenumber" | "hashfull" | "tbhits" | "cpuload" | "wdl"
            | "refutation" | "currline" | "string"
    )
}

/// Builder for constructing EngineInfo.
#[derive(Default)]
pub struct InfoBuilder {
    info: EngineInfo,
}

impl InfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(mut self, d: u32) -> Self {
        self.info.depth = Some(d);
        self
    }

    pub fn multipv(mut self, k: u32) -> Self {
        self.info.multipv = Some(k);
        self
    }

    pub fn score(mut self, score: Score) -> Self {
        self.info.score = Some(score);
        self
    }

    pub fn score_cp(self, cp: i32) -> Self {
        self.score(Score::Cp(cp))
    }

    pub fn score_mate(self, moves: i32) -> Self {
        self.score(Score::Mate(moves))
    }

    pub fn bound(mut self, bound: ScoreBound) -> Self {
        self.info.bound = Some(bound);
        self
    }

    pub fn nodes(mut self, n: u64) -> Self {
        self.info.nodes = Some(n);
        self
    }

    pub fn time(mut self, ms: u64) -> Self {
        self.info.time = Some(ms);
        self
    }

    pub fn pv<S: Into<String>>(mut self, moves: impl IntoIterator<Item = S>) -> Self {
        self.info.pv = moves.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> EngineInfo {
        self.info
    }
}
