//! UCI (Universal Chess Interface) protocol grammar.
//!
//! This crate knows how to frame the commands a GUI sends to an engine and
//! how to read the lines an engine prints back. It performs no I/O; the
//! session logic lives with whoever owns the engine's standard streams.
//!
//! # Commands sent to the engine
//!
//! - `uci` - Enter UCI mode, engine answers with `id` lines and `uciok`
//! - `setoption name <id> [value <x>]` - Configure the engine
//! - `isready` / `readyok` - Synchronization
//! - `ucinewgame` - Forget state from a previous game
//! - `position fen <fen> [moves <move>...]` - Set position
//! - `go [movetime <ms>] [depth <d>]` - Start search
//! - `stop` / `quit`
//!
//! # Lines read from the engine
//!
//! - `id name <name>` / `id author <author>`
//! - `uciok`, `readyok`
//! - `info ...` search progress, see [`EngineInfo`]
//! - `bestmove <move> [ponder <move>]`

mod command;
mod info;

pub use command::{GoOptions, GuiCommand};
pub use info::{EngineInfo, InfoBuilder, Score, ScoreBound};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UciError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Messages sent from engine to GUI.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    /// Engine identification.
    Id { name: Option<String>, author: Option<String> },
    /// UCI initialization complete.
    UciOk,
    /// Engine is ready.
    ReadyOk,
    /// Search information.
    Info(EngineInfo),
    /// Best move found. `None` when the position has no legal move.
    BestMove { mv: Option<String>, ponder: Option<String> },
}

impl EngineMessage {
    /// Parse one line printed by an engine.
    ///
    /// Returns `None` for lines that carry nothing a client acts on, such as
    /// copyright banners or `option` declarations.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let mut tokens = line.split_whitespace();

        match tokens.next()? {
            "uciok" => Some(EngineMessage::UciOk),
            "readyok" => Some(EngineMessage::ReadyOk),
            "info" => EngineInfo::parse(line).map(EngineMessage::Info),
            "id" => {
                let field = tokens.next()?;
                let value = tokens.collect::<Vec<_>>().join(" ");
                match field {
                    "name" => Some(EngineMessage::Id { name: Some(value), author: None }),
                    "author" => Some(EngineMessage::Id { name: None, author: Some(value) }),
                    _ => None,
                }
            }
            "bestmove" => {
                let mv = match tokens.next() {
                    None | Some("(none)") | Some("0000") => None,
                    Some(mv) => Some(mv.to_string()),
                };
                let ponder = match (tokens.next(), tokens.next()) {
                    (Some("ponder"), Some(p)) => Some(p.to_string()),
                    _ => None,
                };
                Some(EngineMessage::BestMove { mv, ponder })
            }
            _ => None,
        }
    }

    /// Format message as the engine would print it.
    pub fn to_uci(&self) -> String {
        match self {
            EngineMessage::Id { name, author } => {
                let mut parts = Vec::new();
                if let Some(n) = name {
                    parts.push(format!("id name {}", n));
                }
                if let Some(a) = author {
                    parts.push(format!("id author {}", a));
                }
                parts.join("\n")
            }
            EngineMessage::UciOk => "uciok".to_string(),
            EngineMessage::ReadyOk => "readyok".to_string(),
            EngineMessage::Info(info) => info.to_uci(),
            EngineMessage::BestMove { mv, ponder } => {
                let mv = mv.as_deref().unwrap_or("(none)");
                match ponder {
                    Some(p) => format!("bestmove {} ponder {}", mv, p),
                    None => format!("bestmove {}", mv),
                }
            }
        }
    }

    /// True for the `bestmove` line that terminates a search.
    pub fn is_best_move(&self) -> bool {
        matches!(self, EngineMessage::BestMove { .. })
    }
}
