//! Commands a GUI sends to an engine.

use crate::UciError;

/// Commands sent from GUI to engine.
#[derive(Debug, Clone, PartialEq)]
pub enum GuiCommand {
    /// Initialize UCI mode.
    Uci,
    /// Check if engine is ready.
    IsReady,
    /// Set an engine option.
    SetOption { name: String, value: Option<String> },
    /// The next position belongs to a different game.
    UciNewGame,
    /// Set up position.
    Position {
        fen: Option<String>,
        moves: Vec<String>,
    },
    /// Start calculating.
    Go(GoOptions),
    /// Stop calculating.
    Stop,
    /// Quit the engine.
    Quit,
    /// Unknown command (for forward compatibility).
    Unknown(String),
}

/// Options for the `go` command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GoOptions {
    /// Search for exactly this time in milliseconds.
    pub movetime: Option<u64>,
    /// Search to this depth.
    pub depth: Option<u32>,
    /// Search this many nodes.
    pub nodes: Option<u64>,
    /// Search indefinitely until `stop`.
    pub infinite: bool,
}

impl GoOptions {
    pub fn depth(depth: u32) -> Self {
        Self { depth: Some(depth), ..Self::default() }
    }

    pub fn movetime(ms: u64) -> Self {
        Self { movetime: Some(ms), ..Self::default() }
    }
}

impl GuiCommand {
    /// Frame the command as a single protocol line, without terminator.
    pub fn to_uci(&self) -> String {
        match self {
            GuiCommand::Uci => "uci".to_string(),
            GuiCommand::IsReady => "isready".to_string(),
            GuiCommand::UciNewGame => "ucinewgame".to_string(),
            GuiCommand::SetOption { name, value } => match value {
                Some(v) => format!("setoption name {} value {}", name, v),
                None => format!("setoption name {}", name),
            },
            GuiCommand::Position { fen, moves } => {
                let mut line = match fen {
                    Some(f) => format!("position fen {}", f),
                    None => "position startpos".to_string(),
                };
                if !moves.is_empty() {
                    line.push_str(" moves ");
                    line.push_str(&moves.join(" "));
                }
                line
            }
            GuiCommand::Go(opts) => {
                let mut line = "go".to_string();
                if let Some(d) = opts.depth {
                    line.push_str(&format!(" depth {}", d));
                }
                if let Some(ms) = opts.movetime {
                    line.push_str(&format!(" movetime {}", ms));
                }
                if let Some(n) = opts.nodes {
                    line.push_str(&format!(" nodes {}", n));
                }
                if opts.infinite {
                    line.push_str(" infinite");
                }
                line
            }
            GuiCommand::Stop => "stop".to_string(),
            GuiCommand::Quit => "quit".to_string(),
            GuiCommand::Unknown(raw) => raw.clone(),
        }
    }

    /// Parse a UCI command string.
    pub fn parse(input: &str) -> Result<Self, UciError> {
        let input = input.trim();
        let mut parts = input.split_whitespace();

        match parts.next().unwrap_or("") {
            "uci" => Ok(GuiCommand::Uci),
            "isready" => Ok(GuiCommand::IsReady),
            "ucinewgame" => Ok(GuiCommand::UciNewGame),
            "stop" => Ok(GuiCommand::Stop),
            "quit" => Ok(GuiCommand::Quit),
            "setoption" => Self::parse_setoption(parts),
            "position" => Self::parse_position(parts),
            "go" => Ok(Self::parse_go(parts)),
            _ => Ok(GuiCommand::Unknown(input.to_string())),
        }
    }

    fn parse_setoption<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<Self, UciError> {
        if parts.next() != Some("name") {
            return Err(UciError::InvalidCommand("setoption without name".to_string()));
        }

        // Option names may contain spaces, so everything up to `value` is the name.
        let mut name = Vec::new();
        let mut value = Vec::new();
        let mut in_value = false;
        for part in parts {
            match part {
                "value" if !in_value => in_value = true,
                _ if in_value => value.push(part),
                _ => name.push(part),
            }
        }

        if name.is_empty() {
            return Err(UciError::InvalidCommand("setoption with empty name".to_string()));
        }
        Ok(GuiCommand::SetOption {
            name: name.join(" "),
            value: in_value.then(|| value.join(" ")),
        })
    }

    fn parse_position<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<Self, UciError> {
        let fen = match parts.next() {
            Some("startpos") => None,
            Some("fen") => {
                let fen_parts: Vec<&str> = parts.by_ref().take_while(|p| *p != "moves").collect();
                if fen_parts.is_empty() {
                    return Err(UciError::ParseError("Empty FEN".to_string()));
                }
                Some(fen_parts.join(" "))
            }
            Some(other) => {
                return Err(UciError::ParseError(format!(
                    "Expected 'startpos' or 'fen', got '{}'",
                    other
                )));
            }
            None => {
                return Err(UciError::ParseError(
                    "Expected 'startpos' or 'fen'".to_string(),
                ));
            }
        };

        // After a FEN, `take_while` already consumed the `moves` keyword.
        let moves = parts
            .skip_while(|p| *p == "moves")
            .map(str::to_string)
            .collect();

        Ok(GuiCommand::Position { fen, moves })
    }

    fn parse_go<'a>(mut parts: impl Iterator<Item = &'a str>) -> Self {
        let mut opts = GoOptions::default();

        while let Some(keyword) = parts.next() {
            match keyword {
                "movetime" => opts.movetime = parts.next().and_then(|v| v.parse().ok()),
                "depth" => opts.depth = parts.next().and_then(|v| v.parse().ok()),
                "nodes" => opts.nodes = parts.next().and_then(|v| v.parse().ok()),
                "infinite" => opts.infinite = true,
                _ => {}
            }
        }

        GuiCommand::Go(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_uci() {
        assert_eq!(GuiCommand::parse("uci").unwrap(), GuiCommand::Uci);
    }

    #[test]
    fn parse_position_startpos_with_moves() {
        let cmd = GuiCommand::parse("position startpos moves e2e4 e7e5").unwrap();
        assert_eq!(
            cmd,
            GuiCommand::Position {
                fen: None,
                moves: vec!["e2e4".to_string(), "e7e5".to_string()]
            }
        );
    }

    #[test]
    fn parse_position_fen_with_moves() {
        let cmd = GuiCommand::parse(
            "position fen rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1 moves e7e5",
        )
        .unwrap();
        assert_eq!(
            cmd,
            GuiCommand::Position {
                fen: Some("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1".to_string()),
                moves: vec!["e7e5".to_string()]
            }
        );
    }

    #[test]
    fn parse_position_rejects_garbage() {
        assert!(GuiCommand::parse("position middle").is_err());
        assert!(GuiCommand::parse("position fen").is_err());
    }

    #[test]
    fn parse_setoption_with_spaced_name() {
        let cmd = GuiCommand::parse("setoption name Skill Level value 20").unwrap();
        assert_eq!(
            cmd,
            GuiCommand::SetOption { name: "Skill Level".to_string(), value: Some("20".to_string()) }
        );
        let button = GuiCommand::parse("setoption name Clear Hash").unwrap();
        assert_eq!(button, GuiCommand::SetOption { name: "Clear Hash".to_string(), value: None });
    }

    #[test]
    fn parse_go_depth_and_movetime() {
        let GuiCommand::Go(opts) = GuiCommand::parse("go depth 18 movetime 500").unwrap() else {
            panic!("Expected Go command");
        };
        assert_eq!(opts.depth, Some(18));
        assert_eq!(opts.movetime, Some(500));
        assert!(!opts.infinite);
    }

    #[test]
    fn framed_commands_parse_back() {
        let commands = [
            GuiCommand::Uci,
            GuiCommand::IsReady,
            GuiCommand::UciNewGame,
            GuiCommand::SetOption { name: "MultiPV".to_string(), value: Some("3".to_string()) },
            GuiCommand::Position {
                fen: Some("8/8/8/8/8/8/8/K1k5 w - - 0 1".to_string()),
                moves: vec![],
            },
            GuiCommand::Go(GoOptions::depth(12)),
            GuiCommand::Go(GoOptions::movetime(250)),
            GuiCommand::Quit,
        ];
        for cmd in commands {
            assert_eq!(GuiCommand::parse(&cmd.to_uci()).unwrap(), cmd);
        }
    }
}
