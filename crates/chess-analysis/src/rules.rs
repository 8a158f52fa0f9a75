//! Chess rules capability consumed by the pipeline.
//!
//! The pipeline never generates moves itself. It asks a [`RulesEngine`] to
//! validate and apply moves, count legal replies and render notation.
//! [`StandardRules`] implements the capability on top of the `chess` crate.

use std::str::FromStr;

use chess::{Board, BoardStatus, ChessMove, Color, MoveGen, Piece, Square};

use crate::error::RulesError;
use crate::position::Position;

/// Terminal state of a position with no legal moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Side to move is checkmated.
    Checkmate,
    /// Side to move has no legal move and is not in check.
    Stalemate,
}

/// Board-state transitions and move validation.
pub trait RulesEngine: Send + Sync {
    /// Parse a FEN and return its canonical position.
    fn parse_fen(&self, fen: &str) -> Result<Position, RulesError>;

    fn start_position(&self) -> Position {
        Position::startpos()
    }

    /// Apply a move given in UCI notation, rejecting illegal moves.
    fn apply(&self, position: &Position, uci: &str) -> Result<Position, RulesError>;

    fn legal_move_count(&self, position: &Position) -> Result<usize, RulesError>;

    /// `None` while the side to move has at least one legal move.
    fn outcome(&self, position: &Position) -> Result<Option<Outcome>, RulesError>;

    /// Render a UCI move in standard algebraic notation.
    fn san(&self, position: &Position, uci: &str) -> Result<String, RulesError>;

    /// Resolve a SAN move to UCI notation.
    fn parse_san(&self, position: &Position, san: &str) -> Result<String, RulesError>;
}

/// Standard chess rules backed by the `chess` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardRules;

impl StandardRules {
    fn board(position: &Position) -> Result<Board, RulesError> {
        let fen = position.fen();
        Board::from_str(&fen).map_err(|e| RulesError::InvalidFen { fen, reason: e.to_string() })
    }

    fn legal_move(board: &Board, position: &Position, uci: &str) -> Result<ChessMove, RulesError> {
        let mv = ChessMove::from_str(uci).map_err(|_| RulesError::InvalidMove(uci.to_string()))?;
        if !board.legal(mv) {
            return Err(RulesError::IllegalMove { mv: uci.to_string(), fen: position.fen() });
        }
        Ok(mv)
    }

    /// Four-field key of a board.
    ///
    /// The en passant field is only set when a capture is actually
    /// available, so positions that differ only in a dead target share a key.
    fn key_of(board: &Board) -> String {
        let rendered = board.to_string();
        let mut fields = rendered.split_whitespace();
        let placement = fields.next().unwrap_or_default();
        let side = fields.next().unwrap_or("w");
        let castling = fields.next().unwrap_or("-");

        // `en_passant` holds the pawn that may be taken; the FEN wants the square behind it.
        let target = board.en_passant().and_then(|pawn| match board.side_to_move() {
            Color::White => pawn.up(),
            Color::Black => pawn.down(),
        });
        let ep = target.map(|sq| sq.to_string()).unwrap_or_else(|| "-".to_string());

        format!("{} {} {} {}", placement, side, castling, ep)
    }

    fn piece_letter(piece: Piece) -> char {
        match piece {
            Piece::Pawn => 'P',
            Piece::Knight => 'N',
            Piece::Bishop => 'B',
            Piece::Rook => 'R',
            Piece::Queen => 'Q',
            Piece::King => 'K',
        }
    }

    fn piece_from_letter(letter: char) -> Option<Piece> {
        match letter.to_ascii_uppercase() {
            'N' => Some(Piece::Knight),
            'B' => Some(Piece::Bishop),
            'R' => Some(Piece::Rook),
            'Q' => Some(Piece::Queen),
            'K' => Some(Piece::King),
            _ => None,
        }
    }

    fn is_castle(board: &Board, mv: ChessMove) -> bool {
        board.piece_on(mv.get_source()) == Some(Piece::King)
            && mv.get_source().get_file().to_index().abs_diff(mv.get_dest().get_file().to_index()) == 2
    }

    fn format_san(board: &Board, mv: ChessMove) -> String {
        let source = mv.get_source();
        let dest = mv.get_dest();
        let piece = board.piece_on(source).unwrap_or(Piece::Pawn);

        let mut san = String::new();
        if Self::is_castle(board, mv) {
            san.push_str(if dest.get_file().to_index() > source.get_file().to_index() {
                "O-O"
            } else {
                "O-O-O"
            });
        } else {
            let capture = board.piece_on(dest).is_some()
                || (piece == Piece::Pawn && source.get_file() != dest.get_file());

            if piece == Piece::Pawn {
                if capture {
                    san.push(file_char(source));
                }
            } else {
                san.push(Self::piece_letter(piece));
                let rivals: Vec<Square> = MoveGen::new_legal(board)
                    .filter(|m| {
                        m.get_dest() == dest
                            && m.get_source() != source
                            && board.piece_on(m.get_source()) == Some(piece)
                    })
                    .map(|m| m.get_source())
                    .collect();
                if !rivals.is_empty() {
                    let shares_file = rivals.iter().any(|s| s.get_file() == source.get_file());
                    let shares_rank = rivals.iter().any(|s| s.get_rank() == source.get_rank());
                    if !shares_file {
                        san.push(file_char(source));
                    } else if !shares_rank {
                        san.push(rank_char(source));
                    } else {
                        san.push(file_char(source));
                        san.push(rank_char(source));
                    }
                }
            }

            if capture {
                san.push('x');
            }
            san.push_str(&dest.to_string());
            if let Some(promotion) = mv.get_promotion() {
                san.push('=');
                san.push(Self::piece_letter(promotion));
            }
        }

        let next = board.make_move_new(mv);
        if next.status() == BoardStatus::Checkmate {
            san.push('#');
        } else if next.checkers().popcnt() > 0 {
            san.push('+');
        }
        san
    }

    fn resolve_san(board: &Board, san: &str) -> Option<ChessMove> {
        let cleaned = san.trim().trim_end_matches(|c| matches!(c, '+' | '#' | '!' | '?'));

        let castle_file = match cleaned {
            "O-O" | "0-0" => Some(6),
            "O-O-O" | "0-0-0" => Some(2),
            _ => None,
        };
        if let Some(file) = castle_file {
            return MoveGen::new_legal(board).find(|m| {
                Self::is_castle(board, *m) && m.get_dest().get_file().to_index() == file
            });
        }

        let mut chars: Vec<char> = cleaned.chars().filter(|c| !matches!(c, 'x' | ':' | '-')).collect();
        let piece = match chars.first().copied().filter(char::is_ascii_uppercase) {
            Some(letter) => {
                chars.remove(0);
                Self::piece_from_letter(letter)?
            }
            None => Piece::Pawn,
        };

        let mut promotion = None;
        if piece == Piece::Pawn {
            if let Some(last) = chars.last().copied().filter(char::is_ascii_alphabetic) {
                if !last.is_ascii_lowercase() || (chars.len() > 2 && chars[chars.len() - 2] == '=') {
                    promotion = Some(Self::piece_from_letter(last)?);
                    chars.pop();
                }
            }
            if chars.last() == Some(&'=') {
                chars.pop();
            }
        }

        if chars.len() < 2 {
            return None;
        }
        let dest_text: String = chars[chars.len() - 2..].iter().collect();
        let dest = Square::from_str(&dest_text).ok()?;
        let hints = &chars[..chars.len() - 2];

        let mut candidates = MoveGen::new_legal(board).filter(|m| {
            m.get_dest() == dest
                && board.piece_on(m.get_source()) == Some(piece)
                && m.get_promotion() == promotion
                && hints.iter().all(|h| match h {
                    'a'..='h' => file_char(m.get_source()) == *h,
                    '1'..='8' => rank_char(m.get_source()) == *h,
                    _ => false,
                })
        });

        let found = candidates.next()?;
        match candidates.next() {
            Some(_) => None,
            None => Some(found),
        }
    }
}

fn file_char(square: Square) -> char {
    (b'a' + square.get_file().to_index() as u8) as char
}

fn rank_char(square: Square) -> char {
    (b'1' + square.get_rank().to_index() as u8) as char
}

impl RulesEngine for StandardRules {
    fn parse_fen(&self, fen: &str) -> Result<Position, RulesError> {
        let raw = Position::from_fen(fen)?;
        let board = Self::board(&raw)?;
        Ok(Position::from_parts(
            Self::key_of(&board),
            raw.halfmove_clock(),
            raw.fullmove_number(),
        ))
    }

    fn apply(&self, position: &Position, uci: &str) -> Result<Position, RulesError> {
        let board = Self::board(position)?;
        let mv = Self::legal_move(&board, position, uci)?;

        let resets_clock = board.piece_on(mv.get_source()) == Some(Piece::Pawn)
            || board.piece_on(mv.get_dest()).is_some();
        let halfmove = if resets_clock { 0 } else { position.halfmove_clock() + 1 };
        let fullmove = match board.side_to_move() {
            Color::Black => position.fullmove_number() + 1,
            Color::White => position.fullmove_number(),
        };

        let next = board.make_move_new(mv);
        Ok(Position::from_parts(Self::key_of(&next), halfmove, fullmove))
    }

    fn legal_move_count(&self, position: &Position) -> Result<usize, RulesError> {
        Ok(MoveGen::new_legal(&Self::board(position)?).len())
    }

    fn outcome(&self, position: &Position) -> Result<Option<Outcome>, RulesError> {
        Ok(match Self::board(position)?.status() {
            BoardStatus::Checkmate => Some(Outcome::Checkmate),
            BoardStatus::Stalemate => Some(Outcome::Stalemate),
            BoardStatus::Ongoing => None,
        })
    }

    fn san(&self, position: &Position, uci: &str) -> Result<String, RulesError> {
        let board = Self::board(position)?;
        let mv = Self::legal_move(&board, position, uci)?;
        Ok(Self::format_san(&board, mv))
    }

    fn parse_san(&self, position: &Position, san: &str) -> Result<String, RulesError> {
        let board = Self::board(position)?;
        Self::resolve_san(&board, san)
            .map(|mv| mv.to_string())
            .ok_or_else(|| RulesError::IllegalMove { mv: san.to_string(), fen: position.fen() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(rules: &StandardRules, moves: &[&str]) -> Position {
        moves.iter().fold(Position::startpos(), |pos, mv| rules.apply(&pos, mv).unwrap())
    }

    #[test]
    fn apply_tracks_clocks() {
        let rules = StandardRules;
        let pos = play(&rules, &["g1f3", "g8f6", "f3g1"]);
        assert_eq!(pos.halfmove_clock(), 3);
        assert_eq!(pos.fullmove_number(), 2);

        let pos = rules.apply(&pos, "e7e5").unwrap();
        assert_eq!(pos.halfmove_clock(), 0);
        assert_eq!(pos.fullmove_number(), 3);
    }

    #[test]
    fn transposition_shares_key() {
        let rules = StandardRules;
        let a = play(&rules, &["g1f3", "g8f6", "b1c3"]);
        let b = play(&rules, &["b1c3", "g8f6", "g1f3"]);
        assert_eq!(a, b);
    }

    #[test]
    fn en_passant_only_when_capturable() {
        let rules = StandardRules;
        let quiet = play(&rules, &["e2e4"]);
        assert!(quiet.key().ends_with(" -"), "{}", quiet.key());

        let capturable = play(&rules, &["e2e4", "a7a6", "e4e5", "d7d5"]);
        assert!(capturable.key().ends_with(" d6"), "{}", capturable.key());
        assert!(rules.apply(&capturable, "e5d6").is_ok());
    }

    #[test]
    fn rejects_illegal_and_garbage_moves() {
        let rules = StandardRules;
        let start = Position::startpos();
        assert!(matches!(rules.apply(&start, "e2e5"), Err(RulesError::IllegalMove { .. })));
        assert!(matches!(rules.apply(&start, "zz"), Err(RulesError::InvalidMove(_))));
    }

    #[test]
    fn san_rendering() {
        let rules = StandardRules;
        let start = Position::startpos();
        assert_eq!(rules.san(&start, "g1f3").unwrap(), "Nf3");
        assert_eq!(rules.san(&start, "e2e4").unwrap(), "e4");

        let pos = play(&rules, &["e2e4", "d7d5"]);
        assert_eq!(rules.san(&pos, "e4d5").unwrap(), "exd5");

        // Knights on b1 and f3 can both reach d2.
        let pos = rules.parse_fen("4k3/8/8/8/8/5N2/8/1N2K3 w - - 0 1").unwrap();
        assert_eq!(rules.san(&pos, "b1d2").unwrap(), "Nbd2");

        // Rooks on a1 and a5 share a file.
        let pos = rules.parse_fen("4k3/8/8/R7/8/8/8/R3K3 w - - 0 1").unwrap();
        assert_eq!(rules.san(&pos, "a1a3").unwrap(), "R1a3");
    }

    #[test]
    fn san_castling_promotion_and_mate() {
        let rules = StandardRules;
        let pos = rules.parse_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        assert_eq!(rules.san(&pos, "e1g1").unwrap(), "O-O");
        assert_eq!(rules.san(&pos, "e1c1").unwrap(), "O-O-O");

        let pos = rules.parse_fen("8/4P3/8/8/8/8/k7/4K3 w - - 0 1").unwrap();
        assert_eq!(rules.san(&pos, "e7e8q").unwrap(), "e8=Q");

        let pos = play(&rules, &["f2f3", "e7e5", "g2g4"]);
        assert_eq!(rules.san(&pos, "d8h4").unwrap(), "Qh4#");
    }

    #[test]
    fn san_parsing() {
        let rules = StandardRules;
        let start = Position::startpos();
        assert_eq!(rules.parse_san(&start, "Nf3").unwrap(), "g1f3");
        assert_eq!(rules.parse_san(&start, "e4!?").unwrap(), "e2e4");
        assert!(rules.parse_san(&start, "Nd4").is_err());

        let pos = rules.parse_fen("4k3/8/8/8/8/5N2/8/1N2K3 w - - 0 1").unwrap();
        assert!(rules.parse_san(&pos, "Nd2").is_err());
        assert_eq!(rules.parse_san(&pos, "Nbd2").unwrap(), "b1d2");
        assert_eq!(rules.parse_san(&pos, "Nf3d2").unwrap(), "f3d2");

        let pos = rules.parse_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        assert_eq!(rules.parse_san(&pos, "O-O-O").unwrap(), "e1c1");
        assert_eq!(rules.parse_san(&pos, "0-0").unwrap(), "e1g1");

        let pos = rules.parse_fen("8/4P3/8/8/8/8/k7/4K3 w - - 0 1").unwrap();
        assert_eq!(rules.parse_san(&pos, "e8=N").unwrap(), "e7e8n");
        assert_eq!(rules.parse_san(&pos, "e8Q+").unwrap(), "e7e8q");
    }

    #[test]
    fn legal_counts_and_outcomes() {
        let rules = StandardRules;
        assert_eq!(rules.legal_move_count(&Position::startpos()).unwrap(), 20);

        let stalemate = rules.parse_fen("k7/2Q5/1K6/8/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(rules.outcome(&stalemate).unwrap(), Some(Outcome::Stalemate));

        let mated = play(&rules, &["f2f3", "e7e5", "g2g4", "d8h4"]);
        assert_eq!(rules.outcome(&mated).unwrap(), Some(Outcome::Checkmate));
        assert_eq!(rules.legal_move_count(&mated).unwrap(), 0);

        let only_move = rules.parse_fen("k7/8/1K6/8/8/8/8/7R b - - 0 1").unwrap();
        assert_eq!(rules.legal_move_count(&only_move).unwrap(), 1);
        assert_eq!(rules.outcome(&only_move).unwrap(), None);
    }
}
