//! Position text (FEN) parsing, validation and the small rules queries the
//! scheduler needs: side to move, halfmove clock, repetition keys, the
//! conservative insufficient-material rule and move application.

use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Position, Rank, Role, Square};
use thiserror::Error;

use crate::types::Side;

pub const STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FenError {
    #[error("missing {0} field")]
    MissingField(&'static str),

    #[error("invalid piece placement: {0}")]
    Placement(String),

    #[error("invalid side to move '{0}'")]
    SideToMove(String),

    #[error("invalid castling rights '{0}'")]
    Castling(String),

    #[error("invalid en passant square '{0}'")]
    EnPassant(String),

    #[error("invalid halfmove clock '{0}'")]
    HalfmoveClock(String),

    #[error("invalid fullmove number '{0}'")]
    FullmoveNumber(String),

    #[error("illegal position: {0}")]
    Illegal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    #[error("malformed move '{0}'")]
    Malformed(String),

    #[error("illegal move '{0}'")]
    Illegal(String),

    #[error("invalid square '{0}'")]
    Square(String),
}

/// The six whitespace-separated fields of a position text, validated
/// individually.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenFields<'a> {
    pub placement: &'a str,
    pub side_to_move: Side,
    pub castling: &'a str,
    pub en_passant: Option<Square>,
    pub halfmove_clock: u32,
    pub fullmove_number: u32,
}

impl<'a> FenFields<'a> {
    pub fn parse(text: &'a str) -> Result<Self, FenError> {
        let mut parts = text.split_whitespace();

        let placement = parts.next().ok_or(FenError::MissingField("placement"))?;
        validate_placement(placement)?;

        let side_to_move =
            Side::from_fen_field(parts.next().ok_or(FenError::MissingField("side to move"))?)?;

        let castling = parts.next().ok_or(FenError::MissingField("castling"))?;
        validate_castling(castling)?;

        let ep_field = parts.next().ok_or(FenError::MissingField("en passant"))?;
        let en_passant = parse_en_passant(ep_field)?;

        let hm_field = parts.next().ok_or(FenError::MissingField("halfmove clock"))?;
        let halfmove_clock = hm_field
            .parse()
            .map_err(|_| FenError::HalfmoveClock(hm_field.to_string()))?;

        let fm_field = parts.next().ok_or(FenError::MissingField("fullmove number"))?;
        let fullmove_number: u32 = fm_field
            .parse()
            .map_err(|_| FenError::FullmoveNumber(fm_field.to_string()))?;
        if fullmove_number == 0 {
            return Err(FenError::FullmoveNumber(fm_field.to_string()));
        }

        if let Some(extra) = parts.next() {
            return Err(FenError::Illegal(format!("unexpected trailing field '{extra}'")));
        }

        Ok(Self {
            placement,
            side_to_move,
            castling,
            en_passant,
            halfmove_clock,
            fullmove_number,
        })
    }
}

/// Reads only the side-to-move field.
pub fn side_to_move(text: &str) -> Result<Side, FenError> {
    let field = text
        .split_whitespace()
        .nth(1)
        .ok_or(FenError::MissingField("side to move"))?;
    Side::from_fen_field(field)
}

/// Reads only the halfmove clock field.
pub fn halfmove_clock(text: &str) -> Result<u32, FenError> {
    let field = text
        .split_whitespace()
        .nth(4)
        .ok_or(FenError::MissingField("halfmove clock"))?;
    field
        .parse()
        .map_err(|_| FenError::HalfmoveClock(field.to_string()))
}

/// Parses a board square such as `e4`.
pub fn parse_square(text: &str) -> Result<Square, MoveError> {
    let normalized = text.trim().to_ascii_lowercase();
    let bytes = normalized.as_bytes();
    if bytes.len() != 2 || !(b'a'..=b'h').contains(&bytes[0]) || !(b'1'..=b'8').contains(&bytes[1]) {
        return Err(MoveError::Square(text.to_string()));
    }
    normalized
        .parse::<Square>()
        .map_err(|_| MoveError::Square(text.to_string()))
}

/// Insufficient material, judged from piece placement alone.
///
/// Deliberately conservative: bare kings, a single minor piece, or bishops
/// only with at most one bishop per side. Knight pairs and mixed minor
/// endings are not treated as drawn.
pub fn is_insufficient_material(text: &str) -> Result<bool, FenError> {
    let placement = text
        .split_whitespace()
        .next()
        .ok_or(FenError::MissingField("placement"))?;
    validate_placement(placement)?;

    let pieces: Vec<char> = placement
        .chars()
        .filter(|c| c.is_ascii_alphabetic() && !matches!(c, 'K' | 'k'))
        .collect();

    if pieces.is_empty() {
        return Ok(true);
    }
    if pieces
        .iter()
        .any(|c| matches!(c, 'P' | 'p' | 'R' | 'r' | 'Q' | 'q'))
    {
        return Ok(false);
    }
    if pieces.len() == 1 {
        return Ok(true);
    }

    let white_bishops = pieces.iter().filter(|&&c| c == 'B').count();
    let black_bishops = pieces.iter().filter(|&&c| c == 'b').count();
    let only_bishops = white_bishops + black_bishops == pieces.len();
    Ok(only_bishops && white_bishops <= 1 && black_bishops <= 1)
}

fn validate_placement(placement: &str) -> Result<(), FenError> {
    let ranks: Vec<&str> = placement.split('/').collect();
    if ranks.len() != 8 {
        return Err(FenError::Placement(format!(
            "expected 8 ranks, found {}",
            ranks.len()
        )));
    }
    for rank in ranks {
        let mut files = 0u32;
        for c in rank.chars() {
            match c {
                '1'..='8' => files += c as u32 - '0' as u32,
                'p' | 'n' | 'b' | 'r' | 'q' | 'k' | 'P' | 'N' | 'B' | 'R' | 'Q' | 'K' => files += 1,
                other => {
                    return Err(FenError::Placement(format!("unexpected character '{other}'")))
                }
            }
        }
        if files != 8 {
            return Err(FenError::Placement(format!(
                "rank '{rank}' covers {files} files"
            )));
        }
    }
    Ok(())
}

fn validate_castling(field: &str) -> Result<(), FenError> {
    if field == "-" {
        return Ok(());
    }
    let mut seen = Vec::with_capacity(4);
    for c in field.chars() {
        if !matches!(c, 'K' | 'Q' | 'k' | 'q') || seen.contains(&c) {
            return Err(FenError::Castling(field.to_string()));
        }
        seen.push(c);
    }
    Ok(())
}

fn parse_en_passant(field: &str) -> Result<Option<Square>, FenError> {
    if field == "-" {
        return Ok(None);
    }
    let square = parse_square(field).map_err(|_| FenError::EnPassant(field.to_string()))?;
    if square.rank() != Rank::Third && square.rank() != Rank::Sixth {
        return Err(FenError::EnPassant(field.to_string()));
    }
    Ok(Some(square))
}

/// A fully validated, playable position.
#[derive(Debug, Clone)]
pub struct ChessPosition {
    pos: Chess,
}

impl ChessPosition {
    pub fn startpos() -> Self {
        Self {
            pos: Chess::default(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, FenError> {
        FenFields::parse(text)?;
        let fen = text
            .trim()
            .parse::<Fen>()
            .map_err(|e| FenError::Illegal(e.to_string()))?;
        let pos = fen
            .into_position::<Chess>(CastlingMode::Standard)
            .map_err(|e| FenError::Illegal(e.to_string()))?;
        Ok(Self { pos })
    }

    pub fn chess(&self) -> &Chess {
        &self.pos
    }

    pub fn to_fen(&self) -> String {
        Fen::from_position(self.pos.clone(), EnPassantMode::Legal).to_string()
    }

    pub fn side_to_move(&self) -> Side {
        Side::from(self.pos.turn())
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.pos.halfmoves()
    }

    /// Plies played since the fullmove counter started at 1.
    pub fn ply_number(&self) -> u32 {
        let black = u32::from(self.pos.turn() == Color::Black);
        (self.pos.fullmoves().get() - 1)
            .saturating_mul(2)
            .saturating_add(black)
    }

    /// Repetition fingerprint: 64-bit Zobrist hash as 16 uppercase hex digits.
    pub fn position_key(&self) -> String {
        let hash: Zobrist64 = self.pos.zobrist_hash(EnPassantMode::Legal);
        format!("{:016X}", hash.0)
    }

    pub fn is_check(&self) -> bool {
        self.pos.is_check()
    }

    pub fn has_legal_moves(&self) -> bool {
        !self.pos.legal_moves().is_empty()
    }

    /// Space-separated checking squares, empty when not in check.
    pub fn checkers(&self) -> String {
        self.pos
            .checkers()
            .into_iter()
            .map(|sq| sq.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Plays a move given in coordinate notation (`e2e4`, `e7e8q`, `e1g1`).
    pub fn apply_uci(&self, uci: &str) -> Result<ChessPosition, MoveError> {
        let parsed = uci
            .trim()
            .parse::<UciMove>()
            .map_err(|_| MoveError::Malformed(uci.to_string()))?;
        let mv = parsed
            .to_move(&self.pos)
            .map_err(|_| MoveError::Illegal(uci.to_string()))?;
        let mut next = self.pos.clone();
        next.play_unchecked(&mv);
        Ok(Self { pos: next })
    }

    /// Builds the coordinate move for a from/to pair, promoting pawns that
    /// reach the last rank to a queen.
    pub fn uci_for_squares(&self, from: Square, to: Square) -> String {
        let turn = self.pos.turn();
        let is_own_pawn = self
            .pos
            .board()
            .piece_at(from)
            .is_some_and(|p| p.role == Role::Pawn && p.color == turn);
        let last_rank = match turn {
            Color::White => Rank::Eighth,
            Color::Black => Rank::First,
        };
        if is_own_pawn && to.rank() == last_rank {
            format!("{from}{to}q")
        } else {
            format!("{from}{to}")
        }
    }
}

impl From<Chess> for ChessPosition {
    fn from(pos: Chess) -> Self {
        Self { pos }
    }
}
