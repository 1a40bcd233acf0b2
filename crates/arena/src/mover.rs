//! Move sources for the scheduler: the embedded search and an external
//! UCI engine behind one async trait.

use std::sync::Arc;

use async_trait::async_trait;
use chess_core::{ChessPosition, FenError};
use thiserror::Error;
use tracing::debug;

use crate::models::{MoverConfig, MoverKind};
use crate::stockfish::{PositionDump, StockfishClient, UciError};

#[derive(Error, Debug)]
pub enum MoverError {
    #[error("engine protocol error: {0}")]
    Protocol(#[from] UciError),

    #[error("invalid position: {0}")]
    InvalidPosition(#[from] FenError),

    #[error("search failed: {0}")]
    Search(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveChoice {
    Move(String),
    NoLegalMove,
}

/// Position after a move, as reported by the mover that applied it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub fen: String,
    /// Mover-specific identity key, logged with each commit. Repetition
    /// counting uses the codec key.
    pub key: String,
    pub in_check: bool,
}

impl From<PositionDump> for Inspection {
    fn from(dump: PositionDump) -> Self {
        let in_check = dump.in_check();
        Self {
            fen: dump.fen,
            key: dump.key,
            in_check,
        }
    }
}

impl From<&ChessPosition> for Inspection {
    fn from(pos: &ChessPosition) -> Self {
        Self {
            fen: pos.to_fen(),
            key: pos.position_key(),
            in_check: pos.is_check(),
        }
    }
}

#[async_trait]
pub trait Mover: Send + Sync {
    async fn choose_move(&self, fen: &str, cfg: &MoverConfig) -> Result<MoveChoice, MoverError>;

    /// Applies `uci` to `fen`. An illegal move reports the unchanged position.
    async fn apply_and_inspect(&self, fen: &str, uci: &str) -> Result<Inspection, MoverError>;
}

/// The built-in negamax search.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedMover;

#[async_trait]
impl Mover for EmbeddedMover {
    async fn choose_move(&self, fen: &str, cfg: &MoverConfig) -> Result<MoveChoice, MoverError> {
        let fen = fen.to_string();
        let strength = cfg.strength;
        let movetime_ms = cfg.movetime_ms;

        // Search is CPU-bound; keep it off the async workers
        let outcome = tokio::task::spawn_blocking(move || {
            chess_search::choose_move(&fen, strength, movetime_ms)
        })
        .await
        .map_err(|e| MoverError::Search(e.to_string()))??;

        debug!(
            depth = outcome.depth_completed,
            nodes = outcome.nodes,
            score = outcome.score,
            "Embedded search done"
        );

        Ok(match outcome.best_move_uci() {
            Some(uci) => MoveChoice::Move(uci),
            None => MoveChoice::NoLegalMove,
        })
    }

    async fn apply_and_inspect(&self, fen: &str, uci: &str) -> Result<Inspection, MoverError> {
        let pos = ChessPosition::parse(fen)?;
        match pos.apply_uci(uci) {
            Ok(next) => Ok(Inspection::from(&next)),
            Err(e) => {
                debug!(uci, error = %e, "Move not applied");
                Ok(Inspection::from(&pos))
            }
        }
    }
}

/// An external UCI engine shared through one client.
#[derive(Clone)]
pub struct ProcessMover {
    client: Arc<StockfishClient>,
}

impl ProcessMover {
    pub fn new(client: Arc<StockfishClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Mover for ProcessMover {
    async fn choose_move(&self, fen: &str, cfg: &MoverConfig) -> Result<MoveChoice, MoverError> {
        let best = self.client.best_move(fen, cfg).await?;
        Ok(match best.uci {
            Some(uci) => MoveChoice::Move(uci),
            None => MoveChoice::NoLegalMove,
        })
    }

    async fn apply_and_inspect(&self, fen: &str, uci: &str) -> Result<Inspection, MoverError> {
        Ok(self.client.apply_and_inspect(fen, uci).await?.into())
    }
}

/// One mover per non-human kind.
#[derive(Clone)]
pub struct Movers {
    pub embedded: Arc<dyn Mover>,
    pub external: Arc<dyn Mover>,
}

impl Movers {
    pub fn new(client: Arc<StockfishClient>) -> Self {
        Self {
            embedded: Arc::new(EmbeddedMover),
            external: Arc::new(ProcessMover::new(client)),
        }
    }

    /// `None` for human sides.
    pub fn resolve(&self, kind: MoverKind) -> Option<Arc<dyn Mover>> {
        match kind {
            MoverKind::EmbeddedSearch => Some(self.embedded.clone()),
            MoverKind::ExternalEngine => Some(self.external.clone()),
            MoverKind::Human => None,
        }
    }
}
