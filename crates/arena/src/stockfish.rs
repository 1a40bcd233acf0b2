//! UCI engine client over a child process (async I/O).
//!
//! `UciProcess` owns one spawned engine. A reader task forwards stdout lines
//! over a channel and every wait is a receive with a deadline, so a hung
//! engine surfaces as `UciError::Timeout` instead of blocking forever.
//! `StockfishClient` lazily starts a single process, serializes access to it
//! and throws it away after any error.

use std::process::Stdio;
use std::time::Duration;

use chess_core::StrengthMode;
use shakmaty::uci::UciMove;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::models::MoverConfig;

#[derive(Error, Debug)]
pub enum UciError {
    #[error("failed to spawn engine '{path}': {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for '{waiting_for}'")]
    Timeout { waiting_for: String },

    #[error("malformed engine response: {0}")]
    Malformed(String),

    #[error("engine process exited")]
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UciTimeouts {
    /// `uci` -> `uciok`
    pub handshake: Duration,
    /// `isready` -> `readyok`
    pub ready: Duration,
}

impl Default for UciTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_millis(2500),
            ready: Duration::from_millis(2000),
        }
    }
}

/// Budget for a `go movetime` reply: the movetime plus two seconds, at least three.
pub fn go_timeout(movetime_ms: u32) -> Duration {
    (Duration::from_millis(u64::from(movetime_ms)) + Duration::from_secs(2))
        .max(Duration::from_secs(3))
}

/// Parsed `bestmove` line. `uci` is `None` when the engine has no legal move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestMove {
    pub uci: Option<String>,
    pub ponder: Option<String>,
}

/// Parsed output of the `d` diagnostic command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionDump {
    pub fen: String,
    pub key: String,
    pub checkers: Vec<String>,
}

impl PositionDump {
    pub fn in_check(&self) -> bool {
        !self.checkers.is_empty()
    }
}

fn parse_bestmove(line: &str) -> Result<BestMove, UciError> {
    let mut parts = line.split_whitespace();
    if parts.next() != Some("bestmove") {
        return Err(UciError::Malformed(line.to_string()));
    }
    let mv = parts
        .next()
        .ok_or_else(|| UciError::Malformed(line.to_string()))?;

    if mv == "(none)" || mv == "0000" {
        return Ok(BestMove {
            uci: None,
            ponder: None,
        });
    }
    if mv.parse::<UciMove>().is_err() {
        return Err(UciError::Malformed(line.to_string()));
    }

    let ponder = match (parts.next(), parts.next()) {
        (Some("ponder"), Some(p)) => Some(p.to_string()),
        _ => None,
    };

    Ok(BestMove {
        uci: Some(mv.to_string()),
        ponder,
    })
}

fn parse_position_dump(lines: &[String]) -> Result<PositionDump, UciError> {
    let mut fen = None;
    let mut key = None;
    let mut checkers = Vec::new();

    for line in lines {
        if let Some(rest) = line.strip_prefix("Fen:") {
            fen = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("Key:") {
            key = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("Checkers:") {
            checkers = rest.split_whitespace().map(String::from).collect();
        }
    }

    let fen = fen
        .filter(|f| !f.is_empty())
        .ok_or_else(|| UciError::Malformed("diagnostic output has no Fen line".into()))?;
    let key = key
        .filter(|k| !k.is_empty())
        .ok_or_else(|| UciError::Malformed("diagnostic output has no Key line".into()))?;

    Ok(PositionDump { fen, key, checkers })
}

/// One running UCI engine process.
pub struct UciProcess {
    child: Child,
    stdin: ChildStdin,
    lines: mpsc::UnboundedReceiver<String>,
    reader: JoinHandle<()>,
}

impl UciProcess {
    /// Spawn the engine and complete the `uci`/`uciok` handshake.
    pub async fn spawn(path: &str, args: &[String], timeouts: &UciTimeouts) -> Result<Self, UciError> {
        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| UciError::Spawn {
                path: path.to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(UciError::Exited)?;
        let stdout = child.stdout.take().ok_or(UciError::Exited)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        let mut process = Self {
            child,
            stdin,
            lines: rx,
            reader,
        };

        process.send("uci").await?;
        process.wait_for("uciok", timeouts.handshake).await?;

        Ok(process)
    }

    async fn send(&mut self, cmd: &str) -> Result<(), UciError> {
        debug!(cmd, "UCI <");
        self.stdin.write_all(format!("{cmd}\n").as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn next_line(&mut self, deadline: Instant, waiting_for: &str) -> Result<String, UciError> {
        match timeout_at(deadline, self.lines.recv()).await {
            Ok(Some(line)) => {
                let trimmed = line.trim().to_string();
                debug!(line = %trimmed, "UCI >");
                Ok(trimmed)
            }
            Ok(None) => Err(UciError::Exited),
            Err(_) => Err(UciError::Timeout {
                waiting_for: waiting_for.to_string(),
            }),
        }
    }

    async fn wait_for(&mut self, expected: &str, limit: Duration) -> Result<(), UciError> {
        let deadline = Instant::now() + limit;
        loop {
            if self.next_line(deadline, expected).await? == expected {
                return Ok(());
            }
        }
    }

    /// Discard output left over from earlier commands.
    fn drain(&mut self) {
        while self.lines.try_recv().is_ok() {}
    }

    pub async fn is_ready(&mut self, limit: Duration) -> Result<(), UciError> {
        self.send("isready").await?;
        self.wait_for("readyok", limit).await
    }

    pub async fn set_option(&mut self, name: &str, value: &str, limit: Duration) -> Result<(), UciError> {
        self.send(&format!("setoption name {name} value {value}")).await?;
        self.is_ready(limit).await
    }

    pub async fn new_game(&mut self, limit: Duration) -> Result<(), UciError> {
        self.send("ucinewgame").await?;
        self.is_ready(limit).await
    }

    pub async fn set_position(&mut self, fen: &str, moves: &[&str]) -> Result<(), UciError> {
        if moves.is_empty() {
            self.send(&format!("position fen {fen}")).await
        } else {
            self.send(&format!("position fen {fen} moves {}", moves.join(" ")))
                .await
        }
    }

    pub async fn go_movetime(&mut self, movetime_ms: u32) -> Result<BestMove, UciError> {
        self.send(&format!("go movetime {movetime_ms}")).await?;
        let deadline = Instant::now() + go_timeout(movetime_ms);
        loop {
            let line = self.next_line(deadline, "bestmove").await?;
            if line.starts_with("bestmove") {
                return parse_bestmove(&line);
            }
        }
    }

    /// Runs `d` then `isready` and parses everything printed before `readyok`.
    pub async fn display(&mut self, limit: Duration) -> Result<PositionDump, UciError> {
        self.send("d").await?;
        self.send("isready").await?;
        let deadline = Instant::now() + limit;
        let mut lines = Vec::new();
        loop {
            let line = self.next_line(deadline, "readyok").await?;
            if line == "readyok" {
                break;
            }
            lines.push(line);
        }
        parse_position_dump(&lines)
    }

    /// Best-effort `quit`, then kill whatever is left.
    pub async fn quit(mut self) {
        let _ = self.send("quit").await;
        let _ = timeout(Duration::from_millis(500), self.child.wait()).await;
        let _ = self.child.start_kill();
    }
}

impl Drop for UciProcess {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        let _ = self.child.start_kill();
        self.reader.abort();
    }
}

/// Shared client for one external engine executable.
pub struct StockfishClient {
    path: String,
    args: Vec<String>,
    timeouts: UciTimeouts,
    process: Mutex<Option<UciProcess>>,
}

impl StockfishClient {
    pub fn new(path: impl Into<String>, timeouts: UciTimeouts) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            timeouts,
            process: Mutex::new(None),
        }
    }

    /// Extra command-line arguments for the engine process.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    async fn ensure_started<'a>(
        &self,
        slot: &'a mut Option<UciProcess>,
    ) -> Result<&'a mut UciProcess, UciError> {
        if slot.is_none() {
            let mut process = UciProcess::spawn(&self.path, &self.args, &self.timeouts).await?;
            process
                .set_option("Threads", "1", self.timeouts.ready)
                .await?;
            info!(path = %self.path, "Engine process started");
            *slot = Some(process);
        }
        let process = slot.as_mut().ok_or(UciError::Exited)?;
        process.drain();
        Ok(process)
    }

    async fn configure(&self, process: &mut UciProcess, cfg: &MoverConfig) -> Result<(), UciError> {
        let ready = self.timeouts.ready;
        process.new_game(ready).await?;

        let value = cfg.strength.value().to_string();
        match cfg.strength.mode() {
            StrengthMode::SkillLevel => {
                process.set_option("UCI_LimitStrength", "false", ready).await?;
                process.set_option("Skill Level", &value, ready).await?;
            }
            StrengthMode::TargetRating => {
                process.set_option("UCI_LimitStrength", "true", ready).await?;
                process.set_option("UCI_Elo", &value, ready).await?;
            }
        }
        for (name, value) in &cfg.engine_options {
            process.set_option(name, value, ready).await?;
        }
        Ok(())
    }

    async fn run_best_move(
        &self,
        slot: &mut Option<UciProcess>,
        fen: &str,
        cfg: &MoverConfig,
    ) -> Result<BestMove, UciError> {
        let process = self.ensure_started(slot).await?;
        self.configure(process, cfg).await?;
        process.set_position(fen, &[]).await?;
        process.is_ready(self.timeouts.ready).await?;
        process.go_movetime(cfg.movetime_ms).await
    }

    async fn run_inspect(
        &self,
        slot: &mut Option<UciProcess>,
        fen: &str,
        uci: Option<&str>,
    ) -> Result<PositionDump, UciError> {
        let ready = self.timeouts.ready;
        let process = self.ensure_started(slot).await?;
        process.new_game(ready).await?;
        match uci {
            Some(mv) => process.set_position(fen, &[mv]).await?,
            None => process.set_position(fen, &[]).await?,
        }
        process.is_ready(ready).await?;
        process.display(ready).await
    }

    /// A failed sequence leaves the engine in an unknown state, so the
    /// process is dropped and the next call starts a fresh one.
    fn discard_on_error<T>(
        &self,
        slot: &mut Option<UciProcess>,
        result: Result<T, UciError>,
    ) -> Result<T, UciError> {
        if let Err(e) = &result {
            warn!(path = %self.path, error = %e, "Discarding engine process");
            *slot = None;
        }
        result
    }

    /// Configure strength, set the position and search for `cfg.movetime_ms`.
    pub async fn best_move(&self, fen: &str, cfg: &MoverConfig) -> Result<BestMove, UciError> {
        let mut guard = self.process.lock().await;
        let result = self.run_best_move(&mut guard, fen, cfg).await;
        self.discard_on_error(&mut guard, result)
    }

    /// Play `uci` from `fen` and report the resulting position. An illegal
    /// move leaves the reported position equal to `fen`.
    pub async fn apply_and_inspect(&self, fen: &str, uci: &str) -> Result<PositionDump, UciError> {
        let mut guard = self.process.lock().await;
        let result = self.run_inspect(&mut guard, fen, Some(uci)).await;
        self.discard_on_error(&mut guard, result)
    }

    pub async fn inspect(&self, fen: &str) -> Result<PositionDump, UciError> {
        let mut guard = self.process.lock().await;
        let result = self.run_inspect(&mut guard, fen, None).await;
        self.discard_on_error(&mut guard, result)
    }

    pub async fn is_running(&self) -> bool {
        self.process.lock().await.is_some()
    }

    /// Stop the engine process if one is running.
    pub async fn close(&self) {
        let process = self.process.lock().await.take();
        if let Some(process) = process {
            process.quit().await;
            info!(path = %self.path, "Engine process stopped");
        }
    }
}
