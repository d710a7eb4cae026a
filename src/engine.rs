use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use chess::ChessMove;
use log::debug;
use thiserror::Error;

use crate::board::GameBoard;
use crate::moves::parse_coordinate;

pub const DEFAULT_MOVE_TIMEOUT: Duration = Duration::from_secs(60);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine could not be started: {0}")]
    Unavailable(String),
    #[error("engine did not respond within {0:?}")]
    Timeout(Duration),
    #[error("engine protocol error: {0}")]
    Protocol(String),
}

/// Deterministic move source used whenever the agent path fails. There is
/// no recovery layer below this one; every error is fatal to the turn.
pub trait FallbackProvider {
    fn best_move(&self, board: &GameBoard, depth: u32) -> Result<ChessMove, EngineError>;
}

/// A UCI engine invoked as a subprocess.
///
/// The process is scoped to a single query: spawned, searched and
/// terminated inside `best_move`, never held across turns. Dropping the
/// process handle kills the child, so the release happens on error paths
/// too.
pub struct UciFallback {
    binary: PathBuf,
    move_timeout: Duration,
}

impl UciFallback {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        UciFallback {
            binary: binary.into(),
            move_timeout: DEFAULT_MOVE_TIMEOUT,
        }
    }

    pub fn move_timeout(mut self, timeout: Duration) -> Self {
        self.move_timeout = timeout;
        self
    }
}

impl FallbackProvider for UciFallback {
    fn best_move(&self, board: &GameBoard, depth: u32) -> Result<ChessMove, EngineError> {
        let mut process = EngineProcess::spawn(&self.binary)?;
        let token = process.search(&board.fen(), depth, self.move_timeout)?;
        debug!("engine returned {token}");
        parse_coordinate(&token)
            .map_err(|_| EngineError::Protocol(format!("unparseable bestmove {token:?}")))
    }
}

struct EngineProcess {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
}

impl EngineProcess {
    fn spawn(binary: &Path) -> Result<Self, EngineError> {
        let mut child = Command::new(binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EngineError::Unavailable(format!("{}: {e}", binary.display())))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Unavailable("no stdin handle".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Unavailable("no stdout handle".to_string()))?;

        // Pipe reads cannot be bounded directly, so a reader thread feeds
        // a channel and every wait below goes through `recv_timeout`. The
        // thread exits when the process closes stdout or the receiver is
        // dropped.
        let (sender, lines) = mpsc::channel();
        thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if sender.send(line.trim().to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(EngineProcess { child, stdin, lines })
    }

    fn send(&mut self, command: &str) -> Result<(), EngineError> {
        writeln!(self.stdin, "{command}")
            .and_then(|_| self.stdin.flush())
            .map_err(|e| EngineError::Unavailable(format!("engine pipe closed: {e}")))
    }

    fn wait_for(&mut self, prefix: &str, timeout: Duration) -> Result<String, EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(EngineError::Timeout(timeout))?;
            match self.lines.recv_timeout(remaining) {
                Ok(line) if line.starts_with(prefix) => return Ok(line),
                Ok(_) => continue,
                Err(mpsc::RecvTimeoutError::Timeout) => return Err(EngineError::Timeout(timeout)),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(EngineError::Unavailable(
                        "engine closed its output".to_string(),
                    ))
                }
            }
        }
    }

    fn search(&mut self, fen: &str, depth: u32, timeout: Duration) -> Result<String, EngineError> {
        self.send("uci")?;
        self.wait_for("uciok", HANDSHAKE_TIMEOUT)?;
        self.send("isready")?;
        self.wait_for("readyok", HANDSHAKE_TIMEOUT)?;
        self.send(&format!("position fen {fen}"))?;
        self.send(&format!("go depth {depth}"))?;

        let line = self.wait_for("bestmove", timeout)?;
        let token = line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| EngineError::Protocol(format!("bad bestmove line {line:?}")))?;
        if token == "(none)" || token == "0000" {
            return Err(EngineError::Protocol("engine found no move".to_string()));
        }
        Ok(token.to_string())
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "quit");
        let _ = self.stdin.flush();
        if self.child.try_wait().ok().flatten().is_none() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}
