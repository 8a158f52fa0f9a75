//! Line-oriented session with one engine process.
//!
//! [`ProtocolChannel`] frames [`GuiCommand`]s onto the engine's input and
//! reads [`EngineMessage`]s back, strictly in order. It knows the UCI
//! grammar but nothing about chess.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tracing::{debug, trace};
use uci::{EngineMessage, GuiCommand};

use crate::error::ChannelError;

pub type EngineReader = Box<dyn AsyncRead + Send + Unpin>;
pub type EngineWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Handle used to terminate an engine process.
pub trait EngineProcess: Send {
    /// Kill the process without waiting for it to exit.
    fn terminate(&mut self);
}

impl EngineProcess for Child {
    fn terminate(&mut self) {
        if let Err(e) = self.start_kill() {
            debug!(error = %e, "Engine process already gone");
        }
    }
}

/// Streams and handle of a freshly started engine.
pub struct EngineIo {
    pub reader: EngineReader,
    pub writer: EngineWriter,
    pub process: Box<dyn EngineProcess>,
}

/// Starts engine processes.
pub trait EngineLauncher: Send + Sync + 'static {
    fn launch(&self) -> BoxFuture<'_, Result<EngineIo, ChannelError>>;
}

/// Spawns an executable and talks to it over stdin/stdout.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    path: PathBuf,
}

impl ProcessLauncher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EngineLauncher for ProcessLauncher {
    fn launch(&self) -> BoxFuture<'_, Result<EngineIo, ChannelError>> {
        Box::pin(async move {
            let mut child = Command::new(&self.path)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    ChannelError::HandshakeFailed(format!(
                        "failed to spawn {}: {}",
                        self.path.display(),
                        e
                    ))
                })?;

            let stdin = child.stdin.take();
            let stdout = child.stdout.take();
            match (stdin, stdout) {
                (Some(stdin), Some(stdout)) => Ok(EngineIo {
                    reader: Box::new(stdout),
                    writer: Box::new(stdin),
                    process: Box::new(child),
                }),
                _ => Err(ChannelError::HandshakeFailed("engine stdio not captured".to_string())),
            }
        })
    }
}

/// What the engine told us during the handshake.
#[derive(Debug, Clone, Default)]
pub struct EngineIdentity {
    pub name: String,
    pub author: Option<String>,
}

/// Ordered command/response session with one engine.
pub struct ProtocolChannel {
    lines: Lines<BufReader<EngineReader>>,
    writer: EngineWriter,
    poisoned: bool,
}

impl ProtocolChannel {
    pub fn new(reader: EngineReader, writer: EngineWriter) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
            poisoned: false,
        }
    }

    /// Write one command followed by the line terminator.
    ///
    /// # Errors
    ///
    /// `ChannelError::Closed` if the engine's input is gone, or if an earlier
    /// read timed out and left the stream in an unknown state.
    pub async fn send(&mut self, command: &GuiCommand) -> Result<(), ChannelError> {
        if self.poisoned {
            return Err(ChannelError::Closed("channel abandoned after timeout".to_string()));
        }

        let line = command.to_uci();
        trace!(line = %line, "engine <");
        let framed = format!("{}\n", line);
        self.writer
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| ChannelError::Closed(format!("write failed: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| ChannelError::Closed(format!("flush failed: {}", e)))
    }

    /// Collect engine messages until `done` accepts one, or `timeout` passes.
    ///
    /// The accepting message is the last element of the returned vector.
    /// Lines that are not protocol messages are skipped.
    ///
    /// # Errors
    ///
    /// - `ChannelError::Closed` on end of stream or a read error
    /// - `ChannelError::Timeout` when no accepting message arrived in time
    pub async fn read_until<F>(
        &mut self,
        timeout: Duration,
        mut done: F,
    ) -> Result<Vec<EngineMessage>, ChannelError>
    where
        F: FnMut(&EngineMessage) -> bool,
    {
        if self.poisoned {
            return Err(ChannelError::Closed("channel abandoned after timeout".to_string()));
        }

        let lines = &mut self.lines;
        let collect = async move {
            let mut messages = Vec::new();
            loop {
                let line = lines
                    .next_line()
                    .await
                    .map_err(|e| ChannelError::Closed(format!("read failed: {}", e)))?
                    .ok_or_else(|| ChannelError::Closed("engine closed its output".to_string()))?;
                trace!(line = %line, "engine >");

                let Some(message) = EngineMessage::parse(&line) else {
                    continue;
                };
                let finished = done(&message);
                messages.push(message);
                if finished {
                    return Ok(messages);
                }
            }
        };

        match tokio::time::timeout(timeout, collect).await {
            Ok(result) => result,
            Err(_) => {
                self.poisoned = true;
                Err(ChannelError::Timeout(timeout))
            }
        }
    }

    /// Send `isready` and wait for `readyok`.
    pub async fn sync(&mut self, timeout: Duration) -> Result<(), ChannelError> {
        self.send(&GuiCommand::IsReady).await?;
        self.read_until(timeout, |m| *m == EngineMessage::ReadyOk).await?;
        Ok(())
    }

    /// Negotiate UCI mode and apply options. Runs once per process.
    ///
    /// # Errors
    ///
    /// Every failure is reported as `ChannelError::HandshakeFailed`.
    pub async fn handshake(
        &mut self,
        options: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<EngineIdentity, ChannelError> {
        let failed = |stage: &str, e: ChannelError| {
            ChannelError::HandshakeFailed(format!("{}: {}", stage, e))
        };

        self.send(&GuiCommand::Uci).await.map_err(|e| failed("uci", e))?;
        let replies = self
            .read_until(timeout, |m| *m == EngineMessage::UciOk)
            .await
            .map_err(|e| failed("waiting for uciok", e))?;

        let mut identity = EngineIdentity::default();
        for reply in replies {
            if let EngineMessage::Id { name, author } = reply {
                if let Some(name) = name {
                    identity.name = name;
                }
                if author.is_some() {
                    identity.author = author;
                }
            }
        }
        if identity.name.is_empty() {
            identity.name = "Unknown Engine".to_string();
        }

        // Sorted so every process of a pool is configured identically.
        let mut sorted: Vec<_> = options.iter().collect();
        sorted.sort();
        for (name, value) in sorted {
            let command = GuiCommand::SetOption { name: name.clone(), value: Some(value.clone()) };
            self.send(&command).await.map_err(|e| failed("setoption", e))?;
        }

        self.sync(timeout).await.map_err(|e| failed("waiting for readyok", e))?;
        debug!(engine = %identity.name, "Engine handshake complete");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Channel connected to an in-memory peer playing the engine side.
    fn connected() -> (ProtocolChannel, tokio::io::DuplexStream) {
        let (ours, theirs) = duplex(4096);
        let (reader, writer) = split(ours);
        (ProtocolChannel::new(Box::new(reader), Box::new(writer)), theirs)
    }

    #[tokio::test]
    async fn send_appends_terminator() {
        let (mut channel, peer) = connected();
        channel.send(&GuiCommand::IsReady).await.unwrap();
        channel.send(&GuiCommand::Quit).await.unwrap();

        let mut lines = BufReader::new(peer).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("isready"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("quit"));
    }

    #[tokio::test]
    async fn read_until_stops_at_sentinel() {
        let (mut channel, mut peer) = connected();
        peer.write_all(b"info depth 1 score cp 5 pv e2e4\nnoise\nbestmove e2e4\ninfo depth 2\n")
            .await
            .unwrap();

        let messages = channel
            .read_until(Duration::from_secs(1), EngineMessage::is_best_move)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].is_best_move());
    }

    #[tokio::test]
    async fn read_until_times_out_and_poisons() {
        let (mut channel, mut peer) = connected();
        peer.write_all(b"info depth 1\n").await.unwrap();

        let err = channel
            .read_until(Duration::from_millis(50), EngineMessage::is_best_move)
            .await
            .unwrap_err();
        assert_eq!(err, ChannelError::Timeout(Duration::from_millis(50)));
        assert!(matches!(channel.send(&GuiCommand::Stop).await, Err(ChannelError::Closed(_))));
    }

    #[tokio::test]
    async fn closed_peer_reports_closed() {
        let (mut channel, peer) = connected();
        drop(peer);

        let err = channel
            .read_until(Duration::from_secs(1), |_| true)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Closed(_)));
    }

    #[tokio::test]
    async fn handshake_reads_identity_and_sets_options() {
        let (mut channel, peer) = connected();
        let (peer_read, mut peer_write) = split(peer);

        let engine = tokio::spawn(async move {
            let mut lines = BufReader::new(peer_read).lines();
            let mut received = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                received.push(line.clone());
                match line.as_str() {
                    "uci" => peer_write
                        .write_all(b"id name FakeFish 1\nid author Nobody\noption name Hash type spin\nuciok\n")
                        .await
                        .unwrap(),
                    "isready" => {
                        peer_write.write_all(b"readyok\n").await.unwrap();
                        break;
                    }
                    _ => {}
                }
            }
            received
        });

        let options = HashMap::from([
            ("Threads".to_string(), "1".to_string()),
            ("Hash".to_string(), "64".to_string()),
        ]);
        let identity = channel.handshake(&options, Duration::from_secs(1)).await.unwrap();
        assert_eq!(identity.name, "FakeFish 1");
        assert_eq!(identity.author.as_deref(), Some("Nobody"));

        let received = engine.await.unwrap();
        assert_eq!(
            received,
            vec![
                "uci",
                "setoption name Hash value 64",
                "setoption name Threads value 1",
                "isready"
            ]
        );
    }

    #[tokio::test]
    async fn handshake_fails_on_silent_engine() {
        let (mut channel, _peer) = connected();
        let err = channel
            .handshake(&HashMap::new(), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::HandshakeFailed(_)));
    }
}
