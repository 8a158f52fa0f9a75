//! In-process stand-in for a UCI engine, driven over duplex streams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;
use uci::{EngineMessage, GuiCommand, InfoBuilder, ScoreBound};

use crate::channel::{EngineIo, EngineLauncher, EngineProcess};
use crate::error::ChannelError;
use crate::position::START_FEN;

/// What the fake does when it receives `go`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Answer,
    /// Exit without answering.
    Crash,
    /// Keep the process alive but never answer.
    Hang,
}

#[derive(Default)]
pub(crate) struct FakeEngine {
    replies: Mutex<VecDeque<Reply>>,
    failing_launches: AtomicUsize,
    launches: AtomicUsize,
    searches: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    searched: Mutex<Vec<String>>,
    delay: Duration,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay, ..Self::default() })
    }

    /// Queue replies for the next `go` commands; afterwards the fake answers.
    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.replies.lock().unwrap().extend(replies);
    }

    pub fn fail_next_launches(&self, count: usize) {
        self.failing_launches.store(count, Ordering::SeqCst);
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Position keys in the order their searches started.
    pub fn searched(&self) -> Vec<String> {
        self.searched.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Reply {
        self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Answer)
    }
}

/// Deterministic centipawn score for a position key.
pub(crate) fn score_for(key: &str) -> i32 {
    let sum: u32 = key.bytes().map(u32::from).sum();
    (sum % 301) as i32 - 150
}

fn position_key(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

/// Full output of one search: progressively deeper info lines, then `bestmove`.
pub(crate) fn search_output(fen: &str, depth: u32, lines: u32) -> String {
    const MOVES: [&str; 3] = ["e2e4", "d2d4", "g1f3"];
    let base = score_for(&position_key(fen));

    let mut out = String::from("info string fake search starting\n");
    for d in 1..=depth {
        for k in 1..=lines {
            // Shallow iterations disagree with the final answer on purpose.
            let score = base - (k as i32 - 1) * 40 + (depth - d) as i32 * 7;
            let first = MOVES[(k as usize - 1) % MOVES.len()];
            let info = InfoBuilder::new()
                .depth(d)
                .multipv(k)
                .score_cp(score)
                .nodes(u64::from(d) * 1000)
                .time(u64::from(d))
                .pv([first, "e7e5"])
                .build();
            out.push_str(&info.to_uci());
            out.push('\n');
        }
        let bound = InfoBuilder::new()
            .depth(d)
            .score_cp(base + 500)
            .bound(ScoreBound::Lower)
            .pv(["h2h4"])
            .build();
        out.push_str(&bound.to_uci());
        out.push('\n');
    }
    let best = EngineMessage::BestMove { mv: Some(MOVES[0].to_string()), ponder: Some("e7e5".to_string()) };
    out.push_str(&best.to_uci());
    out.push('\n');
    out
}

async fn run(engine: Arc<FakeEngine>, stream: DuplexStream) {
    let (read, mut write) = split(stream);
    let mut lines = BufReader::new(read).lines();
    let mut fen = START_FEN.to_string();
    let mut multipv = 1;

    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match GuiCommand::parse(&line) {
            Ok(GuiCommand::Uci) => "id name FakeFish\nid author Test Suite\nuciok\n".to_string(),
            Ok(GuiCommand::IsReady) => "readyok\n".to_string(),
            Ok(GuiCommand::SetOption { name, value }) => {
                if name == "MultiPV" {
                    multipv = value.and_then(|v| v.parse().ok()).unwrap_or(1);
                }
                continue;
            }
            Ok(GuiCommand::Position { fen: Some(f), .. }) => {
                fen = f;
                continue;
            }
            Ok(GuiCommand::Go(opts)) => {
                engine.searches.fetch_add(1, Ordering::SeqCst);
                match engine.next_reply() {
                    Reply::Crash => return,
                    Reply::Hang => continue,
                    Reply::Answer => {
                        engine.searched.lock().unwrap().push(position_key(&fen));
                        let now = engine.active.fetch_add(1, Ordering::SeqCst) + 1;
                        engine.max_active.fetch_max(now, Ordering::SeqCst);
                        if !engine.delay.is_zero() {
                            tokio::time::sleep(engine.delay).await;
                        }
                        engine.active.fetch_sub(1, Ordering::SeqCst);
                        search_output(&fen, opts.depth.unwrap_or(6), multipv)
                    }
                }
            }
            Ok(GuiCommand::Quit) => return,
            _ => continue,
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

struct FakeProcess(JoinHandle<()>);

impl EngineProcess for FakeProcess {
    fn terminate(&mut self) {
        self.0.abort();
    }
}

pub(crate) struct FakeLauncher(pub Arc<FakeEngine>);

impl EngineLauncher for FakeLauncher {
    fn launch(&self) -> BoxFuture<'_, Result<EngineIo, ChannelError>> {
        let engine = Arc::clone(&self.0);
        Box::pin(async move {
            engine.launches.fetch_add(1, Ordering::SeqCst);
            let refused = engine
                .failing_launches
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(ChannelError::HandshakeFailed("launch refused".to_string()));
            }

            let (client, server) = duplex(64 * 1024);
            let task = tokio::spawn(run(engine, server));
            let (reader, writer) = split(client);
            Ok(EngineIo {
                reader: Box::new(reader),
                writer: Box::new(writer),
                process: Box::new(FakeProcess(task)),
            })
        })
    }
}
