//! One engine process behind a single `evaluate` call.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uci::{EngineInfo, EngineMessage, GoOptions, GuiCommand};

use crate::channel::{EngineIdentity, EngineLauncher, EngineProcess, ProtocolChannel};
use crate::error::{ChannelError, EngineError};
use crate::evaluation::{Evaluation, PvLine, Score};
use crate::position::{AnalysisRequest, SearchLimit};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerStatus {
    Idle,
    Busy,
    /// The engine died or stopped answering; a restart is in progress.
    Crashed,
    /// Out of rotation until a health probe succeeds.
    Restarting,
}

impl WorkerStatus {
    pub fn is_healthy(self) -> bool {
        matches!(self, WorkerStatus::Idle | WorkerStatus::Busy)
    }
}

/// Settings shared by every worker of a pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `setoption` values sent after every (re)start.
    pub options: HashMap<String, String>,
    pub handshake_timeout: Duration,
    /// Round-trip budget for one search. Time-limited searches get their
    /// movetime added on top.
    pub request_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            options: HashMap::new(),
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

struct Session {
    channel: ProtocolChannel,
    process: Box<dyn EngineProcess>,
    multipv: u32,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.process.terminate();
    }
}

enum SearchFailure {
    /// The process is unusable and must be restarted.
    Channel(ChannelError),
    /// The engine answered, but not with a usable evaluation.
    Malformed(String),
}

impl From<ChannelError> for SearchFailure {
    fn from(e: ChannelError) -> Self {
        SearchFailure::Channel(e)
    }
}

impl fmt::Display for SearchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchFailure::Channel(e) => write!(f, "{}", e),
            SearchFailure::Malformed(reason) => write!(f, "malformed engine output: {}", reason),
        }
    }
}

/// Owns one engine process and its protocol channel.
pub struct EngineWorker<L: EngineLauncher> {
    id: usize,
    launcher: Arc<L>,
    config: Arc<WorkerConfig>,
    session: Option<Session>,
    status: WorkerStatus,
    identity: Option<EngineIdentity>,
    restarts: u32,
}

impl<L: EngineLauncher> EngineWorker<L> {
    /// Create a worker without starting its engine.
    ///
    /// The worker reports [`WorkerStatus::Restarting`] until [`probe`](Self::probe)
    /// succeeds.
    pub fn new(id: usize, launcher: Arc<L>, config: Arc<WorkerConfig>) -> Self {
        Self {
            id,
            launcher,
            config,
            session: None,
            status: WorkerStatus::Restarting,
            identity: None,
            restarts: 0,
        }
    }

    /// Create a worker and start its engine.
    ///
    /// # Errors
    ///
    /// Returns the launch or handshake failure.
    pub async fn start(id: usize, launcher: Arc<L>, config: Arc<WorkerConfig>) -> Result<Self, ChannelError> {
        let mut worker = Self::new(id, launcher, config);
        worker.probe().await?;
        Ok(worker)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    /// Name the engine reported in its last handshake.
    pub fn engine_name(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.name.as_str())
    }

    /// Number of crash recoveries so far.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Health check.
    ///
    /// A live engine only has to answer `isready`. A dead one is relaunched
    /// and handshaken first. On success the worker is `Idle`.
    pub async fn probe(&mut self) -> Result<(), ChannelError> {
        let alive = match self.session.as_mut() {
            Some(session) if self.status.is_healthy() => {
                session.channel.sync(self.config.handshake_timeout).await.is_ok()
            }
            _ => false,
        };

        let outcome = if alive { Ok(()) } else { self.connect().await };
        self.status = match outcome {
            Ok(()) => WorkerStatus::Idle,
            Err(_) => WorkerStatus::Restarting,
        };
        outcome
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        // Dropping the old session kills its process.
        self.session = None;

        let io = self.launcher.launch().await?;
        let mut session = Session {
            channel: ProtocolChannel::new(io.reader, io.writer),
            process: io.process,
            multipv: 1,
        };
        let identity = session
            .channel
            .handshake(&self.config.options, self.config.handshake_timeout)
            .await?;

        debug!(worker = self.id, engine = %identity.name, "Engine started");
        self.identity = Some(identity);
        self.session = Some(session);
        Ok(())
    }

    /// Search one position.
    ///
    /// A closed or silent engine is restarted and the search retried once.
    ///
    /// # Errors
    ///
    /// `EngineError::EvaluationFailed` when the engine answers with unusable
    /// output, or when the retry fails too. In the latter case the worker is
    /// left `Restarting` and must pass [`probe`](Self::probe) before reuse.
    pub async fn evaluate(&mut self, request: &AnalysisRequest) -> Result<Evaluation, EngineError> {
        self.status = WorkerStatus::Busy;

        let first = match self.search(request).await {
            Ok(evaluation) => {
                self.status = WorkerStatus::Idle;
                return Ok(evaluation);
            }
            Err(SearchFailure::Malformed(reason)) => {
                self.status = WorkerStatus::Idle;
                return Err(EngineError::EvaluationFailed { worker: self.id, reason });
            }
            Err(SearchFailure::Channel(e)) => e,
        };

        warn!(worker = self.id, error = %first, "Engine failed mid-search, restarting");
        self.status = WorkerStatus::Crashed;
        self.restarts += 1;

        let retry = match self.connect().await {
            Ok(()) => self.search(request).await,
            Err(e) => Err(SearchFailure::Channel(e)),
        };

        match retry {
            Ok(evaluation) => {
                info!(worker = self.id, "Engine recovered after restart");
                self.status = WorkerStatus::Idle;
                Ok(evaluation)
            }
            Err(second) => {
                warn!(worker = self.id, error = %second, "Engine failed again, taking worker out of rotation");
                self.session = None;
                self.status = WorkerStatus::Restarting;
                Err(EngineError::EvaluationFailed {
                    worker: self.id,
                    reason: format!("{}; after restart: {}", first, second),
                })
            }
        }
    }

    async fn search(&mut self, request: &AnalysisRequest) -> Result<Evaluation, SearchFailure> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| ChannelError::Closed("engine not running".to_string()))?;

        if session.multipv != request.lines {
            session
                .channel
                .send(&GuiCommand::SetOption {
                    name: "MultiPV".to_string(),
                    value: Some(request.lines.to_string()),
                })
                .await?;
            session.multipv = request.lines;
        }

        session
            .channel
            .send(&GuiCommand::Position { fen: Some(request.position.fen()), moves: Vec::new() })
            .await?;

        let (go, timeout) = match request.limit {
            SearchLimit::Depth(depth) => (GoOptions::depth(depth), self.config.request_timeout),
            SearchLimit::MoveTime(ms) => (
                GoOptions::movetime(ms),
                self.config.request_timeout + Duration::from_millis(ms),
            ),
        };
        session.channel.send(&GuiCommand::Go(go)).await?;

        let messages = session.channel.read_until(timeout, EngineMessage::is_best_move).await?;
        collect_evaluation(messages, request.lines).map_err(SearchFailure::Malformed)
    }

    /// Ask the engine to quit and release the process.
    pub async fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.channel.send(&GuiCommand::Quit).await {
                debug!(worker = self.id, error = %e, "Engine already gone at shutdown");
            }
        }
        self.status = WorkerStatus::Restarting;
    }
}

/// Reduce the output of one search to an evaluation.
///
/// Per line index only the deepest exact score is kept; later lines at the
/// same depth replace earlier ones. Bound scores are ignored.
fn collect_evaluation(messages: Vec<EngineMessage>, lines: u32) -> Result<Evaluation, String> {
    let mut kept: BTreeMap<u32, EngineInfo> = BTreeMap::new();
    let mut finished = false;
    let mut best_move = None;

    for message in messages {
        match message {
            EngineMessage::Info(info) if info.is_exact_score() => {
                let rank = info.multipv.unwrap_or(1);
                if rank > lines {
                    continue;
                }
                let deeper = kept
                    .get(&rank)
                    .map_or(true, |current| info.depth.unwrap_or(0) >= current.depth.unwrap_or(0));
                if deeper {
                    kept.insert(rank, info);
                }
            }
            EngineMessage::BestMove { mv, .. } => {
                finished = true;
                best_move = mv;
            }
            _ => {}
        }
    }

    if !finished {
        return Err("search ended without bestmove".to_string());
    }
    let primary = kept.remove(&1).ok_or_else(|| "no scored line reported".to_string())?;
    let score = primary.score.map(Score::from).ok_or_else(|| "line without score".to_string())?;

    let mut pv = primary.pv;
    if pv.is_empty() {
        pv.extend(best_move);
    }

    let alternatives = kept
        .into_iter()
        .filter_map(|(rank, info)| {
            Some(PvLine { rank, score: info.score.map(Score::from)?, pv: info.pv })
        })
        .collect();

    Ok(Evaluation {
        score,
        pv,
        depth: primary.depth.unwrap_or(0),
        seldepth: primary.seldepth,
        nodes: primary.nodes,
        time_ms: primary.time,
        alternatives,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;
    use crate::test_support::{score_for, FakeEngine, FakeLauncher, Reply};

    fn config(request_timeout: Duration) -> Arc<WorkerConfig> {
        Arc::new(WorkerConfig {
            options: HashMap::from([("Threads".to_string(), "1".to_string())]),
            handshake_timeout: Duration::from_secs(1),
            request_timeout,
        })
    }

    async fn worker(engine: &Arc<FakeEngine>) -> EngineWorker<FakeLauncher> {
        let launcher = Arc::new(FakeLauncher(Arc::clone(engine)));
        EngineWorker::start(0, launcher, config(Duration::from_secs(2))).await.unwrap()
    }

    fn request(depth: u32, lines: u32) -> AnalysisRequest {
        AnalysisRequest::new(Position::startpos(), SearchLimit::Depth(depth), lines)
    }

    #[tokio::test]
    async fn keeps_only_the_deepest_line() {
        let engine = FakeEngine::new();
        let mut worker = worker(&engine).await;

        let eval = worker.evaluate(&request(8, 1)).await.unwrap();
        assert_eq!(eval.depth, 8);
        assert_eq!(eval.score, Score::Centipawns(score_for(Position::startpos().key())));
        assert_eq!(eval.pv, vec!["e2e4", "e7e5"]);
        assert_eq!(eval.nodes, Some(8000));
        assert!(eval.alternatives.is_empty());
        assert_eq!(worker.status(), WorkerStatus::Idle);
        assert_eq!(worker.engine_name(), Some("FakeFish"));
    }

    #[tokio::test]
    async fn multiple_lines_become_alternatives() {
        let engine = FakeEngine::new();
        let mut worker = worker(&engine).await;

        let eval = worker.evaluate(&request(5, 3)).await.unwrap();
        let base = score_for(Position::startpos().key());
        let ranks: Vec<u32> = eval.alternatives.iter().map(|l| l.rank).collect();
        assert_eq!(ranks, vec![2, 3]);
        assert_eq!(eval.alternatives[0].score, Score::Centipawns(base - 40));
        assert_eq!(eval.alternatives[1].pv[0], "g1f3");

        // Back to a single line: the engine must be told.
        let single = worker.evaluate(&request(5, 1)).await.unwrap();
        assert!(single.alternatives.is_empty());
    }

    #[tokio::test]
    async fn recovers_from_one_crash() {
        let engine = FakeEngine::new();
        let mut worker = worker(&engine).await;
        engine.script([Reply::Crash]);

        let eval = worker.evaluate(&request(4, 1)).await.unwrap();
        assert_eq!(eval.depth, 4);
        assert_eq!(engine.launches(), 2);
        assert_eq!(worker.restarts(), 1);
        assert_eq!(worker.status(), WorkerStatus::Idle);

        // The restarted process serves the next call without another launch.
        worker.evaluate(&request(4, 1)).await.unwrap();
        assert_eq!(engine.launches(), 2);
    }

    #[tokio::test]
    async fn second_consecutive_failure_surfaces() {
        let engine = FakeEngine::new();
        let mut worker = worker(&engine).await;
        engine.script([Reply::Crash, Reply::Crash]);

        let err = worker.evaluate(&request(4, 1)).await.unwrap_err();
        assert!(matches!(err, EngineError::EvaluationFailed { worker: 0, .. }));
        assert_eq!(worker.status(), WorkerStatus::Restarting);

        worker.probe().await.unwrap();
        assert_eq!(worker.status(), WorkerStatus::Idle);
        assert!(worker.evaluate(&request(4, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn hung_engine_is_restarted() {
        let engine = FakeEngine::new();
        let launcher = Arc::new(FakeLauncher(Arc::clone(&engine)));
        let mut worker = EngineWorker::start(3, launcher, config(Duration::from_millis(100)))
            .await
            .unwrap();
        engine.script([Reply::Hang]);

        let eval = worker.evaluate(&request(3, 1)).await.unwrap();
        assert_eq!(eval.depth, 3);
        assert_eq!(engine.launches(), 2);
        assert_eq!(engine.searches(), 2);
    }

    #[tokio::test]
    async fn identical_requests_on_fresh_processes_agree() {
        let engine = FakeEngine::new();
        let mut first = worker(&engine).await;
        let mut second = worker(&engine).await;

        let after_e4 = Position::from_fen("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1").unwrap();
        let request = AnalysisRequest::new(after_e4, SearchLimit::Depth(18), 1);
        let a = first.evaluate(&request).await.unwrap();
        let b = second.evaluate(&request).await.unwrap();
        assert_eq!(a.score, b.score);
        assert_eq!(a.pv, b.pv);
    }

    #[tokio::test]
    async fn start_fails_when_launch_fails() {
        let engine = FakeEngine::new();
        engine.fail_next_launches(1);
        let launcher = Arc::new(FakeLauncher(Arc::clone(&engine)));
        let result = EngineWorker::start(0, launcher, config(Duration::from_secs(1))).await;
        assert!(matches!(result, Err(ChannelError::HandshakeFailed(_))));
    }

    #[test]
    fn terminal_search_output_is_accepted() {
        let messages = vec![
            EngineMessage::parse("info depth 0 score mate 0").unwrap(),
            EngineMessage::parse("bestmove (none)").unwrap(),
        ];
        let eval = collect_evaluation(messages, 1).unwrap();
        assert_eq!(eval.score, Score::Mate(0));
        assert!(eval.pv.is_empty());
    }

    #[test]
    fn output_without_score_is_malformed() {
        let messages = vec![
            EngineMessage::parse("info depth 5 score cp 10 upperbound pv e2e4").unwrap(),
            EngineMessage::parse("bestmove e2e4").unwrap(),
        ];
        assert!(collect_evaluation(messages, 1).is_err());
    }
}
