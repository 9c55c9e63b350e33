pub mod protocol;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::board::Board;
use crate::config::AppConfig;
use crate::config::preferences::Preferences;
use crate::grading::ModeCatalog;
use crate::ranking::{RankingDriver, RankingRequest, ResultAcceptor, RunHandle, RunId};
#[cfg(test)]
use crate::ranking::RunStatus;
use crate::simulation::aggregate::SimulationResult;
use crate::simulation::rules::RuleTable;
use protocol::{ClientMessage, ComputeRequest, ServerMessage, reports};

/// Shared server state: defaults applied to incoming requests and the rule table.
pub struct ServerState {
    pub preferences: Preferences,
    pub default_mode: String,
    pub modes: ModeCatalog,
    pub rules: Arc<dyn RuleTable>,
}

impl ServerState {
    pub fn new(config: &AppConfig, rules: Arc<dyn RuleTable>) -> Self {
        ServerState {
            preferences: config.preferences.clone(),
            default_mode: config.grading_mode.clone(),
            modes: ModeCatalog::with_custom(&config.grading_modes),
            rules,
        }
    }

    /// Turn a client request into an owned ranking request, filling in server defaults.
    pub fn build_request(&self, compute: ComputeRequest) -> Result<RankingRequest, String> {
        compute.team.validate().map_err(|e| e.to_string())?;
        let board = Board::from_rows(&compute.board, &compute.team).map_err(|e| e.to_string())?;
        let preferences = compute
            .preferences
            .unwrap_or_else(|| self.preferences.clone());
        preferences.validate()?;
        let key = compute
            .grading_mode
            .unwrap_or_else(|| self.default_mode.clone());
        let grading_mode = self
            .modes
            .get(&key)
            .cloned()
            .ok_or_else(|| format!("Unknown grading mode '{}'", key))?;
        Ok(RankingRequest {
            board,
            team: compute.team,
            preferences,
            grading_mode,
        })
    }
}

/// What a run hands back to its connection.
#[derive(Debug)]
pub enum Delivery {
    Results(RunId, Vec<SimulationResult>),
    Failed(RunId, String),
}

impl Delivery {
    pub fn run_id(&self) -> RunId {
        match self {
            Delivery::Results(run_id, _) | Delivery::Failed(run_id, _) => *run_id,
        }
    }
}

/// Forwards accepted results and failures to one connection's writer task.
pub struct ChannelAcceptor {
    accepted: Mutex<Option<RunId>>,
    sender: mpsc::UnboundedSender<Delivery>,
}

impl ChannelAcceptor {
    pub fn new(sender: mpsc::UnboundedSender<Delivery>) -> Self {
        ChannelAcceptor {
            accepted: Mutex::new(None),
            sender,
        }
    }
}

impl ResultAcceptor for ChannelAcceptor {
    fn begin_run(&self, run_id: RunId) {
        if let Ok(mut accepted) = self.accepted.lock() {
            *accepted = Some(run_id);
        }
    }

    fn accepted_id(&self) -> Option<RunId> {
        *self.accepted.lock().ok()?
    }

    fn accept_results(&self, run_id: RunId, results: Vec<SimulationResult>) -> bool {
        if self.accepted_id() != Some(run_id) {
            debug!(%run_id, "Stale results discarded");
            return false;
        }
        self.sender.send(Delivery::Results(run_id, results)).is_ok()
    }

    fn reject_run(&self, run_id: RunId, message: &str) {
        if self.accepted_id() != Some(run_id) {
            debug!(%run_id, "Stale failure discarded");
            return;
        }
        let _ = self.sender.send(Delivery::Failed(run_id, message.to_string()));
    }
}

/// The message for a delivery, or `None` when it belongs to a superseded run.
fn reply_for(current: Option<&(RunHandle, String)>, delivery: Delivery) -> Option<ServerMessage> {
    let (handle, mode) = current?;
    if handle.run_id() != delivery.run_id() {
        return None;
    }
    Some(match delivery {
        Delivery::Results(run_id, results) => ServerMessage::Results {
            run_id,
            grading_mode: mode.clone(),
            results: reports(&results),
        },
        Delivery::Failed(run_id, message) => ServerMessage::Error {
            message: format!("Run {} failed: {}", run_id, message),
        },
    })
}

/// Start the WebSocket server on the given address.
pub async fn start_server(
    state: Arc<ServerState>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Server listening at ws://{}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_websocket(stream, peer, state).await {
                error!(%peer, "Connection error: {}", e);
            }
        });
    }
}

/// Handle one client: each compute request supersedes the last; only the latest run reports.
async fn handle_websocket(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    info!(%peer, "WebSocket connected");

    let (mut write, mut read) = futures_util::StreamExt::split(ws_stream);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let acceptor = Arc::new(ChannelAcceptor::new(tx));
    let driver = RankingDriver::new(Arc::clone(&state.rules));
    let mut current: Option<(RunHandle, String)> = None;

    loop {
        tokio::select! {
            delivered = rx.recv() => {
                let Some(delivery) = delivered else { break };
                let run_id = delivery.run_id();
                let Some(reply) = reply_for(current.as_ref(), delivery) else { continue };
                if futures_util::SinkExt::send(&mut write, Message::Text(reply.to_json().into())).await.is_err() {
                    break;
                }
                info!(%peer, %run_id, "Run reply sent");
            }
            msg = futures_util::StreamExt::next(&mut read) => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => continue,
                };
                let request = serde_json::from_str::<ClientMessage>(&text)
                    .map_err(|e| format!("Malformed request: {}", e))
                    .and_then(|ClientMessage::Compute(compute)| state.build_request(compute));
                match request {
                    Ok(request) => {
                        let mode = request.grading_mode.key.clone();
                        let handle = driver.start_run(request, acceptor.clone());
                        info!(%peer, run_id = %handle.run_id(), mode = %mode, "Compute requested");
                        current = Some((handle, mode));
                    }
                    Err(message) => {
                        warn!(%peer, error = %message, "Request rejected");
                        let reply = ServerMessage::Error { message };
                        if futures_util::SinkExt::send(&mut write, Message::Text(reply.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    if let Some((handle, _)) = current {
        handle.cancel();
    }
    info!(%peer, "WebSocket disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::rules::StandardRules;
    use std::time::Duration;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const TEAM_JSON: &str = r#"{"species": [
        {"name": "Ember", "key": "A", "attack": 60},
        {"name": "Brook", "key": "B", "attack": 50},
        {"name": "Fern", "key": "C", "attack": 70},
        {"name": "Spark", "key": "D", "attack": 40}
    ]}"#;

    const SINGLE_MATCH_ROWS: &str = r#"[
        "B C D X A D",
        "C C A A C B",
        "B B X B C A",
        "D X C X D D",
        "C A C D X C",
        "B A X B D A"
    ]"#;

    fn test_state() -> Arc<ServerState> {
        Arc::new(ServerState::new(
            &AppConfig::default(),
            Arc::new(StandardRules::new()),
        ))
    }

    fn compute_json(preferences: &str, mode: &str) -> String {
        format!(
            r#"{{"type": "compute", "board": {}, "team": {}, "preferences": {}, "grading_mode": "{}"}}"#,
            SINGLE_MATCH_ROWS, TEAM_JSON, preferences, mode
        )
    }

    async fn connect(state: Arc<ServerState>) -> (Client, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_handle = tokio::spawn(async move {
            if let Ok((stream, peer)) = listener.accept().await {
                let _ = handle_websocket(stream, peer, state).await;
            }
        });
        let url = format!("ws://127.0.0.1:{}", addr.port());
        let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        (ws, server_handle)
    }

    async fn send(ws: &mut Client, text: String) {
        futures_util::SinkExt::send(ws, Message::Text(text.into()))
            .await
            .unwrap();
    }

    async fn receive(ws: &mut Client) -> serde_json::Value {
        let msg = tokio::time::timeout(
            Duration::from_secs(10),
            futures_util::StreamExt::next(ws),
        )
        .await
        .expect("timeout waiting for reply")
        .expect("stream ended")
        .expect("message error");
        let text = msg.into_text().unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn build_request_applies_server_defaults() {
        let state = test_state();
        let compute: ComputeRequest = serde_json::from_str(&format!(
            r#"{{"board": {}, "team": {}}}"#,
            SINGLE_MATCH_ROWS, TEAM_JSON
        ))
        .unwrap();
        let request = state.build_request(compute).unwrap();
        assert_eq!(request.preferences, Preferences::default());
        assert_eq!(request.grading_mode.key, "default");
        assert_eq!(request.board.width(), 6);
    }

    #[test]
    fn build_request_rejects_unknown_mode_and_bad_board() {
        let state = test_state();
        let unknown: ComputeRequest = serde_json::from_str(&format!(
            r#"{{"board": {}, "team": {}, "grading_mode": "fastest"}}"#,
            SINGLE_MATCH_ROWS, TEAM_JSON
        ))
        .unwrap();
        assert!(state.build_request(unknown).unwrap_err().contains("fastest"));

        let ragged: ComputeRequest = serde_json::from_str(&format!(
            r#"{{"board": ["A B C", "A B"], "team": {}}}"#,
            TEAM_JSON
        ))
        .unwrap();
        assert!(state.build_request(ragged).is_err());
    }

    #[test]
    fn channel_acceptor_forwards_only_the_accepted_run() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let acceptor = ChannelAcceptor::new(tx);
        let old = RunId::new();
        let new = RunId::new();
        acceptor.begin_run(old);
        acceptor.begin_run(new);

        assert!(!acceptor.accept_results(old, Vec::new()));
        assert!(acceptor.accept_results(new, Vec::new()));
        assert_eq!(rx.try_recv().unwrap().run_id(), new);
        assert!(rx.try_recv().is_err());

        acceptor.reject_run(old, "ignored");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failed_run_becomes_error_reply() {
        let state = test_state();
        let compute: ComputeRequest = serde_json::from_str(&format!(
            r#"{{"board": {}, "team": {}, "grading_mode": "score"}}"#,
            SINGLE_MATCH_ROWS, TEAM_JSON
        ))
        .unwrap();
        let mut request = state.build_request(compute).unwrap();
        request.preferences.trials = Some(0);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let acceptor = Arc::new(ChannelAcceptor::new(tx));
        let driver = RankingDriver::new(Arc::clone(&state.rules));
        let current = (driver.start_run(request, acceptor.clone()), "score".to_string());

        let delivery = rx.blocking_recv().unwrap();
        assert!(matches!(delivery, Delivery::Failed(id, _) if id == current.0.run_id()));
        match reply_for(Some(&current), delivery) {
            Some(ServerMessage::Error { message }) => {
                assert!(message.contains("Trial count must be at least 1"));
            }
            other => panic!("expected error reply, got {:?}", other),
        }
        assert!(matches!(current.0.wait(), RunStatus::Failed(_)));
    }

    #[test]
    fn deliveries_for_superseded_runs_get_no_reply() {
        let state = test_state();
        let compute: ComputeRequest = serde_json::from_str(&format!(
            r#"{{"board": {}, "team": {}}}"#,
            SINGLE_MATCH_ROWS, TEAM_JSON
        ))
        .unwrap();
        let mut request = state.build_request(compute).unwrap();
        request.preferences = Preferences {
            trials: Some(1),
            mobile_mode: true,
            ..Preferences::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let driver = RankingDriver::new(Arc::clone(&state.rules));
        let current = (
            driver.start_run(request, Arc::new(ChannelAcceptor::new(tx))),
            "default".to_string(),
        );

        let stale = Delivery::Failed(RunId::new(), "old".to_string());
        assert!(reply_for(Some(&current), stale).is_none());
        assert!(reply_for(None, Delivery::Results(RunId::new(), Vec::new())).is_none());
    }

    #[tokio::test]
    async fn compute_request_returns_ranked_results() {
        let (mut ws, server_handle) = connect(test_state()).await;

        send(
            &mut ws,
            compute_json(r#"{"trials": 1, "mobile_mode": true}"#, "score"),
        )
        .await;
        let reply = receive(&mut ws).await;

        assert_eq!(reply["type"], "results");
        assert_eq!(reply["grading_mode"], "score");
        assert!(reply["run_id"].is_string());
        let best = &reply["results"][0];
        assert_eq!(best["rank"], 1);
        assert_eq!(best["move"], serde_json::json!([1, 5, 2, 5]));
        assert_eq!(best["net_score"], 60.0);
        assert_eq!(best["blocks"], 3.0);

        futures_util::SinkExt::close(&mut ws).await.unwrap();
        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn malformed_request_gets_error_reply() {
        let (mut ws, server_handle) = connect(test_state()).await;

        send(&mut ws, r#"{"type": "compute", "board": 7}"#.to_string()).await;
        let reply = receive(&mut ws).await;
        assert_eq!(reply["type"], "error");
        assert!(reply["message"].as_str().unwrap().contains("Malformed"));

        send(&mut ws, compute_json("{}", "fastest")).await;
        let reply = receive(&mut ws).await;
        assert_eq!(reply["type"], "error");
        assert!(reply["message"].as_str().unwrap().contains("fastest"));

        futures_util::SinkExt::close(&mut ws).await.unwrap();
        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn newer_request_supersedes_slow_run() {
        let (mut ws, server_handle) = connect(test_state()).await;

        send(
            &mut ws,
            compute_json(r#"{"trials": 20000, "seed": 5}"#, "gold"),
        )
        .await;
        send(
            &mut ws,
            compute_json(r#"{"trials": 1, "mobile_mode": true}"#, "combos"),
        )
        .await;

        let reply = receive(&mut ws).await;
        assert_eq!(reply["type"], "results");
        assert_eq!(reply["grading_mode"], "combos");
        assert_eq!(reply["results"][0]["trials"], 1);

        futures_util::SinkExt::close(&mut ws).await.unwrap();
        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn client_disconnect_does_not_crash_server() {
        let (ws, server_handle) = connect(test_state()).await;
        drop(ws);

        let result = tokio::time::timeout(Duration::from_secs(5), server_handle).await;
        assert!(result.is_ok(), "Server should handle disconnect within 5s");
    }
}
