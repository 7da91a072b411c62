//! Streaming session runs over WebSocket.
//!
//! The client sends one `SubmitRequest` text frame. The server answers with a
//! `step` frame per completed stage, then exactly one `complete` or `error`
//! frame, then closes. A client that disconnects cancels its run.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use refinery_common::{StreamMessage, StructuredError, SubmitRequest};
use std::time::Duration;
use tokio::sync::mpsc;

use super::api::SharedState;

/// How long a fresh connection may take to send its request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (sender, receiver) = socket.split();
    drive_session(sender, receiver, state).await;
}

fn frame(msg: &StreamMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize stream message");
            None
        }
    }
}

async fn send<S>(sender: &mut S, msg: &StreamMessage) -> bool
where
    S: Sink<Message> + Unpin,
{
    match frame(msg) {
        Some(m) => sender.send(m).await.is_ok(),
        None => false,
    }
}

/// Wait for the first text frame and parse it as a request.
async fn read_request<R, E>(receiver: &mut R) -> Result<SubmitRequest, String>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let first_text = async {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => return Ok(text.as_str().to_string()),
                Ok(Message::Binary(_)) => return Err("Expected a JSON text frame".to_string()),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => return Err(format!("WebSocket error: {}", e)),
            }
        }
        Err("Connection closed before a request was sent".to_string())
    };
    let text = tokio::time::timeout(REQUEST_TIMEOUT, first_text)
        .await
        .map_err(|_| format!("No request received within {}s", REQUEST_TIMEOUT.as_secs()))??;
    serde_json::from_str(&text).map_err(|e| format!("Invalid request: {}", e))
}

/// Run one session, forwarding stage events until a terminal frame.
async fn drive_session<S, R, E>(mut sender: S, mut receiver: R, state: SharedState)
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut request = match read_request(&mut receiver).await {
        Ok(req) => req,
        Err(message) => {
            tracing::warn!(error = %message, "Rejected WebSocket request");
            send(&mut sender, &StreamMessage::Error(StructuredError::new(message, None))).await;
            let _ = sender.close().await;
            return;
        }
    };
    // Claimed before spawning so a disconnect can cancel the run from the start.
    let guard = match state.orchestrator.claim(&mut request) {
        Ok(guard) => guard,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected WebSocket request");
            send(&mut sender, &StreamMessage::Error(e.to_structured())).await;
            let _ = sender.close().await;
            return;
        }
    };
    let session_id = guard.id().to_string();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = state.orchestrator.clone();
    let mut run = tokio::spawn(async move { orchestrator.submit_claimed(request, guard, Some(&tx)).await });

    let mut client_gone = false;
    let mut events_open = true;
    let outcome = loop {
        tokio::select! {
            event = rx.recv(), if events_open && !client_gone => match event {
                Some(event) => {
                    if !send(&mut sender, &StreamMessage::Step(event)).await {
                        client_gone = true;
                        state.orchestrator.cancel(&session_id);
                    }
                }
                None => events_open = false,
            },
            msg = receiver.next(), if !client_gone => {
                if matches!(msg, None | Some(Ok(Message::Close(_))) | Some(Err(_))) {
                    tracing::info!(session_id = %session_id, "Client disconnected, cancelling run");
                    client_gone = true;
                    state.orchestrator.cancel(&session_id);
                }
            }
            result = &mut run => break result,
        }
    };

    // Steps still queued when the run ended go out before the terminal frame.
    while let Ok(event) = rx.try_recv() {
        if client_gone || !send(&mut sender, &StreamMessage::Step(event)).await {
            client_gone = true;
        }
    }

    let terminal = match outcome {
        Ok(Ok(session)) => StreamMessage::Complete(session.project()),
        Ok(Err(e)) => {
            tracing::warn!(session_id = %session_id, error = %e, "Streaming run failed");
            StreamMessage::Error(e.to_structured())
        }
        Err(e) => StreamMessage::Error(StructuredError::new(format!("Run task failed: {}", e), None)),
    };
    if !client_gone {
        send(&mut sender, &terminal).await;
        let _ = sender.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::testing::{FnEngine, FnGenerator, INVALID, PASSING_REPORT, VALID, harness};
    use crate::server::api::AppState;
    use crate::store::SessionStore;
    use futures::channel::mpsc as fmpsc;
    use refinery_common::Stage;
    use std::sync::Arc;

    type Incoming = Result<Message, std::convert::Infallible>;

    fn state_with(generator: Arc<FnGenerator>) -> SharedState {
        let h = harness(generator, FnEngine::printing(PASSING_REPORT));
        Arc::new(AppState {
            orchestrator: Arc::new(h.orchestrator),
        })
    }

    fn text(value: serde_json::Value) -> Incoming {
        Ok(Message::Text(value.to_string().into()))
    }

    /// Drive a session with `first` as the only client frame; the client then stays connected.
    async fn collect(state: SharedState, first: Incoming) -> Vec<StreamMessage> {
        let (out_tx, out_rx) = fmpsc::unbounded::<Message>();
        let incoming = futures::stream::iter(vec![first]).chain(futures::stream::pending());
        drive_session(out_tx, Box::pin(incoming), state).await;
        out_rx
            .filter_map(|m| async move {
                match m {
                    Message::Text(t) => serde_json::from_str(t.as_str()).ok(),
                    _ => None,
                }
            })
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_steps_then_complete() {
        let msgs = collect(
            state_with(FnGenerator::fixed(VALID)),
            text(serde_json::json!({"requirement": "RSI mean-reversion", "maxIterations": 3})),
        )
        .await;

        let (last, steps) = msgs.split_last().unwrap();
        let stages: Vec<Stage> = steps
            .iter()
            .map(|m| match m {
                StreamMessage::Step(e) => e.stage,
                other => panic!("Expected step, got {:?}", other),
            })
            .collect();
        assert_eq!(stages.first(), Some(&Stage::Enrichment));
        assert_eq!(stages.last(), Some(&Stage::Report));
        match last {
            StreamMessage::Complete(session) => {
                assert!(session.satisfactory);
                assert_eq!(session.iteration, 1);
            }
            other => panic!("Expected complete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exhausted_run_still_completes() {
        let msgs = collect(
            state_with(FnGenerator::fixed(INVALID)),
            text(serde_json::json!({"requirement": "RSI", "maxIterations": 2})),
        )
        .await;
        match msgs.last().unwrap() {
            StreamMessage::Complete(session) => {
                assert!(!session.satisfactory);
                assert_eq!(session.iteration, 2);
                assert!(!session.defects.is_empty());
            }
            other => panic!("Expected complete, got {:?}", other),
        }
        assert_eq!(msgs.iter().filter(|m| m.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_frame_carries_stage() {
        let msgs = collect(
            state_with(FnGenerator::new(|_| anyhow::bail!("model overloaded"))),
            text(serde_json::json!({"requirement": "RSI"})),
        )
        .await;
        match msgs.last().unwrap() {
            StreamMessage::Error(err) => {
                assert_eq!(err.stage, Some(Stage::Generate));
                assert!(err.message.contains("model overloaded"));
            }
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error_frame() {
        let msgs = collect(state_with(FnGenerator::fixed(VALID)), Ok(Message::Text("{not json".into()))).await;
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            StreamMessage::Error(err) => {
                assert!(err.message.contains("Invalid request"));
                assert!(err.stage.is_none());
            }
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_immediate_disconnect_cancels_before_first_stage() {
        let generator = FnGenerator::fixed(VALID);
        let h = harness(generator.clone(), FnEngine::printing(PASSING_REPORT));
        let store = h.store.clone();
        let state = Arc::new(AppState {
            orchestrator: Arc::new(h.orchestrator),
        });

        let (out_tx, out_rx) = fmpsc::unbounded::<Message>();
        let incoming = futures::stream::iter(vec![
            text(serde_json::json!({"requirement": "RSI", "sessionId": "gone-1"})),
            Ok(Message::Close(None)),
        ]);
        drive_session(out_tx, Box::pin(incoming), state.clone()).await;

        let sent: Vec<Message> = out_rx.collect().await;
        assert!(sent.is_empty());
        let stored = store.get("gone-1").await.unwrap().unwrap();
        assert!(stored.cancelled);
        assert_eq!(stored.iteration, 0);
        assert!(generator.modes().is_empty());
        assert!(!state.orchestrator.registry().is_running("gone-1"));
    }

    #[tokio::test]
    async fn test_busy_session_gets_error_frame() {
        let state = state_with(FnGenerator::fixed(VALID));
        let _running = state.orchestrator.registry().register("busy-1").unwrap();
        let msgs = collect(
            state.clone(),
            text(serde_json::json!({"requirement": "RSI", "sessionId": "busy-1"})),
        )
        .await;
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            StreamMessage::Error(err) => assert!(err.message.contains("already has a run")),
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_request_skips_control_frames() {
        let mut incoming = futures::stream::iter(vec![
            Ok::<_, std::convert::Infallible>(Message::Ping(Default::default())),
            text(serde_json::json!({"requirement": "MACD cross", "sessionId": "s-9"})),
        ]);
        let req = read_request(&mut incoming).await.unwrap();
        assert_eq!(req.requirement, "MACD cross");
        assert_eq!(req.session_id.as_deref(), Some("s-9"));
    }

    #[tokio::test]
    async fn test_read_request_on_closed_stream() {
        let mut incoming = futures::stream::iter(Vec::<Incoming>::new());
        let err = read_request(&mut incoming).await.unwrap_err();
        assert!(err.contains("closed"));
    }
}
