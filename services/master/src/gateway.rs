//! WebSocket gateway: the transport boundary around one interview session.
//!
//! Each connection gets its own Master and panel. The gateway only
//! translates: inbound frames become `InboundEvent`s for the Master's
//! mailbox, outbound events become JSON frames. It holds no interview state,
//! so the candidate-side transport can be swapped without touching the loop.

use crate::{
    orchestrator::{InterviewSettings, Master, MasterEvent},
    state::AppState,
};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use roundtable_core::{
    events::{InboundEvent, OutboundEvent},
    tracker::InterviewTopicTracker,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection: builds the session's
/// Master and panel, then pumps frames both ways until the interview ends or
/// the client disconnects.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    tracing::Span::current().record("session_id", tracing::field::display(session_id));
    info!("new interview connection");

    let settings = InterviewSettings {
        candidate: state.config.candidate_name.clone(),
        panelists: state.config.panelists.clone(),
        decision_timeout: state.config.decision_timeout,
        tick_timeout: state.config.tick_timeout,
    };
    let tracker = InterviewTopicTracker::new(state.curriculum.clone());

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundEvent>(64);
    let (mut master, handle) = Master::new(
        session_id,
        settings,
        tracker,
        state.decisions.clone(),
        state.store.clone(),
        outbound_tx,
    );
    master.spawn_panelists(state.voice.clone(), handle.events.clone());

    let master_task = tokio::spawn(master.run());

    let (mut socket_tx, mut socket_rx) = socket.split();
    loop {
        tokio::select! {
            frame = socket_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let event: InboundEvent = match serde_json::from_str(text.as_str()) {
                        Ok(event) => event,
                        Err(error) => {
                            warn!(%error, "unparseable client frame; ignored");
                            continue;
                        }
                    };
                    if handle.events.send(MasterEvent::Inbound(event)).await.is_err() {
                        debug!("master mailbox closed; ending session");
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("client disconnected");
                    handle.cancel.cancel();
                    break;
                }
                Some(Ok(_)) => {} // ping/pong/binary
                Some(Err(error)) => {
                    warn!(%error, "websocket receive error");
                    handle.cancel.cancel();
                    break;
                }
            },
            event = outbound_rx.recv() => match event {
                Some(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(error) => {
                            error!(%error, "failed to serialize outbound event");
                            continue;
                        }
                    };
                    if socket_tx.send(Message::Text(json.into())).await.is_err() {
                        info!("client went away mid-send");
                        handle.cancel.cancel();
                        break;
                    }
                }
                // The Master dropped its sender: the interview is over.
                None => break,
            },
        }
    }

    match master_task.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => error!(%error, "master loop failed"),
        Err(error) if !error.is_cancelled() => error!(%error, "master task panicked"),
        Err(_) => {}
    }
    info!("interview session closed");
}
