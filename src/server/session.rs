//! Per-connection session loop.
//!
//! Three tasks per accepted socket: the read loop (owns the receiving half,
//! processes frames strictly in arrival order), a writer draining the
//! outbound queue into the sending half, and a heartbeat probing liveness.
//! All three unwind through one per-connection [`CancellationToken`].
//!
//! Chat turns are processed inline in the read loop — no concurrent turns on
//! one connection — while streamed partial frames travel through the writer
//! concurrently.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agents::AgentSpec;
use crate::entities::{Message, ParticipantKind};
use crate::error::TurnError;
use crate::server::Gateway;
use crate::server::frames::{ClientFrame, Command, Outbound, OutboundTx, ServerFrame};
use crate::server::registry::ConnectionHandle;
use crate::stream::StreamBuffer;

/// A heartbeat ping unanswered for this long tears the connection down.
const PING_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) async fn handle_connection(gateway: Arc<Gateway>, socket: WebSocket) {
    let connection_id = Uuid::new_v4().to_string();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    gateway.registry.register(
        &connection_id,
        ConnectionHandle { tx: out_tx.clone(), cancel: cancel.clone() },
    );
    info!(%connection_id, "connection accepted");

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        gateway.clone(),
        connection_id.clone(),
        sink,
        out_rx,
    ));

    let (pong_tx, pong_rx) = watch::channel(());
    let heartbeat = tokio::spawn(heartbeat_loop(
        out_tx.clone(),
        cancel.clone(),
        gateway.config.heartbeat_interval,
        pong_rx,
        connection_id.clone(),
    ));

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(%connection_id, "connection cancelled");
                break;
            }

            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    gateway.registry.update_activity(&connection_id, 0, 1);
                    handle_frame(&gateway, &connection_id, &out_tx, text.as_str()).await;
                }
                // Pongs prove liveness but are not activity — a quiet client
                // that only answers pings must still age out as idle.
                Some(Ok(WsMessage::Pong(_))) => {
                    let _ = pong_tx.send(());
                }
                // The transport answers pings on its own.
                Some(Ok(WsMessage::Ping(_))) => {}
                Some(Ok(WsMessage::Binary(_))) => {
                    send_error(&out_tx, &TurnError::MalformedFrame, None, Some(&connection_id));
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!(%connection_id, "closed by peer");
                    break;
                }
                Some(Err(e)) => {
                    debug!(%connection_id, error = %e, "read failed");
                    break;
                }
            }
        }
    }

    cancel.cancel();
    heartbeat.abort();
    gateway.registry.unregister(&connection_id);
    // All senders are gone now; the writer drains its queue and exits.
    drop(out_tx);
    let _ = writer.await;
    info!(%connection_id, "connection closed");
}

// ── Writer ────────────────────────────────────────────────────────────────────

async fn write_loop(
    gateway: Arc<Gateway>,
    connection_id: String,
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = out_rx.recv().await {
        let result = match outbound {
            Outbound::Frame(frame) => match serde_json::to_string(&frame) {
                Ok(text) => {
                    gateway.registry.update_activity(&connection_id, 1, 0);
                    sink.send(WsMessage::Text(text.into())).await
                }
                Err(e) => {
                    error!(%connection_id, error = %e, "frame serialisation failed");
                    continue;
                }
            },
            Outbound::Ping => sink.send(WsMessage::Ping(Bytes::new())).await,
            Outbound::Close { code, reason } => {
                let _ = sink
                    .send(WsMessage::Close(Some(CloseFrame { code, reason: reason.into() })))
                    .await;
                break;
            }
        };
        if result.is_err() {
            debug!(%connection_id, "write failed — stopping writer");
            break;
        }
    }
}

// ── Heartbeat ─────────────────────────────────────────────────────────────────

async fn heartbeat_loop(
    out_tx: OutboundTx,
    cancel: CancellationToken,
    interval: Duration,
    mut pong_rx: watch::Receiver<()>,
    connection_id: String,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = tokio::time::sleep(interval) => {
                // Clear any pong that arrived since the last probe.
                pong_rx.mark_unchanged();
                if out_tx.send(Outbound::Ping).is_err() {
                    break;
                }
                match tokio::time::timeout(PING_TIMEOUT, pong_rx.changed()).await {
                    Ok(Ok(())) => {}
                    _ => {
                        warn!(%connection_id, "heartbeat timeout — closing connection");
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    }
}

// ── Frame dispatch ────────────────────────────────────────────────────────────

fn send_frame(out_tx: &OutboundTx, frame: ServerFrame) {
    if out_tx.send(Outbound::Frame(frame)).is_err() {
        debug!("connection writer gone — frame dropped");
    }
}

fn send_error(
    out_tx: &OutboundTx,
    err: &TurnError,
    chat_uuid: Option<String>,
    connection_id: Option<&str>,
) {
    send_frame(
        out_tx,
        ServerFrame::error(err, chat_uuid, connection_id.map(str::to_string)),
    );
}

/// Parse one text frame and dispatch on its `command` field.
async fn handle_frame(
    gateway: &Arc<Gateway>,
    connection_id: &str,
    out_tx: &OutboundTx,
    raw: &str,
) {
    let frame = match ClientFrame::parse(raw) {
        Ok(frame) => frame,
        Err(e) => {
            send_error(out_tx, &e, None, Some(connection_id));
            return;
        }
    };

    match frame.command {
        Some(Command::Identify) => handle_identify(gateway, connection_id, out_tx, frame),
        Some(Command::Stats) => handle_stats(gateway, out_tx),
        None => {
            let chat_uuid = frame.chat_uuid.clone();
            if let Err(e) = handle_chat_turn(gateway, connection_id, out_tx, frame).await {
                send_error(out_tx, &e, chat_uuid, None);
            }
        }
    }
}

fn handle_identify(
    gateway: &Arc<Gateway>,
    connection_id: &str,
    out_tx: &OutboundTx,
    frame: ClientFrame,
) {
    let Some(auth_uuid) = frame.auth_uuid else {
        send_error(out_tx, &TurnError::MissingFields, None, Some(connection_id));
        return;
    };
    if gateway.registry.bind_identity(connection_id, &auth_uuid) {
        info!(%connection_id, %auth_uuid, "connection identified");
        send_frame(out_tx, ServerFrame::identified(connection_id));
    }
}

fn handle_stats(gateway: &Arc<Gateway>, out_tx: &OutboundTx) {
    send_frame(
        out_tx,
        ServerFrame::stats(
            gateway.agents.stats(),
            gateway.chats().stats(),
            gateway.registry.stats(),
        ),
    );
}

/// The full chat-turn pipeline: identity policy, agent resolution, optional
/// history sync, user append, context assembly, streamed LLM call, assistant
/// append. Any error keeps the connection alive.
async fn handle_chat_turn(
    gateway: &Arc<Gateway>,
    connection_id: &str,
    out_tx: &OutboundTx,
    frame: ClientFrame,
) -> Result<(), TurnError> {
    let auth_id = gateway
        .registry
        .auth_id(connection_id)
        .ok_or(TurnError::NotIdentified)?;

    let (Some(chat_id), Some(content), Some(sender_id)) =
        (frame.chat_uuid, frame.content, frame.sender_uuid)
    else {
        return Err(TurnError::MissingFields);
    };

    if sender_id != auth_id {
        warn!(
            %connection_id,
            claimed = %sender_id,
            bound = %auth_id,
            "security: chat turn with mismatched sender identity"
        );
        return Err(TurnError::AuthMismatch);
    }

    let agent = gateway.agents.get_or_create(
        &auth_id,
        AgentSpec {
            agent_id: frame.agent_uuid.or_else(|| frame.receiver_uuid.clone()),
            name: frame.agent_name,
            description: frame.agent_description,
            category_id: frame.category_id,
            system_prompt: frame.system_prompt,
        },
    );

    if let Some(history) = frame.chat_history {
        let incoming: Vec<Message> = history
            .into_iter()
            .map(|item| item.into_message(&chat_id))
            .collect::<Result<_, _>>()?;
        debug!(%chat_id, incoming = incoming.len(), mode = ?frame.sync_mode, "syncing history");
        gateway
            .chats()
            .sync_messages(&chat_id, &agent.agent_id, &auth_id, &incoming, frame.sync_mode);
    }

    let user_message = Message::mint(
        &sender_id,
        frame.sender_type.unwrap_or(ParticipantKind::Auth),
        frame.receiver_uuid.as_deref().unwrap_or(&agent.agent_id),
        frame.receiver_type.unwrap_or(ParticipantKind::Agent),
        &chat_id,
        &content,
    );

    let turns = {
        let mut chats = gateway.chats();
        chats.add_new_message(user_message);
        chats.assemble_context(
            &chat_id,
            &agent.agent_id,
            &auth_id,
            agent.get_system_prompt(),
            gateway.config.context_strategy.is_sliding(),
        )
    };

    debug!(%chat_id, agent_id = %agent.agent_id, turns = turns.len(), "invoking llm");
    let mut sink = StreamBuffer::new(out_tx.clone(), &chat_id, &agent.agent_id, gateway.config.stream);
    match gateway.llm.stream_chat(&turns, &mut sink).await {
        Ok(full_response) => {
            let mut reply = Message::mint(
                &agent.agent_id,
                ParticipantKind::Agent,
                &auth_id,
                ParticipantKind::Auth,
                &chat_id,
                &full_response,
            );
            // Reuse the ids the terminal frame carried.
            if let Some((message_id, content_id)) = sink.minted_ids() {
                reply.message_id = message_id.to_string();
                reply.content_id = content_id.to_string();
            }
            gateway.chats().add_new_message(reply);
            Ok(())
        }
        Err(e) => {
            error!(%chat_id, error = %e, "llm call failed");
            Err(TurnError::Llm(e.to_string()))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
