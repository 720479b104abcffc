use std::sync::Arc;
use std::time::Duration;

use agri_chat_client::{ChatBackend, ChatRequest};
use futures::StreamExt;
use tokio::sync::mpsc;

use super::events::{StreamEventMapped, StreamEventPayload};
use super::message::StreamTarget;

fn emit(
    event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
    target: StreamTarget,
    payload: StreamEventPayload,
) -> bool {
    event_tx.send(StreamEventMapped { target, payload }).is_ok()
}

fn idle_message(idle_timeout: Duration) -> String {
    format!(
        "no response from the assistant for {} seconds",
        idle_timeout.as_secs()
    )
}

/// Drives one send to completion, reporting every step on `event_tx`.
///
/// Runs to the end even when the controller has moved on; the events are then
/// discarded as stale. Exactly one terminal event is sent per call.
pub(crate) async fn run_stream_worker(
    backend: Arc<dyn ChatBackend>,
    request: ChatRequest,
    target: StreamTarget,
    idle_timeout: Duration,
    event_tx: mpsc::UnboundedSender<StreamEventMapped>,
) {
    let opened = tokio::time::timeout(idle_timeout, backend.open_chat(request)).await;
    let stream = match opened {
        Ok(Ok(stream)) => stream,
        Ok(Err(error)) => {
            tracing::warn!(target = ?target, error = %error, "chat request rejected");
            emit(
                &event_tx,
                target,
                StreamEventPayload::Failed {
                    before_stream: true,
                    message: error.to_string(),
                },
            );
            return;
        }
        Err(_) => {
            tracing::warn!(target = ?target, "chat request timed out before headers");
            emit(
                &event_tx,
                target,
                StreamEventPayload::Failed {
                    before_stream: true,
                    message: idle_message(idle_timeout),
                },
            );
            return;
        }
    };

    let mut deltas = stream.deltas;
    if !emit(
        &event_tx,
        target,
        StreamEventPayload::Opened {
            conversation_id: stream.conversation_id,
        },
    ) {
        return;
    }

    let terminal = loop {
        match tokio::time::timeout(idle_timeout, deltas.next()).await {
            Ok(Some(Ok(text))) => {
                if text.is_empty() {
                    continue;
                }
                if !emit(&event_tx, target, StreamEventPayload::Delta(text)) {
                    return;
                }
            }
            Ok(Some(Err(error))) => {
                tracing::warn!(target = ?target, error = %error, "chat stream broke off");
                break StreamEventPayload::Failed {
                    before_stream: false,
                    message: error.to_string(),
                };
            }
            Ok(None) => break StreamEventPayload::Done,
            Err(_) => {
                tracing::warn!(target = ?target, "chat stream went idle");
                break StreamEventPayload::Failed {
                    before_stream: false,
                    message: idle_message(idle_timeout),
                };
            }
        }
    };

    tracing::debug!(target = ?target, "chat stream finished");
    emit(&event_tx, target, terminal);
}
