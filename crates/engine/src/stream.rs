//! Stream coordination: provider chunks to cancellable client events.
//!
//! [`StreamCoordinator::drive`] consumes one provider stream, forwards text
//! as [`StreamEvent::Text`], buffers tool-call fragments until the stream
//! ends, and enforces an inactivity timeout. It stops as soon as the request
//! is cancelled or the client goes away. The upstream receiver is owned by
//! `drive` and dropped on every exit path, which makes the provider's
//! producer task fail its next send and release the connection.
//!
//! [`QueryStream`] is the client half: a `futures::Stream` of events that
//! cancels the request when dropped.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use repolens_core::error::ProviderError;
use repolens_core::provider::{ProviderStream, RawToolCall, Usage};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace};

use crate::assembler::ToolCallAccumulator;
use crate::error::QueryError;
use crate::types::StreamEvent;

/// Everything one streamed provider round produced.
#[derive(Debug, Clone, Default)]
pub struct StreamedTurn {
    pub content: String,
    pub tool_calls: Vec<RawToolCall>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone)]
pub struct StreamCoordinator {
    idle_timeout: Duration,
}

impl StreamCoordinator {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }

    /// Consume `upstream` to completion, forwarding text to `sink`.
    pub async fn drive(
        &self,
        mut upstream: ProviderStream,
        sink: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<StreamedTurn, QueryError> {
        let mut turn = StreamedTurn::default();
        let mut fragments = ToolCallAccumulator::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Stream cancelled, dropping provider stream");
                    return Err(QueryError::Cancelled);
                }
                _ = sink.closed() => {
                    debug!("Stream consumer went away, dropping provider stream");
                    cancel.cancel();
                    return Err(QueryError::Cancelled);
                }
                next = tokio::time::timeout(self.idle_timeout, upstream.recv()) => next,
            };

            let chunk = match next {
                Err(_) => {
                    return Err(QueryError::Provider(ProviderError::Timeout(format!(
                        "no stream activity for {}s",
                        self.idle_timeout.as_secs()
                    ))));
                }
                Ok(None) => {
                    trace!("Provider stream closed without done marker");
                    break;
                }
                Ok(Some(Err(e))) => return Err(QueryError::Provider(e)),
                Ok(Some(Ok(chunk))) => chunk,
            };

            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                turn.content.push_str(&text);
                emit(sink, cancel, StreamEvent::Text { text }).await?;
            }
            for fragment in chunk.tool_call_fragments {
                fragments.merge(fragment);
            }
            if chunk.usage.is_some() {
                turn.usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }

        turn.tool_calls = fragments.finish();
        Ok(turn)
    }
}

/// Send one event, giving up if the request is cancelled or the client left.
pub async fn emit(
    sink: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
    event: StreamEvent,
) -> Result<(), QueryError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(QueryError::Cancelled),
        sent = sink.send(event) => sent.map_err(|_| {
            cancel.cancel();
            QueryError::Cancelled
        }),
    }
}

/// Client half of a streaming query.
///
/// Yields events until a terminal `done`/`error` event. Dropping it, or
/// calling [`cancel`](Self::cancel), cancels the request; no events are
/// yielded after cancellation.
pub struct QueryStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    cancelled: bool,
    _guard: DropGuard,
}

impl QueryStream {
    pub(crate) fn new(rx: mpsc::Receiver<StreamEvent>, cancel: CancellationToken) -> Self {
        let guard = cancel.clone().drop_guard();
        Self {
            rx,
            cancel,
            cancelled: false,
            _guard: guard,
        }
    }

    /// Stop the request. Buffered events are discarded.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.cancel.cancel();
        self.rx.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled || self.cancel.is_cancelled()
    }

    /// Token that is cancelled when this stream is cancelled or dropped.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl futures::Stream for QueryStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancelled {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for QueryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStream")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
