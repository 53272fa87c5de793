//! Streaming one assistant turn: a producer task decodes and normalizes the body, the
//! consumer side folds each fragment into the conversation before handing it out.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::StreamConfig;
use crate::pipeline::decode::SseDecoder;
use crate::pipeline::normalize::Normalizer;
use crate::pipeline::PipelineError;
use crate::types::conversation::Conversation;
use crate::types::fragment::Fragment;
use crate::types::usage::Usage;
use crate::{BoxStream, Error, Result};

/// Cancels a [`TurnStream`] from anywhere. Cloning is cheap.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Stops reading the body. Fragments already buffered are still delivered, then the
    /// stream ends with [`Error::Cancelled`].
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

enum Failure {
    Cancelled,
    Other(String),
}

/// The fragments of one assistant turn, already folded into the conversation.
///
/// Poll it to display output as it arrives, then call [`TurnStream::finish`] to finalize
/// the turn. The stream ends after the first error.
pub struct TurnStream {
    rx: mpsc::Receiver<Result<Fragment>>,
    conversation: Conversation,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    failure: Option<Failure>,
    ended: bool,
}

/// Starts streaming an assistant turn from `body` into `conversation`.
///
/// Must be called within a tokio runtime. The body is owned by the producer task and is
/// dropped as soon as the stream ends, fails or is cancelled.
pub fn stream_turn<N: Normalizer>(
    conversation: Conversation,
    body: BoxStream<'static, Bytes>,
    normalizer: N,
    config: &StreamConfig,
) -> TurnStream {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let events = SseDecoder::<N::Event, N::Envelope>::from_config(config).decode_stream(body);
    let vendor = normalizer.vendor();

    let task = tokio::spawn(async move {
        debug!(vendor, "turn stream started");
        let cancelled = tokio::select! {
            biased;
            _ = token.cancelled() => true,
            _ = produce(events, normalizer, &tx) => false,
        };
        if cancelled {
            debug!(vendor, "turn stream cancelled");
            let _ = tx.send(Err(Error::Cancelled)).await;
        } else {
            debug!(vendor, "turn stream ended");
        }
    });

    TurnStream {
        rx,
        conversation,
        cancel,
        task: Some(task),
        failure: None,
        ended: false,
    }
}

async fn produce<N: Normalizer>(
    mut events: BoxStream<'static, N::Event>,
    mut normalizer: N,
    tx: &mpsc::Sender<Result<Fragment>>,
) {
    while let Some(item) = events.next().await {
        let fragments = match item.and_then(|ev| normalizer.normalize(ev)) {
            Ok(f) => f,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };
        for f in fragments {
            trace!(?f, "fragment");
            if tx.send(Ok(f)).await.is_err() {
                return;
            }
        }
    }
    drop(events);
    match normalizer.finish() {
        Ok(fragments) => {
            for f in fragments {
                if tx.send(Ok(f)).await.is_err() {
                    return;
                }
            }
        }
        Err(e) => {
            let _ = tx.send(Err(e)).await;
        }
    }
}

impl TurnStream {
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.cancel.clone(),
        }
    }

    /// The conversation including everything received so far.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Drains the stream, finalizes the turn and returns the conversation with its usage.
    ///
    /// Errors already handed out by the stream are reported again; cancellation keeps
    /// surfacing as [`Error::Cancelled`].
    pub async fn finish(mut self) -> Result<(Conversation, Usage)> {
        while let Some(item) = self.next().await {
            item?;
        }
        match self.failure.take() {
            Some(Failure::Cancelled) => return Err(Error::Cancelled),
            Some(Failure::Other(reason)) => {
                return Err(PipelineError::Aborted { reason }.into())
            }
            None => {}
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                return Err(PipelineError::Aborted {
                    reason: format!("stream task failed: {}", e),
                }
                .into());
            }
        }
        let usage = self.conversation.finish_turn()?;
        Ok((std::mem::take(&mut self.conversation), usage))
    }

    /// Gives up on the turn and returns the conversation as accumulated so far.
    pub fn into_conversation(mut self) -> Conversation {
        self.cancel.cancel();
        std::mem::take(&mut self.conversation)
    }

    fn fail(&mut self, err: &Error) {
        self.ended = true;
        self.cancel.cancel();
        self.failure = Some(if err.is_cancelled() {
            Failure::Cancelled
        } else {
            Failure::Other(err.to_string())
        });
    }
}

impl Stream for TurnStream {
    type Item = Result<Fragment>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.ended {
            return Poll::Ready(None);
        }
        match ready!(this.rx.poll_recv(cx)) {
            Some(Ok(fragment)) => match this.conversation.accumulate(&fragment) {
                Ok(()) => Poll::Ready(Some(Ok(fragment))),
                Err(e) => {
                    let err = Error::from(e);
                    this.fail(&err);
                    Poll::Ready(Some(Err(err)))
                }
            },
            Some(Err(err)) => {
                this.fail(&err);
                Poll::Ready(Some(Err(err)))
            }
            None => {
                this.ended = true;
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
