//! Event relay
//!
//! Bridges one client event stream to one upstream event stream. Every
//! relay emits a connect notice, the classified upstream content, exactly
//! one terminal frame and a disconnect notice, in that order, whatever the
//! upstream does.

mod classify;
mod completion;
mod decoder;
mod error;
mod frame;
mod session;

pub use error::{RelayError, RelayErrorKind};
pub use frame::RelayFrame;
pub use session::SessionId;

use classify::LineClassifier;
use completion::CompletionPolicy;
use decoder::{LineDecoder, DEFAULT_MAX_LINE_BYTES};
use frame::{CONNECT_NOTICE, DISCONNECT_NOTICE};

use crate::upstream::{ByteStream, UpstreamSource};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

/// Frames of one relay, ending when the relay closes
pub type FrameStream = ReceiverStream<RelayFrame>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// Longest wait for upstream response headers and for each later chunk
    pub idle_timeout: Duration,
    /// Frames buffered before upstream reads pause
    pub channel_capacity: usize,
    /// Upstream lines longer than this are dropped
    pub max_line_len: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            channel_capacity: 64,
            max_line_len: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Opens relays against one upstream source
#[derive(Clone)]
pub struct Relay {
    upstream: Arc<dyn UpstreamSource>,
    classifier: LineClassifier,
    settings: RelaySettings,
}

impl Relay {
    pub fn new(upstream: Arc<dyn UpstreamSource>, settings: RelaySettings) -> Self {
        Self {
            upstream,
            classifier: LineClassifier::new(CompletionPolicy::default()),
            settings,
        }
    }

    /// Start a relay for `session_id`.
    ///
    /// Blank ids fail with `InvalidArgument` before any upstream call.
    /// Otherwise the relay runs on its own task and its frames arrive on the
    /// returned stream. Dropping the stream aborts the relay and closes the
    /// upstream connection.
    pub fn open(&self, session_id: &str) -> Result<FrameStream, RelayError> {
        let session = SessionId::parse(session_id)?;
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));

        let relay_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("relay", %relay_id, session = %session);

        let task = RelayTask {
            upstream: self.upstream.clone(),
            classifier: self.classifier.clone(),
            idle_timeout: self.settings.idle_timeout,
            max_line_len: self.settings.max_line_len,
            session,
            sink: FrameSink { tx },
        };
        tokio::spawn(task.run().instrument(span));

        Ok(ReceiverStream::new(rx))
    }
}

/// The client stream was dropped
#[derive(Debug)]
struct ClientGone;

struct FrameSink {
    tx: mpsc::Sender<RelayFrame>,
}

impl FrameSink {
    async fn send(&self, frame: RelayFrame) -> Result<(), ClientGone> {
        self.tx.send(frame).await.map_err(|_| ClientGone)
    }

    async fn closed(&self) {
        self.tx.closed().await;
    }
}

struct RelayTask {
    upstream: Arc<dyn UpstreamSource>,
    classifier: LineClassifier,
    idle_timeout: Duration,
    max_line_len: usize,
    session: SessionId,
    sink: FrameSink,
}

impl RelayTask {
    async fn run(self) {
        let start = Instant::now();
        tracing::info!("Relay started");

        match self.drive().await {
            Ok(upstream_signaled) => tracing::info!(
                upstream_signaled,
                duration_ms = %start.elapsed().as_millis(),
                "Relay finished"
            ),
            Err(ClientGone) => tracing::info!(
                duration_ms = %start.elapsed().as_millis(),
                "Client disconnected, relay aborted"
            ),
        }
    }

    /// Returns whether upstream signaled completion
    async fn drive(&self) -> Result<bool, ClientGone> {
        self.sink.send(RelayFrame::notice(CONNECT_NOTICE)).await?;

        let upstream_signaled = match self.connect().await? {
            Ok(stream) => self.pump(stream).await?,
            Err(e) => {
                self.report(&e).await?;
                false
            }
        };

        self.sink.send(RelayFrame::terminal(upstream_signaled)).await?;
        self.sink.send(RelayFrame::notice(DISCONNECT_NOTICE)).await?;
        Ok(upstream_signaled)
    }

    /// Open the upstream stream, bounded by the idle timeout
    async fn connect(&self) -> Result<Result<ByteStream, RelayError>, ClientGone> {
        let connect = tokio::time::timeout(self.idle_timeout, self.upstream.connect(&self.session));
        tokio::select! {
            () = self.sink.closed() => Err(ClientGone),
            result = connect => Ok(result.unwrap_or_else(|_| {
                Err(RelayError::response_timeout(self.idle_timeout))
            })),
        }
    }

    /// Read upstream until EOF, error, idle timeout or completion
    async fn pump(&self, mut stream: ByteStream) -> Result<bool, ClientGone> {
        let mut decoder = LineDecoder::new(self.max_line_len);

        loop {
            let next = tokio::select! {
                () = self.sink.closed() => return Err(ClientGone),
                next = tokio::time::timeout(self.idle_timeout, stream.next()) => next,
            };

            let lines = match next {
                Ok(Some(Ok(chunk))) => decoder.push(&chunk),
                Ok(Some(Err(e))) => {
                    self.report(&e).await?;
                    return Ok(false);
                }
                Ok(None) => {
                    tracing::debug!("Upstream stream ended");
                    return self.forward(decoder.finish().into_iter().collect()).await;
                }
                Err(_) => {
                    self.report(&RelayError::idle_timeout(self.idle_timeout)).await?;
                    return Ok(false);
                }
            };

            if self.forward(lines).await? {
                return Ok(true);
            }
        }
    }

    /// Classify and send lines; stops at the first completing line
    async fn forward(&self, lines: Vec<String>) -> Result<bool, ClientGone> {
        for line in lines {
            let Some(classified) = self.classifier.classify(&line) else {
                continue;
            };
            self.sink.send(classified.frame).await?;
            if classified.completes {
                tracing::info!(matcher = ?classified.matcher, "Upstream signaled completion");
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn report(&self, error: &RelayError) -> Result<(), ClientGone> {
        tracing::warn!(error = %error, kind = ?error.kind, "Upstream failed");
        self.sink.send(RelayFrame::error(error.message.clone())).await
    }
}
