//! Scripted upstream for tests
//!
//! Each `connect` consumes the next queued script: either a connect
//! failure or a stream of chunks.

use super::{ByteStream, UpstreamSource};
use crate::relay::{RelayError, SessionId};
use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

enum Script {
    Fail(RelayError),
    Stream {
        items: Vec<Result<Bytes, RelayError>>,
        hang: bool,
    },
}

/// Mock upstream that replays queued scripts and records every call
#[derive(Default)]
pub struct ScriptedUpstream {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<String>>,
    dropped: Arc<AtomicBool>,
    chunks: Arc<AtomicUsize>,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connect failure
    pub fn fail(self, error: RelayError) -> Self {
        self.scripts.lock().unwrap().push_back(Script::Fail(error));
        self
    }

    /// Queue a stream sending each line as its own chunk
    pub fn lines(self, lines: &[&str]) -> Self {
        let chunks: Vec<String> = lines.iter().map(|l| format!("{l}\n")).collect();
        self.raw_chunks(&chunks.iter().map(String::as_str).collect::<Vec<_>>())
    }

    /// Queue a stream sending these chunks verbatim
    pub fn raw_chunks(self, chunks: &[&str]) -> Self {
        let items = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
            .collect();
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::Stream { items, hang: false });
        self
    }

    /// The last queued stream fails mid-read after its chunks
    pub fn then_error(self, error: RelayError) -> Self {
        if let Some(Script::Stream { items, .. }) = self.scripts.lock().unwrap().back_mut() {
            items.push(Err(error));
        }
        self
    }

    /// The last queued stream stays open after its chunks
    pub fn then_hang(self) -> Self {
        if let Some(Script::Stream { hang, .. }) = self.scripts.lock().unwrap().back_mut() {
            *hang = true;
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn sessions(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Stream items handed to the reader so far, across all streams
    pub fn chunks_read(&self) -> usize {
        self.chunks.load(Ordering::SeqCst)
    }

    /// Whether the most recent stream handed out has been dropped
    pub fn stream_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl UpstreamSource for ScriptedUpstream {
    async fn connect(&self, session: &SessionId) -> Result<ByteStream, RelayError> {
        self.calls.lock().unwrap().push(session.as_str().to_string());

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Fail(RelayError::network("no scripted response")));

        match script {
            Script::Fail(error) => Err(error),
            Script::Stream { items, hang } => {
                self.dropped.store(false, Ordering::SeqCst);
                let flag = DropFlag(self.dropped.clone());
                let chunks = self.chunks.clone();
                let tail: ByteStream = if hang {
                    stream::pending().boxed()
                } else {
                    stream::empty().boxed()
                };
                Ok(stream::iter(items)
                    .chain(tail)
                    .map(move |item| {
                        let _ = &flag;
                        chunks.fetch_add(1, Ordering::SeqCst);
                        item
                    })
                    .boxed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripts_replay_in_order() {
        let upstream = ScriptedUpstream::new()
            .fail(RelayError::network("down"))
            .lines(&["a", "b"]);
        let session = SessionId::parse("s").unwrap();

        assert!(upstream.connect(&session).await.is_err());
        let chunks: Vec<_> = upstream.connect(&session).await.unwrap().collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(upstream.chunks_read(), 2);
        assert_eq!(upstream.sessions(), vec!["s", "s"]);
        assert!(upstream.connect(&session).await.is_err());
    }

    #[tokio::test]
    async fn test_drop_is_observed() {
        let upstream = ScriptedUpstream::new().lines(&["a"]).then_hang();
        let session = SessionId::parse("s").unwrap();

        let stream = upstream.connect(&session).await.unwrap();
        assert!(!upstream.stream_dropped());
        drop(stream);
        assert!(upstream.stream_dropped());
    }
}
