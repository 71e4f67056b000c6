// ABOUTME: OutputSink writes one turn's frames to a client; FrameStream is the client side.
// ABOUTME: Dropping the FrameStream is how a client disconnect is observed.

use crate::frame::Frame;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Create a connected sink/stream pair holding up to `capacity` unread frames.
pub fn channel(capacity: usize) -> (OutputSink, FrameStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let disconnected = CancellationToken::new();
    let sink = OutputSink {
        shared: Arc::new(SinkShared {
            tx: Mutex::new(Some(tx)),
            finished: CancellationToken::new(),
            disconnected: disconnected.clone(),
        }),
    };
    (sink, FrameStream { rx, disconnected })
}

/// Server side of a turn's frame channel.
///
/// Clones share one channel. After [`OutputSink::finish`] nothing more can be
/// written, which is what keeps a late delta from landing after the terminal
/// frame. A delta waiting for room in a full channel gives up as soon as the
/// sink is finished, so a client that stops reading cannot stall the writer.
#[derive(Clone)]
pub struct OutputSink {
    shared: Arc<SinkShared>,
}

struct SinkShared {
    // Taken on finish so the stream closes. Never held across an await.
    tx: Mutex<Option<mpsc::Sender<Frame>>>,
    finished: CancellationToken,
    disconnected: CancellationToken,
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("open", &self.is_open())
            .finish()
    }
}

impl OutputSink {
    fn sender(&self) -> Option<mpsc::Sender<Frame>> {
        self.shared
            .tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Write a non-terminal frame. Returns false if the sink is finished or
    /// the client went away, including while waiting for channel space.
    pub async fn send(&self, frame: Frame) -> bool {
        if frame.is_terminal() {
            return self.finish(Some(frame)).await;
        }
        if !self.is_open() {
            return false;
        }
        let Some(tx) = self.sender() else {
            return false;
        };

        let permit = tokio::select! {
            biased;
            _ = self.shared.finished.cancelled() => return false,
            _ = self.shared.disconnected.cancelled() => return false,
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };

        // Commit only if finish has not taken the channel meanwhile
        let guard = self.shared.tx.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            return false;
        }
        permit.send(frame);
        true
    }

    /// Write the terminal frame (if any, and if the client is still there)
    /// and close the stream. Only the first call has any effect.
    ///
    /// Pending delta writes are abandoned first. Waiting for room for the
    /// terminal frame ends when the client disconnects.
    pub async fn finish(&self, terminal: Option<Frame>) -> bool {
        self.shared.finished.cancel();
        let Some(tx) = self
            .shared
            .tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return false;
        };

        match terminal {
            Some(frame) if !self.shared.disconnected.is_cancelled() => tokio::select! {
                biased;
                _ = self.shared.disconnected.cancelled() => false,
                sent = tx.send(frame) => sent.is_ok(),
            },
            _ => false,
        }
    }

    /// Neither finished nor disconnected
    pub fn is_open(&self) -> bool {
        !self.shared.finished.is_cancelled() && !self.shared.disconnected.is_cancelled()
    }

    pub fn is_disconnected(&self) -> bool {
        self.shared.disconnected.is_cancelled()
    }

    /// Resolves once the client side has been dropped
    pub async fn closed(&self) {
        self.shared.disconnected.cancelled().await
    }
}

/// Client side of a turn: a stream of frames ending after the terminal one.
#[derive(Debug)]
pub struct FrameStream {
    rx: mpsc::Receiver<Frame>,
    disconnected: CancellationToken,
}

impl FrameStream {
    /// A stream that yields `frame` and ends. Used for failures detected
    /// before a turn started.
    pub fn single(frame: Frame) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1 and a fresh channel: this cannot fail
        let _ = tx.try_send(frame);
        Self {
            rx,
            disconnected: CancellationToken::new(),
        }
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

impl Stream for FrameStream {
    type Item = Frame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.disconnected.cancel();
    }
}
