//! Shared plumbing for codec worker threads
//!
//! Each worker owns one codec instance on a dedicated thread. Requests go in
//! over a crossbeam channel, events come out over a tokio channel, and the
//! lifecycle state is published through a watch so callers can await
//! readiness instead of guessing with timers.

use tokio::sync::watch;
use uuid::Uuid;

use crate::error::CodecError;

/// Identifies one encode or decode session
pub type CodecSessionId = Uuid;

/// Lifecycle of a codec worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerState {
    Uninitialized,
    /// Initialized and idle; decoders return here when starved of input
    Ready,
    Encoding,
    Decoding,
    Finished,
    Failed(CodecError),
}

impl WorkerState {
    /// Whether `encode`/`decode` requests are accepted
    pub fn accepts_work(&self) -> bool {
        matches!(self, Self::Ready | Self::Encoding | Self::Decoding)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed(_))
    }
}

/// Read side of a worker's state
#[derive(Clone)]
pub struct StateWatch {
    rx: watch::Receiver<WorkerState>,
}

impl StateWatch {
    pub(crate) fn channel() -> (watch::Sender<WorkerState>, Self) {
        let (tx, rx) = watch::channel(WorkerState::Uninitialized);
        (tx, Self { rx })
    }

    pub fn current(&self) -> WorkerState {
        self.rx.borrow().clone()
    }

    /// Wait until the worker can take work, or fails
    pub async fn wait_ready(&mut self) -> Result<(), CodecError> {
        let state = self
            .rx
            .wait_for(|s| s.accepts_work() || s.is_terminal())
            .await
            .map_err(|_| CodecError::WorkerGone)?
            .clone();
        match state {
            WorkerState::Failed(e) => Err(e),
            WorkerState::Finished => Err(CodecError::Finished),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_ready_resolves_on_ready() {
        let (tx, mut watch) = StateWatch::channel();
        assert_eq!(watch.current(), WorkerState::Uninitialized);

        let waiter = tokio::spawn(async move { watch.wait_ready().await });
        tx.send_replace(WorkerState::Ready);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_wait_ready_reports_failure() {
        let (tx, mut watch) = StateWatch::channel();
        tx.send_replace(WorkerState::Failed(CodecError::EncoderInit("boom".into())));
        assert_eq!(
            watch.wait_ready().await,
            Err(CodecError::EncoderInit("boom".into()))
        );
    }

    #[tokio::test]
    async fn test_wait_ready_worker_dropped() {
        let (tx, mut watch) = StateWatch::channel();
        drop(tx);
        assert_eq!(watch.wait_ready().await, Err(CodecError::WorkerGone));
    }
}
