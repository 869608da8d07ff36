//! Best-effort progress delivery for batch lookups.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    pub current: usize,
    pub total: usize,
    pub message: String,
}

/// Receives one report per processed object.
pub trait ProgressSink: Send {
    fn report(&mut self, progress: &BatchProgress);
}

impl<F> ProgressSink for F
where
    F: FnMut(&BatchProgress) + Send,
{
    fn report(&mut self, progress: &BatchProgress) {
        self(progress);
    }
}

/// Forwards reports over a bounded channel; reports are dropped when it is full.
pub struct ChannelProgress {
    sender: SyncSender<BatchProgress>,
}

impl ChannelProgress {
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, Receiver<BatchProgress>) {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&mut self, progress: &BatchProgress) {
        match self.sender.try_send(progress.clone()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                tracing::trace!(current = progress.current, "progress channel full; report dropped");
            }
        }
    }
}

/// Logs every report at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&mut self, progress: &BatchProgress) {
        info!(
            current = progress.current,
            total = progress.total,
            "{}",
            progress.message
        );
    }
}

/// Call `sink`, containing any panic it raises.
pub(crate) fn deliver(sink: &mut dyn ProgressSink, progress: &BatchProgress) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| sink.report(progress)));
    if outcome.is_err() {
        warn!(
            current = progress.current,
            total = progress.total,
            "progress callback panicked; continuing"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(current: usize) -> BatchProgress {
        BatchProgress {
            current,
            total: 3,
            message: format!("object {current}"),
        }
    }

    #[test]
    fn closures_receive_reports() {
        let mut seen = Vec::new();
        {
            let mut sink = |p: &BatchProgress| seen.push(p.current);
            deliver(&mut sink, &progress(1));
            deliver(&mut sink, &progress(2));
        }
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn full_or_closed_channels_never_block() {
        let (mut sink, receiver) = ChannelProgress::bounded(1);
        deliver(&mut sink, &progress(1));
        deliver(&mut sink, &progress(2));
        assert_eq!(receiver.try_recv().map(|p| p.current), Ok(1));
        assert!(receiver.try_recv().is_err());
        drop(receiver);
        deliver(&mut sink, &progress(3));
    }

    #[test]
    fn panicking_sinks_are_contained() {
        let mut calls = 0;
        let mut sink = |_: &BatchProgress| {
            calls += 1;
            panic!("ui went away");
        };
        deliver(&mut sink, &progress(1));
        deliver(&mut sink, &progress(2));
        assert_eq!(calls, 2);
    }
}
