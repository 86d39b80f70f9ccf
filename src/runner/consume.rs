use futures_util::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ResultSlot, RunMode, Runner};
use crate::worker::executor::Outcome;

impl<I, T, M> Runner<I, T, M>
where
    I: Clone + Send + Sync + 'static,
    T: Send + 'static,
    M: RunMode,
{
    /// Take the receiver if this is the first consumer.
    async fn take_results(&self) -> Option<mpsc::Receiver<Outcome<T>>> {
        let mut slot = self.results.lock().await;
        match std::mem::replace(&mut *slot, ResultSlot::Consumed) {
            ResultSlot::Ready(rx) => Some(rx),
            ResultSlot::NotStarted => {
                *slot = ResultSlot::NotStarted;
                tracing::warn!(runner = %self.config.name, "Results consumed before run, ignoring");
                None
            }
            ResultSlot::Consumed => {
                tracing::debug!(runner = %self.config.name, "Results already consumed");
                None
            }
        }
    }

    /// Hand each outcome to `handler` as soon as its job finishes.
    ///
    /// Outcomes arrive in completion order. Returns once every job has
    /// reported, or once the runner is cancelled, after delivering whatever
    /// was already published. Only the first consumption call on a runner
    /// does anything; later calls return 0 immediately.
    ///
    /// Returns the number of outcomes handled.
    pub async fn consume_streaming<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(Outcome<T>),
    {
        let Some(mut rx) = self.take_results().await else {
            return 0;
        };

        let mut handled = 0;
        loop {
            tokio::select! {
                biased;
                outcome = rx.recv() => match outcome {
                    Some(outcome) => {
                        handler(outcome);
                        handled += 1;
                    }
                    None => break,
                },
                _ = self.cancel.cancelled() => {
                    handled += drain_published(&mut rx, &mut handler);
                    tracing::info!(
                        runner = %self.config.name,
                        handled,
                        jobs = self.job_count(),
                        "Stopped consuming, runner cancelled"
                    );
                    break;
                }
            }
        }
        handled
    }

    /// Wait for every job to finish, then hand all outcomes to `handler` in
    /// one pass.
    ///
    /// If the runner is cancelled first, only the outcomes published so far
    /// are delivered. Same single-consumer rule as
    /// [`consume_streaming`](Self::consume_streaming).
    pub async fn consume_all<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(Outcome<T>),
    {
        let Some(mut rx) = self.take_results().await else {
            return 0;
        };

        tokio::select! {
            biased;
            _ = self.tracker.wait() => {}
            _ = self.cancel.cancelled() => {
                tracing::info!(
                    runner = %self.config.name,
                    pending = self.pending_jobs(),
                    "Runner cancelled before all jobs finished"
                );
            }
        }

        drain_published(&mut rx, &mut handler)
    }

    /// The result stream as a [`Stream`].
    ///
    /// Ends when every job has reported, or as soon as the runner is
    /// cancelled. Unlike the `consume_*` methods it does not flush outcomes
    /// published before the cancellation. `None` if the results were
    /// already consumed or `run` was not called.
    pub async fn stream(&self) -> Option<impl Stream<Item = Outcome<T>> + Send + 'static> {
        let rx = self.take_results().await?;
        let cancelled = self.cancel.clone().cancelled_owned();
        Some(ReceiverStream::new(rx).take_until(cancelled))
    }
}

/// Deliver everything already sitting in the stream without waiting.
fn drain_published<T, F>(rx: &mut mpsc::Receiver<Outcome<T>>, handler: &mut F) -> usize
where
    F: FnMut(Outcome<T>),
{
    let mut handled = 0;
    while let Ok(outcome) = rx.try_recv() {
        handler(outcome);
        handled += 1;
    }
    handled
}
