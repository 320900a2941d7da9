use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Background task tracking the peak memory of a running instance
pub struct MemorySampler {
    token: CancellationToken,
    handle: JoinHandle<u64>,
}

impl MemorySampler {
    /// Calls `probe` every `interval` and keeps the largest reading in bytes.
    ///
    /// A probe returning `None` is a missed sample, not a zero reading.
    pub fn spawn<F, Fut>(interval: Duration, mut probe: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Option<u64>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let mut peak = 0;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(bytes) = probe().await {
                            peak = peak.max(bytes);
                        }
                    }
                }
            }
            peak
        });

        Self { token, handle }
    }

    /// Stops sampling and returns the peak seen so far
    pub async fn finish(self) -> u64 {
        self.token.cancel();
        match self.handle.await {
            Ok(peak) => peak,
            Err(e) => {
                log::warn!("Memory sampler task failed: {e}");
                0
            }
        }
    }
}
