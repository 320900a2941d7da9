use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Sliding-window limiter shared by all workers of a pool.
///
/// At most `max` acquisitions succeed inside any window of length `window`.
pub struct RateLimiter {
    max: usize,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max: max.max(1),
            window,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Waits until a slot in the window is free, then takes it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut starts = self.starts.lock();
                let now = Instant::now();
                while starts
                    .front()
                    .is_some_and(|start| now.duration_since(*start) >= self.window)
                {
                    starts.pop_front();
                }

                if starts.len() < self.max {
                    starts.push_back(now);
                    return;
                }
                // Oldest start leaves the window first
                self.window - now.duration_since(starts[0])
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_wait_for_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let begin = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(begin.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        assert_eq!(begin.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_between_tasks() {
        let limiter = Arc::new(RateLimiter::new(2, Duration::from_millis(500)));
        let begin = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap().duration_since(begin));
        }
        times.sort();
        assert_eq!(
            times,
            vec![
                Duration::ZERO,
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(1000),
            ]
        );
    }
}
