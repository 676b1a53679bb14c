//! Radio serialiser (spec §4.4): a single-capacity token shared across all
//! supervisors so only one dial is ever in flight on the shared controller.
//! `tokio::sync::Semaphore` wakes waiters in acquire order, giving FIFO
//! fairness during reconnect storms for free.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Clone)]
pub struct RadioToken {
    semaphore: Arc<Semaphore>,
}

impl RadioToken {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Acquire the token for the duration of one dial attempt. The permit
    /// is released when the returned guard is dropped (dial completion,
    /// success or failure).
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("semaphore is never closed")
    }
}

impl Default for RadioToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn only_one_dial_in_flight() {
        let token = RadioToken::new();
        let first = token.acquire().await;

        let token2 = token.clone();
        let waiter = tokio::spawn(async move {
            let _permit = token2.acquire().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
    }
}
