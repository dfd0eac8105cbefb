use std::fmt::Display;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

/// Work done for one item of a walk
#[async_trait]
pub trait ItemHandler<T: Send + 'static> {
    async fn handle(&mut self, item: T) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkSummary {
    pub processed: usize,
    pub failed: usize,
}

/// Visits items in order and sleeps `pause` after every `every` items,
/// keeping remote registries below their rate limits
#[derive(Debug, Clone, Copy)]
pub struct Walker {
    every: usize,
    pause: Duration,
}

impl Default for Walker {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(5))
    }
}

impl Walker {
    pub fn new(every: usize, pause: Duration) -> Self {
        Self {
            every: every.max(1),
            pause,
        }
    }

    pub async fn walk<T, I, H>(&self, items: I, handler: &mut H) -> WalkSummary
    where
        T: Display + Send + 'static,
        I: IntoIterator<Item = T>,
        H: ItemHandler<T> + Send + ?Sized,
    {
        let mut summary = WalkSummary::default();
        let mut items = items.into_iter().peekable();

        while let Some(item) = items.next() {
            let label = item.to_string();
            if let Err(e) = handler.handle(item).await {
                warn!("{}: {:#}", label, e);
                summary.failed += 1;
            }
            summary.processed += 1;

            if summary.processed % self.every == 0 && items.peek().is_some() {
                info!(
                    "processed {} items ({} failed), pausing {:?}",
                    summary.processed, summary.failed, self.pause
                );
                tokio::time::sleep(self.pause).await;
            }
        }

        summary
    }
}
