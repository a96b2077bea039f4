//! Dispatch Loop
//!
//! Reads updates one at a time and decodes each in its own task. Decode tasks
//! share nothing but the sink, so completion order is not arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::decoder::decode_update;
use crate::publisher::RecordSink;
use crate::source::{SourceError, UpdateSource};
use crate::update::SubscribeUpdate;

/// Counters collected by a pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Updates read from the source
    pub received: u64,
    /// Records produced
    pub decoded: u64,
    /// Heartbeats and other non-transaction updates
    pub skipped: u64,
    /// Updates rejected with a decode error
    pub failed: u64,
    /// Recoverable issues across all records
    pub warnings: u64,
    /// Records the sink refused
    pub delivery_failures: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    decoded: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    warnings: AtomicU64,
    delivery_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            received: self.received.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Fans updates out to decode tasks and hands results to a sink
pub struct Pipeline<K> {
    sink: Arc<K>,
    counters: Arc<Counters>,
}

impl<K: RecordSink> Pipeline<K> {
    pub fn new(sink: K) -> Self {
        Self::with_shared_sink(Arc::new(sink))
    }

    /// Use a sink the caller keeps a handle on
    pub fn with_shared_sink(sink: Arc<K>) -> Self {
        Self {
            sink,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Counters so far
    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Consume `source` until it ends
    ///
    /// One task is spawned per update. When the source ends or fails, tasks
    /// already spawned are awaited before returning. `next_update` must be
    /// cancel safe, since it races against task completion.
    ///
    /// # Returns
    /// The final counters, or the source error that ended the stream
    #[instrument(name = "pipeline", skip_all)]
    pub async fn run<S: UpdateSource>(&self, mut source: S) -> Result<PipelineStats, SourceError> {
        let mut tasks = JoinSet::new();
        info!("Pipeline started");

        let outcome = loop {
            tokio::select! {
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Decode task failed: {}", e);
                    }
                }
                next = source.next_update() => match next {
                    Ok(Some(update)) => {
                        self.counters.received.fetch_add(1, Ordering::Relaxed);
                        let sink = Arc::clone(&self.sink);
                        let counters = Arc::clone(&self.counters);
                        tasks.spawn(async move { process_update(update, sink.as_ref(), &counters) });
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => {
                        error!("Update stream failed: {}", e);
                        break Err(e);
                    }
                },
            }
        };

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Decode task failed: {}", e);
            }
        }

        let stats = self.stats();
        info!(
            received = stats.received,
            decoded = stats.decoded,
            skipped = stats.skipped,
            failed = stats.failed,
            "Pipeline stopped"
        );
        outcome.map(|()| stats)
    }
}

fn process_update<K: RecordSink>(update: SubscribeUpdate, sink: &K, counters: &Counters) {
    match decode_update(&update) {
        Ok(Some(decoded)) => {
            counters.decoded.fetch_add(1, Ordering::Relaxed);
            if !decoded.is_clean() {
                counters
                    .warnings
                    .fetch_add(decoded.warnings.len() as u64, Ordering::Relaxed);
                warn!(
                    signature = %decoded.record.signature,
                    warnings = decoded.warnings.len(),
                    "Decoded transaction with skipped entries"
                );
            }

            let signature = decoded.record.signature.clone();
            if let Err(e) = sink.deliver(decoded) {
                counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
                error!(%signature, "Failed to deliver record: {}", e);
            }
        }
        Ok(None) => {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            debug!("Skipped update without transaction");
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!("Failed to decode update: {}", e);
            if let Err(sink_error) = sink.rejected(&e) {
                counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
                error!(slot = e.slot(), "Failed to deliver rejection: {}", sink_error);
            }
        }
    }
}
