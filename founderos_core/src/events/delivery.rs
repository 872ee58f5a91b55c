//! The background delivery thread: decides when to drain the queue and drives the transport.
//!
//! Public tracker methods never touch the network; they only push events and send commands over a
//! channel. The delivery thread waits on that channel with a timeout, so one loop serves all
//! flush triggers (interval tick, size threshold, explicit flush, teardown) and at most one flush
//! cycle is ever in flight.

use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use rand::{thread_rng, Rng};

use crate::events::{EventBatch, EventQueue, PipelineStats, Transport, TransportOutcome};
use crate::{Error, Result, TrackerConfig};

/// Scheduling parameters for [`DeliveryThread`], derived from [`TrackerConfig`].
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Events per batch. 1 when batching is disabled.
    pub batch_size: usize,
    /// Interval between timer-driven flushes.
    pub flush_interval: Duration,
    /// Initial wait before retrying a failed batch. Doubles per attempt.
    pub retry_interval: Duration,
    /// Upper bound on the retry wait.
    pub max_retry_delay: Duration,
    /// Retries allowed for a batch after its first failed delivery.
    pub max_retries: u32,
    /// Deadline for the best-effort final flush at teardown.
    pub shutdown_timeout: Duration,
}

impl DeliveryConfig {
    /// Default value for [`DeliveryConfig::shutdown_timeout`].
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

    /// Derive scheduling parameters from a tracker configuration.
    pub fn from_tracker_config(config: &TrackerConfig) -> DeliveryConfig {
        DeliveryConfig {
            batch_size: if config.batch_requests {
                config.batch_size.max(1)
            } else {
                1
            },
            flush_interval: Duration::from_millis(config.batch_flush_interval_ms),
            retry_interval: Duration::from_millis(config.retry_interval_ms),
            max_retry_delay: Duration::from_millis(config.max_retry_delay_ms),
            max_retries: config.max_batch_retries,
            shutdown_timeout: DeliveryConfig::DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

#[derive(Debug)]
enum Command {
    Flush,
    Stop,
}

/// Handle to the delivery thread.
///
/// Dropping the handle also stops the thread: the channel disconnects, and the thread performs
/// its final flush and exits.
pub struct DeliveryThread {
    join_handle: std::thread::JoinHandle<()>,
    command_sender: SyncSender<Command>,
}

impl DeliveryThread {
    /// Start the delivery thread.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the thread failed to start.
    pub fn start<T: Transport>(
        queue: Arc<EventQueue>,
        transport: T,
        config: DeliveryConfig,
        stats: Arc<PipelineStats>,
    ) -> std::io::Result<DeliveryThread> {
        // Using `sync_channel` here as it makes the sender `Sync` (shareable between threads).
        // The buffer only carries flush/stop commands; extra flush requests beyond the buffer are
        // safe to drop since a single pending one already covers them.
        let (command_sender, command_receiver) = std::sync::mpsc::sync_channel::<Command>(16);

        let join_handle = std::thread::Builder::new()
            .name("founderos-delivery".to_owned())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        log::error!(target: "founderos", "failed to start delivery runtime: {err}");
                        return;
                    }
                };

                run_loop(&queue, &transport, &config, &stats, &command_receiver, &runtime);
            })?;

        Ok(DeliveryThread {
            join_handle,
            command_sender,
        })
    }

    /// Ask the thread to flush now. Never blocks; requests are coalesced with any already
    /// pending.
    pub fn request_flush(&self) {
        let _ = self.command_sender.try_send(Command::Flush);
    }

    /// Ask the thread to stop after a best-effort final flush. Does not wait for it to exit.
    pub fn stop(&self) {
        let _ = self.command_sender.try_send(Command::Stop);
    }

    /// Stop the thread and block until it has performed its final flush and exited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeliveryThreadPanicked`] if the thread has panicked.
    pub fn shutdown(self) -> Result<()> {
        // Error means the receiver was dropped (thread exited already); nothing to do then.
        let _ = self.command_sender.send(Command::Stop);

        self.join_handle
            .join()
            .map_err(|_| Error::DeliveryThreadPanicked)?;

        Ok(())
    }
}

fn run_loop<T: Transport>(
    queue: &EventQueue,
    transport: &T,
    config: &DeliveryConfig,
    stats: &PipelineStats,
    receiver: &Receiver<Command>,
    runtime: &tokio::runtime::Runtime,
) {
    let mut sequence: u64 = 0;
    let mut attempts: u32 = 0;
    let mut backoff = config.retry_interval;
    let mut wait = config.flush_interval;

    loop {
        let stopping = match receiver.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(Command::Flush) => drain_flush_commands(receiver),
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => true,
        };

        if stopping {
            final_flush(queue, transport, config, stats, runtime, &mut sequence);
            log::debug!(target: "founderos", "delivery thread stopping");
            return;
        }

        wait = config.flush_interval;

        loop {
            let events = queue.drain_up_to(config.batch_size);
            if events.is_empty() {
                attempts = 0;
                backoff = config.retry_interval;
                break;
            }

            sequence += 1;
            let batch = EventBatch { sequence, events };

            match runtime.block_on(transport.send(&batch)) {
                TransportOutcome::Delivered => {
                    let delivered = queue.commit_in_flight();
                    stats.record_delivery(delivered);
                    attempts = 0;
                    backoff = config.retry_interval;
                    log::debug!(target: "founderos",
                                sequence = batch.sequence, events = delivered as u64;
                                "batch delivered");
                }
                TransportOutcome::Rejected { status } => {
                    let discarded = queue.discard_in_flight();
                    stats.record_dropped_batch();
                    attempts = 0;
                    backoff = config.retry_interval;
                    log::warn!(target: "founderos",
                               "collection endpoint rejected batch with status {status}, \
                                discarding {discarded} events");
                }
                TransportOutcome::TransientFailure { reason } => {
                    attempts += 1;
                    if attempts > config.max_retries {
                        let discarded = queue.discard_in_flight();
                        stats.record_dropped_batch();
                        log::warn!(target: "founderos",
                                   "dropping batch of {discarded} events after {attempts} failed \
                                    attempts: {reason}");
                        attempts = 0;
                        backoff = config.retry_interval;
                        continue;
                    }

                    queue.requeue_in_flight();
                    stats.record_retry();
                    wait = jitter(backoff, backoff / 4);
                    backoff = std::cmp::min(backoff * 2, config.max_retry_delay);
                    log::warn!(target: "founderos",
                               "transient delivery failure (attempt {attempts}): {reason}; \
                                retrying in {wait:?}");
                    break;
                }
            }
        }
    }
}

/// Coalesce queued flush requests so one cycle serves them all. Returns true if a stop command
/// was found among them.
fn drain_flush_commands(receiver: &Receiver<Command>) -> bool {
    loop {
        match receiver.try_recv() {
            Ok(Command::Flush) => continue,
            Ok(Command::Stop) => return true,
            Err(_) => return false,
        }
    }
}

/// Best-effort final flush at teardown, bounded by a short deadline rather than an unbounded
/// wait. Anything undelivered stays in the persistence mirror for the next run.
fn final_flush<T: Transport>(
    queue: &EventQueue,
    transport: &T,
    config: &DeliveryConfig,
    stats: &PipelineStats,
    runtime: &tokio::runtime::Runtime,
    sequence: &mut u64,
) {
    let result = runtime.block_on(async {
        tokio::time::timeout(config.shutdown_timeout, async {
        loop {
            let events = queue.drain_up_to(config.batch_size);
            if events.is_empty() {
                break;
            }

            *sequence += 1;
            let batch = EventBatch {
                sequence: *sequence,
                events,
            };

            match transport.send(&batch).await {
                TransportOutcome::Delivered => {
                    let delivered = queue.commit_in_flight();
                    stats.record_delivery(delivered);
                }
                TransportOutcome::Rejected { status } => {
                    let discarded = queue.discard_in_flight();
                    stats.record_dropped_batch();
                    log::warn!(target: "founderos",
                               "collection endpoint rejected final batch with status {status}, \
                                discarding {discarded} events");
                }
                TransportOutcome::TransientFailure { reason } => {
                    queue.requeue_in_flight();
                    log::debug!(target: "founderos",
                                "leaving undelivered events in the queue mirror: {reason}");
                    break;
                }
            }
        }
        })
        .await
    });

    if result.is_err() {
        log::debug!(target: "founderos",
                    "shutdown flush timed out, undelivered events remain persisted");
    }
}

/// Apply randomized subtractive `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::events::testing::MockTransport;
    use crate::events::{test_event, EventQueue, PipelineStats};

    fn test_config() -> DeliveryConfig {
        DeliveryConfig {
            batch_size: 10,
            flush_interval: Duration::from_secs(60),
            retry_interval: Duration::from_millis(10),
            max_retry_delay: Duration::from_millis(40),
            max_retries: 3,
            shutdown_timeout: Duration::from_secs(2),
        }
    }

    fn queue_with(names: &[&str]) -> Arc<EventQueue> {
        let queue = Arc::new(EventQueue::new(
            100,
            None,
            "fos_events",
            Arc::new(PipelineStats::default()),
        ));
        for name in names {
            queue.enqueue(test_event(name));
        }
        queue
    }

    fn batch_names(batch: &EventBatch) -> Vec<String> {
        batch
            .events
            .iter()
            .map(|e| e.name.as_deref().unwrap_or("").to_owned())
            .collect()
    }

    #[test]
    fn delivers_events_in_order() {
        let queue = queue_with(&["a", "b", "c"]);
        let transport = MockTransport::delivering();
        let stats = Arc::new(PipelineStats::default());

        let thread = DeliveryThread::start(
            Arc::clone(&queue),
            Arc::clone(&transport),
            test_config(),
            Arc::clone(&stats),
        )
        .unwrap();
        thread.request_flush();
        std::thread::sleep(Duration::from_millis(300));

        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batch_names(&batches[0]), vec!["a", "b", "c"]);
        assert!(queue.is_empty());
        assert_eq!(stats.snapshot().delivered_events, 3);

        thread.shutdown().unwrap();
    }

    #[test]
    fn failed_batch_is_retried_before_newer_events() {
        let queue = queue_with(&["a", "b", "c"]);
        let transport = MockTransport::scripted(
            vec![TransportOutcome::TransientFailure {
                reason: "connection reset".to_owned(),
            }],
            TransportOutcome::Delivered,
        );
        let stats = Arc::new(PipelineStats::default());
        let config = DeliveryConfig {
            batch_size: 2,
            ..test_config()
        };

        let thread = DeliveryThread::start(
            Arc::clone(&queue),
            Arc::clone(&transport),
            config,
            Arc::clone(&stats),
        )
        .unwrap();
        thread.request_flush();
        std::thread::sleep(Duration::from_millis(400));

        let batches = transport.batches();
        assert_eq!(batches.len(), 3);
        assert_eq!(batch_names(&batches[0]), vec!["a", "b"]);
        // The failed events are redelivered first; nothing is reordered past them, nothing is
        // delivered twice.
        assert_eq!(batch_names(&batches[1]), vec!["a", "b"]);
        assert_eq!(batch_names(&batches[2]), vec!["c"]);
        assert!(queue.is_empty());
        assert_eq!(stats.snapshot().retried_batches, 1);
        assert_eq!(stats.snapshot().delivered_events, 3);

        thread.shutdown().unwrap();
    }

    #[test]
    fn batch_is_dropped_after_the_retry_bound() {
        let queue = queue_with(&["a"]);
        let transport = MockTransport::always(TransportOutcome::TransientFailure {
            reason: "unreachable".to_owned(),
        });
        let stats = Arc::new(PipelineStats::default());
        let config = DeliveryConfig {
            max_retries: 2,
            ..test_config()
        };

        let thread = DeliveryThread::start(
            Arc::clone(&queue),
            Arc::clone(&transport),
            config,
            Arc::clone(&stats),
        )
        .unwrap();
        thread.request_flush();
        std::thread::sleep(Duration::from_millis(500));

        // One initial attempt plus exactly max_retries retries, then the batch is dropped.
        assert_eq!(transport.send_count(), 3);
        assert_eq!(stats.snapshot().dropped_batches, 1);
        assert_eq!(stats.snapshot().delivered_events, 0);
        assert!(queue.is_empty());

        thread.shutdown().unwrap();
    }

    #[test]
    fn rejected_batch_is_discarded_without_retry() {
        let queue = queue_with(&["a", "b"]);
        let transport = MockTransport::scripted(
            vec![TransportOutcome::Rejected { status: 400 }],
            TransportOutcome::Delivered,
        );
        let stats = Arc::new(PipelineStats::default());

        let thread = DeliveryThread::start(
            Arc::clone(&queue),
            Arc::clone(&transport),
            test_config(),
            Arc::clone(&stats),
        )
        .unwrap();
        thread.request_flush();
        std::thread::sleep(Duration::from_millis(300));

        assert_eq!(transport.send_count(), 1);
        assert_eq!(stats.snapshot().dropped_batches, 1);
        assert!(queue.is_empty());

        // Fresh events still flow after the discard.
        queue.enqueue(test_event("c"));
        thread.request_flush();
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(transport.send_count(), 2);
        assert_eq!(stats.snapshot().delivered_events, 1);

        thread.shutdown().unwrap();
    }

    #[test]
    fn shutdown_performs_a_final_flush() {
        let queue = queue_with(&["a", "b"]);
        let transport = MockTransport::delivering();
        let stats = Arc::new(PipelineStats::default());

        let thread = DeliveryThread::start(
            Arc::clone(&queue),
            Arc::clone(&transport),
            test_config(),
            Arc::clone(&stats),
        )
        .unwrap();
        thread.shutdown().unwrap();

        assert_eq!(transport.send_count(), 1);
        assert!(queue.is_empty());
        assert_eq!(stats.snapshot().delivered_events, 2);
    }

    #[test]
    fn dropping_the_handle_stops_the_thread_after_a_final_flush() {
        let queue = queue_with(&["a"]);
        let transport = MockTransport::delivering();

        let thread = DeliveryThread::start(
            Arc::clone(&queue),
            Arc::clone(&transport),
            test_config(),
            Arc::new(PipelineStats::default()),
        )
        .unwrap();
        drop(thread);
        std::thread::sleep(Duration::from_millis(300));

        assert_eq!(transport.send_count(), 1);
        assert!(queue.is_empty());
    }

    mod jitter_tests {
        use std::time::Duration;

        #[test]
        fn jitter_is_subtractive() {
            let interval = Duration::from_secs(30);
            let jitter = Duration::from_secs(30);

            let result = super::super::jitter(interval, jitter);

            assert!(result <= interval, "{result:?} must be <= {interval:?}");
        }

        #[test]
        fn jitter_truncates_to_zero() {
            let interval = Duration::ZERO;
            let jitter = Duration::from_secs(30);

            let result = super::super::jitter(interval, jitter);

            assert_eq!(result, Duration::ZERO);
        }

        #[test]
        fn jitter_works_with_zero_jitter() {
            let interval = Duration::from_secs(30);
            let jitter = Duration::ZERO;

            let result = super::super::jitter(interval, jitter);

            assert_eq!(result, Duration::from_secs(30));
        }
    }
}
