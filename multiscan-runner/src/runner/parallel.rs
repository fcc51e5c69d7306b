// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running batches concurrently, one worker per batch.
//!
//! The protocol is:
//!
//! 1. **Setup**: every batch is bound to a device and given a one-shot channel before any worker
//!    starts. If any batch can't get a device, devices already handed out are released and the
//!    scan fails.
//! 2. **Fork**: one task per batch runs the batch, then sends a [`WorkerResult`] down its channel.
//! 3. **Join**: every task is awaited, then every channel is read. A channel whose sender was
//!    dropped without a value means the worker crashed, which fails that batch only.
//! 4. **Teardown**: every device is returned to the pool.

use crate::{
    devices::{BatchMetadata, DeviceAllocation, DeviceConstraint, ResourcePool},
    errors::ScanError,
    reporter::{EventSender, ScanEventKind},
    test_list::TestBatch,
};
use std::{future::Future, time::Duration};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// What a worker reports back to the coordinator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WorkerResult {
    /// Whether the batch passed. Fatal batch errors are reported as `false`.
    pub passed: bool,

    /// The number of retries the batch used.
    pub retries: usize,
}

/// The result of one batch, as seen by the coordinator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BatchResult {
    /// The worker reported a result.
    Completed {
        /// The batch index.
        batch_index: usize,

        /// The worker's result.
        result: WorkerResult,
    },

    /// The worker stopped without reporting a result.
    Crashed {
        /// The batch index.
        batch_index: usize,
    },
}

impl BatchResult {
    /// Returns the batch index.
    pub fn batch_index(&self) -> usize {
        match self {
            Self::Completed { batch_index, .. } | Self::Crashed { batch_index } => *batch_index,
        }
    }

    /// Returns true if the worker stopped without reporting a result.
    pub fn is_crashed(&self) -> bool {
        matches!(self, Self::Crashed { .. })
    }

    /// Returns true if the worker reported that the batch passed.
    pub fn passed(&self) -> bool {
        matches!(self, Self::Completed { result, .. } if result.passed)
    }

    /// Returns the number of retries the batch reported. Crashed batches report none.
    pub fn retries(&self) -> usize {
        match self {
            Self::Completed { result, .. } => result.retries,
            Self::Crashed { .. } => 0,
        }
    }
}

/// The aggregated results of a parallel run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParallelOutcome {
    /// The result of each batch, in batch order.
    pub results: Vec<BatchResult>,
}

impl ParallelOutcome {
    /// Returns true if every batch passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(BatchResult::passed)
    }
}

/// The channel a worker reports its result on.
#[derive(Debug)]
pub(crate) struct BatchChannel {
    batch_index: usize,
    receiver: oneshot::Receiver<WorkerResult>,
}

/// Fans batches out to workers bound to separate devices, and collects their results.
pub(crate) struct ParallelSupervisor<'a> {
    pool: &'a mut dyn ResourcePool,
    metadata: &'a dyn BatchMetadata,
    detach_grace_period: Duration,
    events: EventSender,
}

impl<'a> ParallelSupervisor<'a> {
    pub(crate) fn new(
        pool: &'a mut dyn ResourcePool,
        metadata: &'a dyn BatchMetadata,
        detach_grace_period: Duration,
        events: EventSender,
    ) -> Self {
        Self {
            pool,
            metadata,
            detach_grace_period,
            events,
        }
    }

    /// Runs every batch in its own task, with `per_batch` producing the work for each.
    pub(crate) async fn run_all<F, Fut>(
        &mut self,
        batches: &[TestBatch],
        per_batch: F,
    ) -> Result<ParallelOutcome, ScanError>
    where
        F: Fn(&TestBatch, &DeviceAllocation) -> Fut,
        Fut: Future<Output = WorkerResult> + Send + 'static,
    {
        let allocations = self.allocate_all(batches)?;

        let mut channels = Vec::with_capacity(batches.len());
        let mut handles = Vec::with_capacity(batches.len());
        for (batch, allocation) in batches.iter().zip(&allocations) {
            let (sender, receiver) = oneshot::channel();
            channels.push(BatchChannel {
                batch_index: batch.index,
                receiver,
            });

            let work = per_batch(batch, allocation);
            let grace_period = self.detach_grace_period;
            let batch_index = batch.index;
            handles.push(tokio::spawn(async move {
                let result = work.await;
                // The coordinator may have stopped listening; that's fine.
                let _ = sender.send(result);
                debug!(batch_index, "waiting {grace_period:?} for the device to detach");
                tokio::time::sleep(grace_period).await;
            }));
        }

        for (handle, channel) in handles.into_iter().zip(&channels) {
            if let Err(error) = handle.await {
                warn!(
                    batch_index = channel.batch_index,
                    "worker stopped unexpectedly: {error}"
                );
            }
        }

        let mut results = Vec::with_capacity(channels.len());
        for channel in channels {
            let batch_index = channel.batch_index;
            match channel.receiver.await {
                Ok(result) => results.push(BatchResult::Completed {
                    batch_index,
                    result,
                }),
                Err(_) => {
                    warn!(batch_index, "worker exited without reporting a result");
                    self.events.send(ScanEventKind::BatchCrashed { batch_index });
                    results.push(BatchResult::Crashed { batch_index });
                }
            }
        }

        for allocation in &allocations {
            self.pool.release(&allocation.device);
        }

        Ok(ParallelOutcome { results })
    }

    fn allocate_all(&mut self, batches: &[TestBatch]) -> Result<Vec<DeviceAllocation>, ScanError> {
        let mut allocations: Vec<DeviceAllocation> = Vec::with_capacity(batches.len());
        for batch in batches {
            let constraint = DeviceConstraint {
                minimum_platform_version: self.metadata.minimum_platform_version(&batch.testable),
            };
            match self.pool.allocate(&constraint) {
                Ok(device) => {
                    debug!(batch_index = batch.index, "bound to device {device}");
                    allocations.push(DeviceAllocation {
                        batch_index: batch.index,
                        device,
                        constraint,
                    });
                }
                Err(error) => {
                    for allocation in &allocations {
                        self.pool.release(&allocation.device);
                    }
                    return Err(ScanError::DeviceAllocation {
                        batch_index: batch.index,
                        error,
                    });
                }
            }
        }
        Ok(allocations)
    }
}
