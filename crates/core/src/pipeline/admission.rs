//! Per-pipeline admission control.
//!
//! Every pipeline has a fixed number of slots backed by a semaphore. A job
//! takes a slot before doing any pipeline work and holds it as an
//! [`AdmissionPermit`]; dropping the permit gives the slot back, whatever
//! the outcome of the job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

use crate::host::ActivityContext;
use crate::metrics::{ADMISSION_CAPACITY, ADMISSION_IN_USE};

use super::{PipelineError, PipelineRegistry};

/// Current slot usage of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotUsage {
    pub capacity: usize,
    pub in_use: usize,
}

struct Slots {
    name: String,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl Slots {
    fn usage(&self) -> SlotUsage {
        SlotUsage {
            capacity: self.capacity,
            in_use: self
                .capacity
                .saturating_sub(self.semaphore.available_permits()),
        }
    }

    fn publish(&self) {
        ADMISSION_IN_USE
            .with_label_values(&[&self.name])
            .set(self.usage().in_use as i64);
    }
}

#[derive(Serialize)]
struct AdmissionWait<'a> {
    pipeline: &'a str,
    capacity: usize,
    in_use: usize,
}

/// Capacity-bounded slots, one semaphore per pipeline.
pub struct AdmissionController {
    slots: HashMap<String, Arc<Slots>>,
}

impl AdmissionController {
    pub fn new(registry: &PipelineRegistry) -> Self {
        Self::with_capacities(
            registry
                .iter()
                .map(|pipeline| (pipeline.name().to_string(), pipeline.capacity())),
        )
    }

    pub fn with_capacities(capacities: impl IntoIterator<Item = (String, usize)>) -> Self {
        let slots = capacities
            .into_iter()
            .map(|(name, capacity)| {
                ADMISSION_CAPACITY
                    .with_label_values(&[&name])
                    .set(capacity as i64);
                ADMISSION_IN_USE.with_label_values(&[&name]).set(0);
                let slots = Slots {
                    name: name.clone(),
                    capacity,
                    semaphore: Arc::new(Semaphore::new(capacity)),
                };
                (name, Arc::new(slots))
            })
            .collect();
        Self { slots }
    }

    fn slots(&self, pipeline: &str) -> Result<&Arc<Slots>, PipelineError> {
        self.slots
            .get(pipeline)
            .ok_or_else(|| PipelineError::UnknownPipeline(pipeline.to_string()))
    }

    /// Take a slot if one is free, without waiting.
    pub fn try_acquire(
        &self,
        pipeline: &str,
    ) -> Result<Option<AdmissionPermit>, PipelineError> {
        let slots = self.slots(pipeline)?;
        match Arc::clone(&slots.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(Some(AdmissionPermit::new(slots, permit))),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(PipelineError::Closed(pipeline.to_string())),
        }
    }

    /// Wait for a free slot and take it.
    ///
    /// Emits a heartbeat through `ctx` every `heartbeat_interval` while
    /// waiting. Cancellation of `ctx` aborts the wait without taking a slot.
    pub async fn acquire(
        &self,
        pipeline: &str,
        ctx: &ActivityContext,
        heartbeat_interval: Duration,
    ) -> Result<AdmissionPermit, PipelineError> {
        let slots = self.slots(pipeline)?;
        let wait = Arc::clone(&slots.semaphore).acquire_owned();
        tokio::pin!(wait);
        let mut ticker = tokio::time::interval(heartbeat_interval);

        loop {
            tokio::select! {
                biased;
                acquired = &mut wait => {
                    let permit =
                        acquired.map_err(|_| PipelineError::Closed(pipeline.to_string()))?;
                    debug!(pipeline, "Pipeline slot acquired");
                    return Ok(AdmissionPermit::new(slots, permit));
                }
                _ = ctx.cancellation().cancelled() => return Err(PipelineError::Cancelled),
                _ = ticker.tick() => {
                    let usage = slots.usage();
                    ctx.heartbeat(&AdmissionWait {
                        pipeline,
                        capacity: usage.capacity,
                        in_use: usage.in_use,
                    });
                }
            }
        }
    }

    pub fn usage(&self, pipeline: &str) -> Result<SlotUsage, PipelineError> {
        Ok(self.slots(pipeline)?.usage())
    }
}

/// An acquired slot, given back when the permit is released or dropped.
pub struct AdmissionPermit {
    slots: Arc<Slots>,
    permit: Option<OwnedSemaphorePermit>,
}

impl AdmissionPermit {
    fn new(slots: &Arc<Slots>, permit: OwnedSemaphorePermit) -> Self {
        slots.publish();
        Self {
            slots: Arc::clone(slots),
            permit: Some(permit),
        }
    }

    pub fn pipeline(&self) -> &str {
        &self.slots.name
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if self.permit.take().is_some() {
            self.slots.publish();
            debug!(pipeline = %self.slots.name, "Pipeline slot released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn controller(capacity: usize) -> Arc<AdmissionController> {
        Arc::new(AdmissionController::with_capacities([(
            "am".to_string(),
            capacity,
        )]))
    }

    #[test]
    fn test_try_acquire_respects_capacity() {
        let admission = controller(3);
        let mut held: Vec<_> = (0..3)
            .map(|_| admission.try_acquire("am").unwrap().unwrap())
            .collect();
        assert!(admission.try_acquire("am").unwrap().is_none());
        assert_eq!(
            admission.usage("am").unwrap(),
            SlotUsage {
                capacity: 3,
                in_use: 3
            }
        );

        held.pop().unwrap().release();
        assert!(admission.try_acquire("am").unwrap().is_some());
    }

    #[test]
    fn test_unknown_pipeline() {
        let admission = controller(1);
        assert!(matches!(
            admission.try_acquire("other"),
            Err(PipelineError::UnknownPipeline(name)) if name == "other"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fourth_acquire_blocks_until_release() {
        let admission = controller(3);
        let ctx = ActivityContext::detached("acquire");
        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(
                admission
                    .acquire("am", &ctx, Duration::from_secs(60))
                    .await
                    .unwrap(),
            );
        }

        let waiter = {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move {
                let ctx = ActivityContext::detached("acquire");
                admission.acquire("am", &ctx, Duration::from_secs(60)).await
            })
        };

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!waiter.is_finished());
        assert_eq!(admission.usage("am").unwrap().in_use, 3);

        held.pop().unwrap().release();
        let fourth = waiter.await.unwrap().unwrap();
        assert_eq!(fourth.pipeline(), "am");
        assert_eq!(admission.usage("am").unwrap().in_use, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_emits_heartbeats() {
        let admission = controller(1);
        let held = admission.try_acquire("am").unwrap().unwrap();

        let ctx = Arc::new(ActivityContext::detached("acquire"));
        let waiter = {
            let admission = Arc::clone(&admission);
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                admission.acquire("am", &ctx, Duration::from_secs(60)).await
            })
        };

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(
            ctx.last_heartbeat(),
            Some(serde_json::json!({"pipeline": "am", "capacity": 1, "in_use": 1}))
        );

        held.release();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_takes_no_slot() {
        let admission = controller(1);
        let held = admission.try_acquire("am").unwrap().unwrap();

        let ctx = ActivityContext::detached("acquire");
        ctx.cancellation().cancel();
        let result = admission.acquire("am", &ctx, Duration::from_secs(60)).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));

        held.release();
        assert_eq!(admission.usage("am").unwrap().in_use, 0);
    }

    #[tokio::test]
    async fn test_permit_releases_on_drop_and_explicitly() {
        let admission = controller(1);
        let ctx = ActivityContext::detached("acquire");

        let permit = admission
            .acquire("am", &ctx, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(admission.usage("am").unwrap().in_use, 1);
        drop(permit);
        assert_eq!(admission.usage("am").unwrap().in_use, 0);

        let permit = admission
            .acquire("am", &ctx, Duration::from_secs(60))
            .await
            .unwrap();
        permit.release();
        assert_eq!(admission.usage("am").unwrap().in_use, 0);
        assert!(admission.try_acquire("am").unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_use_never_exceeds_capacity_under_contention() {
        let admission = controller(3);
        let holders = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let admission = Arc::clone(&admission);
            let holders = Arc::clone(&holders);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let ctx = ActivityContext::detached("acquire");
                for _ in 0..25 {
                    let permit = admission
                        .acquire("am", &ctx, Duration::from_secs(60))
                        .await
                        .unwrap();
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let usage = admission.usage("am").unwrap();
                    assert!(usage.in_use <= usage.capacity);
                    tokio::task::yield_now().await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(admission.usage("am").unwrap().in_use, 0);
    }
}
