//! Scheduled job runner: trigger evaluation and guarded execution.
//!
//! One cooperative loop per instance evaluates every job's trigger on a fixed
//! tick. A job whose nominal slot has arrived runs under its distributed
//! lock: acquire, then a concurrent heartbeat task renews the lease while the
//! body runs, then stop-renewing and release happen as explicit steps on
//! every exit path. Outcomes land in the job-state store, after release.
//!
//! # Run state machine
//!
//! `Idle → AcquiringLock → {Skipped | Running} → {Succeeded | Failed |
//! LockLost} → Idle`, with the heartbeat renewing concurrently while in
//! `Running`.

pub mod job;
pub mod trigger;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::lock::{DistributedLock, LockHandle};
use crate::store::JobStateStore;

pub use job::{JobBody, JobOutput, JobSpec};
pub use trigger::{TriggerRule, WeekdaySet};

/// Terminal state of one run attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another instance holds the lock. The expected common case under
    /// multi-instance contention, not an error.
    Skipped,
    /// Could not reach the lease store to check; the slot stays due and is
    /// retried on the next tick.
    StoreUnavailable,
    Succeeded,
    Failed(String),
    /// The lease expired or was reassigned mid-run and the body was
    /// cancelled.
    LockLost,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Skipped => write!(f, "skipped (contended)"),
            RunOutcome::StoreUnavailable => write!(f, "skipped (store unavailable)"),
            RunOutcome::Succeeded => write!(f, "succeeded"),
            RunOutcome::Failed(msg) => write!(f, "failed ({})", msg),
            RunOutcome::LockLost => write!(f, "failed (lost lease)"),
        }
    }
}

/// Tracks the last fired nominal slot per job, keyed by the slot's canonical
/// timestamp. Evaluating a tick twice for one slot fires once; a pause
/// spanning several slots fires only the most recent one; a slot older than
/// the job's misfire grace does not fire at all, so a fresh start never
/// replays a stale slot.
#[derive(Debug, Default)]
pub struct SlotTracker {
    fired: HashMap<String, DateTime<Utc>>,
}

impl SlotTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot `job` should fire for at `now`, if it is within the job's
    /// misfire grace and has not already fired for that slot (or a later
    /// one).
    pub fn due(&self, job: &JobSpec, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let slot = job.trigger.due_slot(now)?;
        let grace = chrono::Duration::from_std(job.misfire_grace)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        if now - slot > grace {
            return None;
        }
        match self.fired.get(&job.name) {
            Some(prev) if *prev >= slot => None,
            _ => Some(slot),
        }
    }

    pub fn mark_fired(&mut self, job: &str, slot: DateTime<Utc>) {
        self.fired.insert(job.to_string(), slot);
    }
}

/// How one job body finished, before lock-loss is taken into account.
enum BodyEnd {
    Done(JobOutput),
    TimedOut(Duration),
    Panicked(String),
}

/// Drives a set of jobs on a fixed scheduling tick.
pub struct JobRunner {
    lock: DistributedLock,
    states: Arc<dyn JobStateStore>,
    tick_interval: Duration,
}

/// Running scheduler loop. Dropping the handle detaches the loop; call
/// [`stop`](Self::stop) for a graceful shutdown.
pub struct RunnerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl RunnerHandle {
    /// Cancel the scheduling loop and wait for any in-flight run to finish
    /// its stop-renewing / release sequence before returning.
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

impl JobRunner {
    pub fn new(
        lock: DistributedLock,
        states: Arc<dyn JobStateStore>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            lock,
            states,
            tick_interval: config.tick_interval,
        }
    }

    /// Spawn the scheduling loop over `jobs`.
    pub fn start(self, jobs: Vec<JobSpec>) -> RunnerHandle {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            self.run_loop(jobs, token).await;
        });
        RunnerHandle { shutdown, task }
    }

    async fn run_loop(self, jobs: Vec<JobSpec>, shutdown: CancellationToken) {
        tracing::info!(
            owner = %self.lock.owner_id(),
            jobs = jobs.len(),
            tick = ?self.tick_interval,
            "scheduler loop started"
        );
        let mut tracker = SlotTracker::new();
        let mut ticks = tokio::time::interval(self.tick_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticks.tick() => {}
            }
            self.tick(Utc::now(), &jobs, &mut tracker, &shutdown).await;
        }
        tracing::info!("scheduler loop stopped");
    }

    /// Evaluate every job's trigger at `now` and run the due ones in order.
    /// A failing job never prevents the remaining jobs from running.
    pub async fn tick(
        &self,
        now: DateTime<Utc>,
        jobs: &[JobSpec],
        tracker: &mut SlotTracker,
        shutdown: &CancellationToken,
    ) {
        for job in jobs {
            if shutdown.is_cancelled() {
                break;
            }
            let Some(slot) = tracker.due(job, now) else {
                continue;
            };
            tracing::info!(job = %job.name, slot = %slot, "trigger fired");
            let outcome = self.run_job(job, shutdown).await;
            tracing::info!(job = %job.name, outcome = %outcome, "run finished");
            // A store outage leaves the slot due so the next tick retries it.
            // Contended slots are consumed: the holder is covering this slot.
            if outcome != RunOutcome::StoreUnavailable {
                tracker.mark_fired(&job.name, slot);
            }
        }
    }

    /// Execute one guarded run of `job`: acquire, heartbeat + body, stop
    /// renewing, release, record. Release runs on every exit path.
    pub async fn run_job(&self, job: &JobSpec, shutdown: &CancellationToken) -> RunOutcome {
        let handle = match self.lock.acquire(&job.lock_name, job.lease_seconds).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                tracing::info!(
                    job = %job.name,
                    lock = %job.lock_name,
                    "another instance holds the lock, skipping"
                );
                return RunOutcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(job = %job.name, error = %e, "could not check the lock, skipping this tick");
                return RunOutcome::StoreUnavailable;
            }
        };

        // The body's token is a child of the scheduler's shutdown token, so a
        // graceful stop and a lost lease both cancel it cooperatively.
        let run_cancel = shutdown.child_token();
        let heartbeat_stop = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.lock.clone(),
            handle.clone(),
            heartbeat_stop.clone(),
            run_cancel.clone(),
        ));

        let mut body_task = tokio::spawn((job.body)(run_cancel.clone()));
        let end = match job.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut body_task).await {
                Ok(joined) => body_end(joined),
                Err(_) => {
                    tracing::warn!(job = %job.name, limit = ?limit, "job body timed out, cancelling");
                    run_cancel.cancel();
                    let _ = body_task.await;
                    BodyEnd::TimedOut(limit)
                }
            },
            None => body_end(body_task.await),
        };

        // Stop renewing, then release. Explicit steps, in that order.
        heartbeat_stop.cancel();
        let lease_lost = heartbeat.await.unwrap_or(false);
        match self.lock.release(&handle).await {
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(lock = %handle.name, error = %e, "failed to release lock; lease will expire on its own");
            }
        }

        let outcome = if lease_lost {
            RunOutcome::LockLost
        } else {
            match end {
                BodyEnd::Done(Ok(())) => RunOutcome::Succeeded,
                BodyEnd::Done(Err(msg)) => RunOutcome::Failed(msg),
                BodyEnd::TimedOut(limit) => {
                    RunOutcome::Failed(format!("timed out after {}s", limit.as_secs()))
                }
                BodyEnd::Panicked(msg) => RunOutcome::Failed(msg),
            }
        };
        self.record_outcome(job, &outcome).await;
        outcome
    }

    /// Write the run's terminal state. Happens after release, so a crash in
    /// between leaves a stale but harmless state record.
    async fn record_outcome(&self, job: &JobSpec, outcome: &RunOutcome) {
        let result = match outcome {
            RunOutcome::Succeeded => self.states.set_status(&job.name, Some(Utc::now()), None),
            RunOutcome::Failed(msg) => self.states.set_status(&job.name, None, Some(msg.clone())),
            RunOutcome::LockLost => self.states.set_status(
                &job.name,
                None,
                Some(format!("lease lost for lock {} mid-run", job.lock_name)),
            ),
            RunOutcome::Skipped | RunOutcome::StoreUnavailable => return,
        };
        if let Err(e) = result.await {
            tracing::warn!(job = %job.name, error = %e, "failed to record run outcome");
        }
    }
}

fn body_end(joined: std::result::Result<JobOutput, tokio::task::JoinError>) -> BodyEnd {
    match joined {
        Ok(output) => BodyEnd::Done(output),
        Err(e) if e.is_panic() => BodyEnd::Panicked(format!("job body panicked: {}", e)),
        Err(e) => BodyEnd::Panicked(format!("job body aborted: {}", e)),
    }
}

/// Renew the lease on a fixed cadence until told to stop. Returns whether the
/// lease was lost; on loss the run's cancellation token is triggered so the
/// body stops writing as if it still held exclusivity.
async fn heartbeat_loop(
    lock: DistributedLock,
    handle: LockHandle,
    stop: CancellationToken,
    run_cancel: CancellationToken,
) -> bool {
    // Renew well before expiry: a third of the lease leaves two retries'
    // worth of slack.
    let period = Duration::from_secs(u64::from((handle.lease_seconds / 3).max(1)));
    loop {
        tokio::select! {
            _ = stop.cancelled() => return false,
            _ = tokio::time::sleep(period) => {}
        }
        match lock.renew(&handle).await {
            Ok(true) => {
                tracing::debug!(lock = %handle.name, "lease renewed");
            }
            Ok(false) => {
                tracing::warn!(
                    lock = %handle.name,
                    owner = %handle.owner_id,
                    "lease lost, cancelling job body"
                );
                run_cancel.cancel();
                return true;
            }
            Err(e) => {
                // Transient store trouble: the lease may still be live, keep
                // trying until told to stop or the store answers.
                tracing::warn!(lock = %handle.name, error = %e, "lease renewal failed, will retry");
            }
        }
    }
}
