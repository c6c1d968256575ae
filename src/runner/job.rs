use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::runner::trigger::TriggerRule;

/// What one invocation of a job body reports back: success, or a descriptive
/// error message for the job-state record.
pub type JobOutput = std::result::Result<(), String>;

/// A schedulable job body: anything that can perform one ingestion cycle and
/// abort cooperatively when its token is cancelled. No trait hierarchy, just
/// the capability.
pub type JobBody =
    Arc<dyn Fn(CancellationToken) -> Pin<Box<dyn Future<Output = JobOutput> + Send>> + Send + Sync>;

/// One named recurring job: when it fires, which lock guards it, and what to
/// run.
#[derive(Clone)]
pub struct JobSpec {
    pub name: String,
    pub lock_name: String,
    /// Lease TTL. Must exceed the expected job duration with margin; the
    /// heartbeat renews at a third of this.
    pub lease_seconds: u32,
    /// Hard cap on the body's runtime. Elapsing counts as a failed run.
    pub timeout: Option<Duration>,
    /// How far past its nominal time a slot may still fire. Slots staler
    /// than this are dropped, so a freshly started instance does not replay
    /// a days-old slot (e.g. Friday's close on a Saturday boot).
    pub misfire_grace: Duration,
    pub trigger: TriggerRule,
    pub body: JobBody,
}

impl JobSpec {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        lock_name: impl Into<String>,
        lease_seconds: u32,
        trigger: TriggerRule,
        body: F,
    ) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutput> + Send + 'static,
    {
        Self {
            name: name.into(),
            lock_name: lock_name.into(),
            lease_seconds,
            timeout: None,
            misfire_grace: Duration::from_secs(300),
            trigger,
            body: Arc::new(move |cancel| {
                Box::pin(body(cancel)) as Pin<Box<dyn Future<Output = JobOutput> + Send>>
            }),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_misfire_grace(mut self, grace: Duration) -> Self {
        self.misfire_grace = grace;
        self
    }
}

impl std::fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSpec")
            .field("name", &self.name)
            .field("lock_name", &self.lock_name)
            .field("lease_seconds", &self.lease_seconds)
            .field("timeout", &self.timeout)
            .field("misfire_grace", &self.misfire_grace)
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}
