//! Stage abstraction and the sequential stage runner
//!
//! A stage is one named, idempotent provisioning step with a polled
//! readiness check. The runner executes stages strictly in order: stage
//! N+1 never starts before stage N's readiness check has passed, and the
//! readiness timeout is enforced here, never by the invoked install
//! operation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, trace, warn};

use crate::context::ProvisioningContext;
use crate::{Error, Result};

/// Upper bound for controller installs to report ready
pub const CONTROLLER_READY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default interval between readiness polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// One named, idempotent provisioning step
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name, used in progress output and failure messages
    fn name(&self) -> &str;

    /// The idempotent install/create operation
    async fn action(&self, ctx: &mut ProvisioningContext) -> Result<()>;

    /// Readiness predicate, polled by the runner until true or timeout.
    /// Errors are treated as "not ready yet" (components routinely fail
    /// API calls while coming up).
    async fn check_ready(&self, _ctx: &mut ProvisioningContext) -> Result<bool> {
        Ok(true)
    }

    /// Maximum time the runner waits for `check_ready`
    fn readiness_timeout(&self) -> Duration {
        CONTROLLER_READY_TIMEOUT
    }

    /// Interval between readiness polls
    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Whether a failure aborts the run (true for every built-in stage)
    fn required(&self) -> bool {
        true
    }

    /// Runs once after the readiness check passes. Failures here are
    /// warnings, never fatal (e.g. credential extraction).
    async fn after_ready(&self, _ctx: &mut ProvisioningContext) -> Result<()> {
        Ok(())
    }
}

/// Executes an ordered sequence of stages, fail-fast
pub struct StageRunner {
    stages: Vec<Box<dyn Stage>>,
}

impl StageRunner {
    /// Create a runner over the given stage sequence
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Stage names, in execution order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run all stages in order against the context.
    ///
    /// A required stage's failure aborts the run with
    /// `Error::StageFailed` naming that stage; no later stage executes.
    pub async fn run(&self, ctx: &mut ProvisioningContext) -> Result<()> {
        let total = self.stages.len();
        for (i, stage) in self.stages.iter().enumerate() {
            info!("[{}/{}] {}", i + 1, total, stage.name());

            match self.run_stage(stage.as_ref(), ctx).await {
                Ok(()) => {}
                Err(e) if stage.required() => return Err(e),
                Err(e) => warn!("optional stage '{}' failed: {}", stage.name(), e),
            }
        }
        Ok(())
    }

    async fn run_stage(&self, stage: &dyn Stage, ctx: &mut ProvisioningContext) -> Result<()> {
        stage
            .action(ctx)
            .await
            .map_err(|e| Error::stage_failed(stage.name(), e))?;

        self.wait_ready(stage, ctx).await?;

        // Non-fatal post-readiness step (e.g. credential extraction)
        if let Err(e) = stage.after_ready(ctx).await {
            warn!("stage '{}' post-readiness step failed: {}", stage.name(), e);
        }

        Ok(())
    }

    /// Poll the stage's readiness check until it passes or the stage's
    /// timeout elapses.
    async fn wait_ready(&self, stage: &dyn Stage, ctx: &mut ProvisioningContext) -> Result<()> {
        let timeout = stage.readiness_timeout();
        let start = Instant::now();

        loop {
            match stage.check_ready(ctx).await {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    trace!("stage '{}' not ready yet", stage.name());
                }
                Err(e) => {
                    trace!("stage '{}' readiness check errored (retrying): {}", stage.name(), e);
                }
            }

            if start.elapsed() > timeout {
                return Err(Error::stage_failed(
                    stage.name(),
                    format!("not ready after {:?}", timeout),
                ));
            }

            tokio::time::sleep(stage.poll_interval()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct RecordingStage {
        name: &'static str,
        log: Arc<std::sync::Mutex<Vec<&'static str>>>,
        fail_action: bool,
    }

    #[async_trait]
    impl Stage for RecordingStage {
        fn name(&self) -> &str {
            self.name
        }

        async fn action(&self, _ctx: &mut ProvisioningContext) -> Result<()> {
            self.log.lock().unwrap().push(self.name);
            if self.fail_action {
                return Err(Error::command_failed("simulated failure"));
            }
            Ok(())
        }
    }

    /// A stage whose readiness check never passes
    struct NeverReadyStage;

    #[async_trait]
    impl Stage for NeverReadyStage {
        fn name(&self) -> &str {
            "ingress"
        }

        async fn action(&self, _ctx: &mut ProvisioningContext) -> Result<()> {
            Ok(())
        }

        async fn check_ready(&self, _ctx: &mut ProvisioningContext) -> Result<bool> {
            Ok(false)
        }

        fn readiness_timeout(&self) -> Duration {
            Duration::from_millis(50)
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(5)
        }
    }

    /// A stage that becomes ready after a few polls
    struct EventuallyReadyStage {
        polls: Arc<AtomicU32>,
        ready_after: u32,
    }

    #[async_trait]
    impl Stage for EventuallyReadyStage {
        fn name(&self) -> &str {
            "eventually"
        }

        async fn action(&self, _ctx: &mut ProvisioningContext) -> Result<()> {
            Ok(())
        }

        async fn check_ready(&self, _ctx: &mut ProvisioningContext) -> Result<bool> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(n >= self.ready_after)
        }

        fn readiness_timeout(&self) -> Duration {
            Duration::from_secs(5)
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(1)
        }
    }

    fn recording(
        name: &'static str,
        log: &Arc<std::sync::Mutex<Vec<&'static str>>>,
        fail_action: bool,
    ) -> Box<dyn Stage> {
        Box::new(RecordingStage {
            name,
            log: log.clone(),
            fail_action,
        })
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let runner = StageRunner::new(vec![
            recording("cluster", &log, false),
            recording("ingress", &log, false),
            recording("gitops", &log, false),
        ]);

        let mut ctx = ProvisioningContext::new("test");
        runner.run(&mut ctx).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["cluster", "ingress", "gitops"]);
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_stages() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let runner = StageRunner::new(vec![
            recording("cluster", &log, false),
            recording("ingress", &log, true),
            recording("gitops", &log, false),
        ]);

        let mut ctx = ProvisioningContext::new("test");
        let err = runner.run(&mut ctx).await.unwrap_err();

        assert_eq!(err.stage(), Some("ingress"));
        // gitops never ran
        assert_eq!(*log.lock().unwrap(), vec!["cluster", "ingress"]);
    }

    #[tokio::test]
    async fn test_readiness_timeout_fails_the_stage() {
        let runner = StageRunner::new(vec![Box::new(NeverReadyStage)]);

        let mut ctx = ProvisioningContext::new("test");
        let err = runner.run(&mut ctx).await.unwrap_err();

        assert_eq!(err.stage(), Some("ingress"));
        assert!(err.to_string().contains("not ready after"));
    }

    #[tokio::test]
    async fn test_readiness_passes_after_polling() {
        let polls = Arc::new(AtomicU32::new(0));
        let runner = StageRunner::new(vec![Box::new(EventuallyReadyStage {
            polls: polls.clone(),
            ready_after: 3,
        })]);

        let mut ctx = ProvisioningContext::new("test");
        runner.run(&mut ctx).await.unwrap();

        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_optional_stage_failure_continues() {
        struct OptionalFailing {
            log: Arc<std::sync::Mutex<Vec<&'static str>>>,
        }

        #[async_trait]
        impl Stage for OptionalFailing {
            fn name(&self) -> &str {
                "optional"
            }

            async fn action(&self, _ctx: &mut ProvisioningContext) -> Result<()> {
                self.log.lock().unwrap().push("optional");
                Err(Error::command_failed("simulated failure"))
            }

            fn required(&self) -> bool {
                false
            }
        }

        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let runner = StageRunner::new(vec![
            Box::new(OptionalFailing { log: log.clone() }) as Box<dyn Stage>,
            recording("after", &log, false),
        ]);

        let mut ctx = ProvisioningContext::new("test");
        runner.run(&mut ctx).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["optional", "after"]);
    }

    #[tokio::test]
    async fn test_after_ready_failure_is_not_fatal() {
        struct FailingAfterReady;

        #[async_trait]
        impl Stage for FailingAfterReady {
            fn name(&self) -> &str {
                "gitops"
            }

            async fn action(&self, _ctx: &mut ProvisioningContext) -> Result<()> {
                Ok(())
            }

            async fn after_ready(&self, _ctx: &mut ProvisioningContext) -> Result<()> {
                Err(Error::command_failed("secret not found"))
            }
        }

        let runner = StageRunner::new(vec![Box::new(FailingAfterReady)]);
        let mut ctx = ProvisioningContext::new("test");
        // The run still succeeds
        runner.run(&mut ctx).await.unwrap();
    }

    #[test]
    fn test_stage_names() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let runner = StageRunner::new(vec![
            recording("cluster", &log, false),
            recording("ingress", &log, false),
        ]);
        assert_eq!(runner.stage_names(), vec!["cluster", "ingress"]);
    }
}
