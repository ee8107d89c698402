//! Remote commands inside a runtime's pods
//!
//! Every call races the command against the configured timeout. A timed-out
//! command is abandoned, not cancelled: the remote process may keep running.

use crate::error::{EngineError, Result};
use cachefleet_store::{CommandExecutor, ExecOutput};
use std::time::Duration;
use tracing::{debug, warn};

/// Executor bound to one pod container
pub struct PodCommand<'a> {
    executor: &'a dyn CommandExecutor,
    pod: &'a str,
    container: &'a str,
    namespace: &'a str,
    timeout: Duration,
}

impl<'a> PodCommand<'a> {
    pub fn new(
        executor: &'a dyn CommandExecutor,
        pod: &'a str,
        container: &'a str,
        namespace: &'a str,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            pod,
            container,
            namespace,
            timeout,
        }
    }

    pub async fn run(&self, command: &[String]) -> Result<ExecOutput> {
        debug!(pod = self.pod, command = ?command, "Executing remote command");
        let call = self
            .executor
            .exec(self.pod, self.container, self.namespace, command);

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(pod = self.pod, command = ?command, "Remote command timed out");
                Err(EngineError::Timeout {
                    operation: format!("{:?} in pod {}", command, self.pod),
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cachefleet_store::ExecError;

    struct Hanging;

    #[async_trait]
    impl CommandExecutor for Hanging {
        async fn exec(
            &self,
            _pod: &str,
            _container: &str,
            _namespace: &str,
            _command: &[String],
        ) -> std::result::Result<ExecOutput, ExecError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ExecOutput::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_instead_of_blocking() {
        let executor = Hanging;
        let command = PodCommand::new(&executor, "hbase-master-0", "alluxio-master", "default", Duration::from_secs(1500));
        let err = command.run(&["alluxio".to_string()]).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { seconds: 1500, .. }));
    }
}
