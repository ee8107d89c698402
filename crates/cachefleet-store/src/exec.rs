//! Remote-command collaborator
//!
//! Backend diagnostics and cache eviction run as commands inside pods. The
//! engine treats the transport as opaque and only interprets the text output.

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("Pod {pod} not found")]
    PodNotFound { pod: String },

    #[error("Pod {pod} does not have a host assigned")]
    NoHostAssigned { pod: String },

    #[error("Command {command:?} failed in pod {pod}: {message} (stderr: {stderr})")]
    CommandFailed {
        pod: String,
        command: Vec<String>,
        stderr: String,
        message: String,
    },

    #[error("Exec transport error: {0}")]
    Transport(String),
}

impl ExecError {
    /// The target pod is gone or never scheduled, so there is nothing to act on
    pub fn is_pod_gone(&self) -> bool {
        matches!(self, Self::PodNotFound { .. } | Self::NoHostAssigned { .. })
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn exec(
        &self,
        pod: &str,
        container: &str,
        namespace: &str,
        command: &[String],
    ) -> Result<ExecOutput, ExecError>;
}

/// A recorded exec invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub pod: String,
    pub container: String,
    pub namespace: String,
    pub command: Vec<String>,
}

impl ExecCall {
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

enum Reply {
    Output(ExecOutput),
    Fail(String),
}

struct Rule {
    needle: String,
    reply: Reply,
    once: bool,
}

/// Executor answering from canned replies keyed by command substring
///
/// Rules are matched in insertion order against the joined command line;
/// unmatched commands return empty output. Every call is recorded.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    lost_pods: Mutex<Vec<String>>,
    calls: Mutex<Vec<ExecCall>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, needle: impl Into<String>, stdout: impl Into<String>) {
        self.push(needle.into(), Reply::Output(ExecOutput::stdout(stdout)), false);
    }

    /// Like [`respond`](Self::respond), but the rule is dropped after its
    /// first match
    pub fn respond_once(&self, needle: impl Into<String>, stdout: impl Into<String>) {
        self.push(needle.into(), Reply::Output(ExecOutput::stdout(stdout)), true);
    }

    pub fn fail(&self, needle: impl Into<String>, message: impl Into<String>) {
        self.push(needle.into(), Reply::Fail(message.into()), false);
    }

    /// Every later call into `pod` fails as if the pod were deleted
    pub fn lose_pod(&self, pod: impl Into<String>) {
        self.lost_pods.lock().push(pod.into());
    }

    /// Drop every rule
    pub fn clear(&self) {
        self.rules.lock().clear();
        self.lost_pods.lock().clear();
    }

    fn push(&self, needle: String, reply: Reply, once: bool) {
        self.rules.lock().push(Rule {
            needle,
            reply,
            once,
        });
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().clone()
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.command_line().contains(needle))
            .count()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn exec(
        &self,
        pod: &str,
        container: &str,
        namespace: &str,
        command: &[String],
    ) -> Result<ExecOutput, ExecError> {
        let call = ExecCall {
            pod: pod.to_string(),
            container: container.to_string(),
            namespace: namespace.to_string(),
            command: command.to_vec(),
        };
        let line = call.command_line();
        self.calls.lock().push(call);

        if self.lost_pods.lock().iter().any(|p| p == pod) {
            return Err(ExecError::PodNotFound {
                pod: pod.to_string(),
            });
        }

        let mut rules = self.rules.lock();
        let Some(index) = rules.iter().position(|r| line.contains(&r.needle)) else {
            return Ok(ExecOutput::default());
        };
        let reply = match &rules[index].reply {
            Reply::Output(output) => Ok(output.clone()),
            Reply::Fail(message) => Err(ExecError::CommandFailed {
                pod: pod.to_string(),
                command: command.to_vec(),
                stderr: String::new(),
                message: message.clone(),
            }),
        };
        if rules[index].once {
            rules.remove(index);
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let exec = ScriptedExecutor::new();
        exec.fail("fs free", "backend busy");
        exec.respond("report", "Used Capacity: 0B");

        let out = exec
            .exec("m-0", "master", "default", &cmd(&["alluxio", "fsadmin", "report"]))
            .await
            .unwrap();
        assert_eq!(out.stdout, "Used Capacity: 0B");

        let err = exec
            .exec("m-0", "master", "default", &cmd(&["alluxio", "fs", "free", "/"]))
            .await
            .unwrap_err();
        assert!(!err.is_pod_gone());

        let unmatched = exec
            .exec("w-0", "worker", "default", &cmd(&["true"]))
            .await
            .unwrap();
        assert!(unmatched.stdout.is_empty());
        assert_eq!(exec.calls().len(), 3);
        assert_eq!(exec.calls_matching("alluxio"), 2);
    }

    #[tokio::test]
    async fn test_one_shot_replies_and_lost_pods() {
        let exec = ScriptedExecutor::new();
        exec.respond_once("summary", "Used Capacity: 1GB");
        exec.respond("summary", "Used Capacity: 0B");
        exec.lose_pod("w-1");

        let report = cmd(&["alluxio", "fsadmin", "report", "summary"]);
        let first = exec.exec("m-0", "master", "default", &report).await.unwrap();
        let second = exec.exec("m-0", "master", "default", &report).await.unwrap();
        assert_eq!(first.stdout, "Used Capacity: 1GB");
        assert_eq!(second.stdout, "Used Capacity: 0B");

        let err = exec
            .exec("w-1", "worker", "default", &cmd(&["true"]))
            .await
            .unwrap_err();
        assert!(err.is_pod_gone());
    }
}
