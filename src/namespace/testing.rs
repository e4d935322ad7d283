//! Test doubles for the command layer.

use crate::namespace::exec::{CommandExecutor, ExecError};
use parking_lot::Mutex;
use std::sync::Arc;

enum Reply {
    Output(String),
    Fail,
}

/// Executor that records every command and answers from registered prefixes.
///
/// The longest registered prefix matching a command line wins; unmatched
/// commands succeed with empty output. A scripted failure only surfaces when
/// the caller checks the exit code.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<String>>,
    replies: Mutex<Vec<(String, Reply)>>,
}

impl RecordingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, prefix: &str, output: &str) {
        self.replies
            .lock()
            .push((prefix.to_string(), Reply::Output(output.to_string())));
    }

    pub fn fail(&self, prefix: &str) {
        self.replies.lock().push((prefix.to_string(), Reply::Fail));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn called(&self, line: &str) -> bool {
        self.calls.lock().iter().any(|c| c == line)
    }

    pub fn called_prefix(&self, prefix: &str) -> bool {
        self.calls.lock().iter().any(|c| c.starts_with(prefix))
    }
}

impl CommandExecutor for RecordingExecutor {
    fn execute(&self, cmd: &[String], check_exit_code: bool) -> Result<String, ExecError> {
        let line = cmd.join(" ");
        self.calls.lock().push(line.clone());

        let replies = self.replies.lock();
        let reply = replies
            .iter()
            .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());

        match reply {
            Some((_, Reply::Output(out))) => Ok(out.clone()),
            Some((_, Reply::Fail)) if !check_exit_code => Ok(String::new()),
            Some((_, Reply::Fail)) => Err(ExecError::Failed {
                command: line,
                code: Some(1),
                stderr: "scripted failure".to_string(),
            }),
            None => Ok(String::new()),
        }
    }
}
