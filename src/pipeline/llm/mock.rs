//! Deterministic LLM clients for tests and offline runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::types::{LlmClient, LlmTask};
use super::LlmError;

/// Mock LLM client: returns the same configured response for every call.
pub struct MockLlmClient {
    response: String,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
        }
    }
}

impl LlmClient for MockLlmClient {
    fn generate(&self, _model: &str, _prompt: &str, _system: &str) -> Result<String, LlmError> {
        Ok(self.response.clone())
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Unreachable,
}

/// One recorded call made against a [`ScriptedLlmClient`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub task: Option<LlmTask>,
    pub model: String,
    pub prompt: String,
}

/// Scripted client keyed by pipeline task.
///
/// Each task owns a queue of replies; the last reply of a queue repeats once
/// the queue is drained. Tasks without a script answer with an empty string.
/// The task is recovered from the system prompt, so the client works with
/// any model routing.
#[derive(Default)]
pub struct ScriptedLlmClient {
    scripts: Mutex<HashMap<LlmTask, VecDeque<Reply>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies for a task, in call order.
    pub fn respond(self, task: LlmTask, replies: &[&str]) -> Self {
        self.push(task, replies.iter().map(|r| Reply::Text(r.to_string())))
    }

    /// Queue a transport failure for the next call of a task.
    pub fn fail(self, task: LlmTask) -> Self {
        self.push(task, std::iter::once(Reply::Unreachable))
    }

    fn push(self, task: LlmTask, replies: impl Iterator<Item = Reply>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(task).or_default().extend(replies);
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, task: LlmTask) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.task == Some(task))
            .collect()
    }

    fn next_reply(&self, task: Option<LlmTask>) -> Reply {
        let Some(task) = task else {
            return Reply::Text(String::new());
        };
        let Ok(mut scripts) = self.scripts.lock() else {
            return Reply::Text(String::new());
        };
        match scripts.get_mut(&task) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Reply::Text(String::new())),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Text(String::new())),
            None => Reply::Text(String::new()),
        }
    }
}

impl LlmClient for ScriptedLlmClient {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError> {
        let task = LlmTask::from_system_prompt(system);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                task,
                model: model.to_string(),
                prompt: prompt.to_string(),
            });
        }
        match self.next_reply(task) {
            Reply::Text(text) => Ok(text),
            Reply::Unreachable => Err(LlmError::Connection("scripted".into())),
        }
    }
}
