//! Scripted provider fake shared by the core test suites.
//!
//! Fields are plain mutex-wrapped scripts the tests fill in directly; every
//! trait call records its operation name so tests can assert on what was
//! (and was not) touched.

use super::{
    MessageInput, Provider, ProviderError, ResponseRequest, ResponseUnit, Run, RunStatus,
    ThreadMessage,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub(crate) struct FakeProvider {
    /// Operation names in call order.
    pub calls: Mutex<Vec<&'static str>>,
    pub created_threads: AtomicUsize,
    pub uploads: AtomicUsize,
    /// Result of `list_runs`.
    pub leftover_runs: Mutex<Vec<Run>>,
    /// Successive results of `retrieve_run`; the final entry repeats.
    pub run_states: Mutex<VecDeque<Run>>,
    /// Error injected into `cancel_run`.
    pub cancel_error: Mutex<Option<ProviderError>>,
    /// Run ids successfully cancelled.
    pub cancelled: Mutex<Vec<String>>,
    /// Inputs passed to `create_message`.
    pub sent_messages: Mutex<Vec<MessageInput>>,
    /// Result of `list_messages`.
    pub thread_messages: Mutex<Vec<ThreadMessage>>,
    /// Successive results of `create_response`.
    pub response_script: Mutex<VecDeque<ResponseUnit>>,
    /// Error injected into `create_response`.
    pub response_error: Mutex<Option<ProviderError>>,
    /// Requests passed to `create_response`.
    pub response_requests: Mutex<Vec<ResponseRequest>>,
    /// Responses served by `retrieve_response`, keyed by id.
    pub stored_responses: Mutex<HashMap<String, ResponseUnit>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `op` was called.
    pub fn called(&self, op: &'static str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    pub fn run(id: &str, status: RunStatus) -> Run {
        Run {
            id: id.to_string(),
            status,
            error_detail: None,
        }
    }

    pub fn message(role: &str, parts: &[&str]) -> ThreadMessage {
        ThreadMessage {
            id: "msg_1".to_string(),
            role: role.to_string(),
            text_parts: parts.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn response(id: &str, output: &[&str]) -> ResponseUnit {
        ResponseUnit {
            id: id.to_string(),
            status: "completed".to_string(),
            output_texts: output.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    fn record(&self, op: &'static str) {
        self.calls.lock().unwrap().push(op);
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn create_thread(&self) -> Result<String, ProviderError> {
        self.record("create_thread");
        let n = self.created_threads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("thread_{n}"))
    }

    async fn list_runs(&self, _thread_id: &str) -> Result<Vec<Run>, ProviderError> {
        self.record("list_runs");
        Ok(self.leftover_runs.lock().unwrap().clone())
    }

    async fn retrieve_run(&self, _thread_id: &str, _run_id: &str) -> Result<Run, ProviderError> {
        self.record("retrieve_run");
        let mut states = self.run_states.lock().unwrap();
        match states.len() {
            0 => Err(ProviderError::new("retrieve_run", "no scripted run state")),
            1 => Ok(states[0].clone()),
            _ => Ok(states.pop_front().unwrap()),
        }
    }

    async fn cancel_run(&self, _thread_id: &str, run_id: &str) -> Result<(), ProviderError> {
        self.record("cancel_run");
        if let Some(err) = self.cancel_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.cancelled.lock().unwrap().push(run_id.to_string());
        Ok(())
    }

    async fn create_message(
        &self,
        _thread_id: &str,
        input: &MessageInput,
    ) -> Result<(), ProviderError> {
        self.record("create_message");
        self.sent_messages.lock().unwrap().push(input.clone());
        Ok(())
    }

    async fn create_run(
        &self,
        _thread_id: &str,
        _assistant_id: &str,
    ) -> Result<Run, ProviderError> {
        self.record("create_run");
        Ok(Self::run("run_new", RunStatus::Queued))
    }

    async fn list_messages(
        &self,
        _thread_id: &str,
        _limit: u32,
    ) -> Result<Vec<ThreadMessage>, ProviderError> {
        self.record("list_messages");
        Ok(self.thread_messages.lock().unwrap().clone())
    }

    async fn create_response(
        &self,
        request: &ResponseRequest,
    ) -> Result<ResponseUnit, ProviderError> {
        self.record("create_response");
        self.response_requests.lock().unwrap().push(request.clone());
        if let Some(err) = self.response_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.response_script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::new("create_response", "no scripted response"))
    }

    async fn retrieve_response(&self, response_id: &str) -> Result<ResponseUnit, ProviderError> {
        self.record("retrieve_response");
        self.stored_responses
            .lock()
            .unwrap()
            .get(response_id)
            .cloned()
            .ok_or_else(|| {
                ProviderError::new("retrieve_response", format!("unknown response {response_id}"))
            })
    }

    async fn upload_file(&self, _filename: &str, _bytes: Vec<u8>) -> Result<String, ProviderError> {
        self.record("upload_file");
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("file_{n}"))
    }
}
