//! Conversation orchestration across the two upstream protocols.
//!
//! One `turn` call takes user input to a finished assistant reply,
//! whichever protocol the assistant runs on. The thread protocol submits a
//! message, starts a run and polls it to completion; the response protocol
//! is a single round trip chained to the previous response id. Session
//! pointers are committed only after the upstream turn succeeds.

use crate::assistant::{Assistant, AssistantCatalog, Protocol};
use crate::directory::{SessionDirectory, SessionKind};
use crate::error::{Error, Result};
use crate::poll::{poll_until, PollBudget, PollOutcome};
use crate::provider::{MessageInput, Provider, ResponseInput, ResponseRequest, Run, RunStatus};
use crate::reconcile::RunReconciler;
use base64::Engine;
use std::sync::Arc;

/// Reply used when the upstream returns no text segments at all.
pub const EMPTY_REPLY: &str = "(the assistant returned an empty reply)";

/// Prompt attached to image inputs.
const IMAGE_PROMPT: &str = "Analyze this image.";
/// Prompt attached to document inputs.
const DOCUMENT_PROMPT: &str = "Analyze the attached file.";

/// User input for one turn.
#[derive(Debug, Clone)]
pub enum TurnInput {
    Text(String),
    File { filename: String, bytes: Vec<u8> },
}

/// Completed turn: the reply text and the session pointer it committed.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub text: String,
    pub pointer: String,
}

/// Completion-wait budgets for the thread protocol.
#[derive(Debug, Clone, Copy)]
pub struct TurnBudgets {
    /// Wait for text turns.
    pub text: PollBudget,
    /// Wait for file-analysis turns, which run much longer.
    pub file: PollBudget,
}

pub struct Orchestrator {
    catalog: Arc<AssistantCatalog>,
    provider: Arc<dyn Provider>,
    directory: Arc<SessionDirectory>,
    reconciler: RunReconciler,
    budgets: TurnBudgets,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<AssistantCatalog>,
        provider: Arc<dyn Provider>,
        directory: Arc<SessionDirectory>,
        reconciler: RunReconciler,
        budgets: TurnBudgets,
    ) -> Self {
        Self {
            catalog,
            provider,
            directory,
            reconciler,
            budgets,
        }
    }

    /// Run one full turn for `(user_id, assistant_id)`.
    ///
    /// Any failure leaves the stored session pointer where it was; there is
    /// no partial commit. Concurrent turns for the same pair are not
    /// serialized here; on the thread protocol the reconciler absorbs the
    /// overlap, callers wanting strict ordering must single-flight per pair
    /// themselves.
    pub async fn turn(
        &self,
        user_id: i64,
        assistant_id: &str,
        input: TurnInput,
    ) -> Result<TurnReply> {
        let assistant = self
            .catalog
            .get(assistant_id)
            .ok_or_else(|| Error::UnknownAssistant(assistant_id.to_string()))?;

        tracing::debug!(user_id, assistant_id, "Starting turn");

        match assistant.protocol.clone() {
            Protocol::Threads { .. } => self.thread_turn(user_id, assistant, input).await,
            Protocol::Responses {
                model,
                instructions,
            } => {
                self.response_turn(user_id, assistant, &model, &instructions, input)
                    .await
            }
        }
    }

    // ------------------------------------------------------------------
    // Thread protocol
    // ------------------------------------------------------------------

    async fn thread_turn(
        &self,
        user_id: i64,
        assistant: &Assistant,
        input: TurnInput,
    ) -> Result<TurnReply> {
        let thread_id = self.directory.resolve_thread(user_id, &assistant.id).await?;
        self.reconciler.settle(&thread_id).await?;

        let (message, budget) = match input {
            TurnInput::Text(text) => (MessageInput::Text(text), self.budgets.text),
            TurnInput::File { filename, bytes } => {
                let file_id = self.provider.upload_file(&filename, bytes).await?;
                let message = if is_image(&filename) {
                    MessageInput::Image {
                        prompt: IMAGE_PROMPT.to_string(),
                        file_id,
                    }
                } else {
                    MessageInput::Document {
                        prompt: DOCUMENT_PROMPT.to_string(),
                        file_id,
                    }
                };
                (message, self.budgets.file)
            }
        };

        self.provider.create_message(&thread_id, &message).await?;
        let run = self.provider.create_run(&thread_id, &assistant.id).await?;

        let finished = self.wait_for_run(&thread_id, &run.id, budget).await?;
        if finished.status != RunStatus::Completed {
            return Err(Error::run_failed(
                finished.status.as_str(),
                finished
                    .error_detail
                    .unwrap_or_else(|| "no detail from upstream".to_string()),
            ));
        }

        let text = self.latest_reply(&thread_id).await?;
        self.directory
            .update(user_id, &assistant.id, SessionKind::Thread, &thread_id)
            .await?;

        Ok(TurnReply {
            text,
            pointer: thread_id,
        })
    }

    async fn wait_for_run(
        &self,
        thread_id: &str,
        run_id: &str,
        budget: PollBudget,
    ) -> Result<Run> {
        let provider = Arc::clone(&self.provider);
        let thread = thread_id.to_string();
        let run = run_id.to_string();

        let outcome = poll_until(budget, move || {
            let provider = Arc::clone(&provider);
            let thread = thread.clone();
            let run = run.clone();
            async move {
                let current = provider.retrieve_run(&thread, &run).await?;
                Ok::<_, Error>(current.status.is_terminal().then_some(current))
            }
        })
        .await?;

        match outcome {
            PollOutcome::Completed(run) => Ok(run),
            PollOutcome::TimedOut => {
                tracing::warn!(thread_id, run_id, "Run did not finish within budget");
                Err(Error::Timeout)
            }
        }
    }

    /// Most recent message on the thread, text segments joined with
    /// newlines.
    async fn latest_reply(&self, thread_id: &str) -> Result<String> {
        let messages = self.provider.list_messages(thread_id, 1).await?;
        let text = messages
            .first()
            .map(|m| m.text_parts.join("\n"))
            .unwrap_or_default();

        Ok(if text.is_empty() {
            EMPTY_REPLY.to_string()
        } else {
            text
        })
    }

    // ------------------------------------------------------------------
    // Response protocol
    // ------------------------------------------------------------------

    async fn response_turn(
        &self,
        user_id: i64,
        assistant: &Assistant,
        model: &str,
        instructions: &str,
        input: TurnInput,
    ) -> Result<TurnReply> {
        let previous_response_id = self
            .directory
            .last_response_id(user_id, &assistant.id)
            .await?;

        let request_input = match input {
            TurnInput::Text(text) => ResponseInput::Text(text),
            TurnInput::File { filename, bytes } => {
                if is_image(&filename) {
                    // Images are inlined as data URLs; no upload round trip.
                    let mime = mime_guess::from_path(&filename).first_or_octet_stream();
                    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                    ResponseInput::Image {
                        prompt: IMAGE_PROMPT.to_string(),
                        data_url: format!("data:{};base64,{encoded}", mime.essence_str()),
                    }
                } else {
                    let file_id = self.provider.upload_file(&filename, bytes).await?;
                    ResponseInput::File {
                        prompt: DOCUMENT_PROMPT.to_string(),
                        file_id,
                    }
                }
            }
        };

        let request = ResponseRequest {
            model: model.to_string(),
            instructions: instructions.to_string(),
            input: request_input,
            previous_response_id,
        };

        let unit = self.provider.create_response(&request).await?;
        if unit.status == "failed" {
            return Err(Error::run_failed(
                unit.status.as_str(),
                unit.error_detail
                    .unwrap_or_else(|| "no detail from upstream".to_string()),
            ));
        }

        let text = unit.output_texts.concat();
        let text = if text.is_empty() {
            EMPTY_REPLY.to_string()
        } else {
            text
        };

        self.directory
            .update(user_id, &assistant.id, SessionKind::Response, &unit.id)
            .await?;

        Ok(TurnReply {
            text,
            pointer: unit.id,
        })
    }
}

/// Filename-based MIME categorization; images get inline treatment, all
/// other types are treated as documents.
fn is_image(filename: &str) -> bool {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .type_()
        == mime_guess::mime::IMAGE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::FakeProvider;
    use crate::provider::{ProviderError, ResponseUnit};
    use crate::store::Store;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use usher_common::AssistantEntry;

    fn entry(id: &str, protocol: &str, retrieval: bool) -> AssistantEntry {
        AssistantEntry {
            id: id.to_string(),
            title: format!("Assistant {id}"),
            emoji: "🤖".to_string(),
            description: "test".to_string(),
            protocol: protocol.to_string(),
            retrieval,
            model: None,
            instructions: if protocol == "responses" {
                Some("Stay in character.".to_string())
            } else {
                None
            },
        }
    }

    struct Rig {
        orchestrator: Orchestrator,
        provider: Arc<FakeProvider>,
        directory: Arc<SessionDirectory>,
        _dir: tempfile::TempDir,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("usher.db")).unwrap();
        let provider = Arc::new(FakeProvider::new());
        let directory =
            Arc::new(SessionDirectory::new(store, Arc::clone(&provider) as _).unwrap());
        let catalog = Arc::new(
            AssistantCatalog::from_entries(&[
                entry("asst_th", "threads", false),
                entry("asst_rag", "threads", true),
                entry("asst_re", "responses", false),
            ])
            .unwrap(),
        );
        let reconciler = RunReconciler::new(
            Arc::clone(&provider) as _,
            PollBudget::new(3, Duration::from_millis(1)),
        );
        let budgets = TurnBudgets {
            text: PollBudget::new(3, Duration::from_millis(1)),
            file: PollBudget::new(5, Duration::from_millis(1)),
        };
        let orchestrator = Orchestrator::new(
            catalog,
            Arc::clone(&provider) as _,
            Arc::clone(&directory),
            reconciler,
            budgets,
        );

        Rig {
            orchestrator,
            provider,
            directory,
            _dir: dir,
        }
    }

    fn text(s: &str) -> TurnInput {
        TurnInput::Text(s.to_string())
    }

    fn file(name: &str) -> TurnInput {
        TurnInput::File {
            filename: name.to_string(),
            bytes: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn test_unknown_assistant_is_rejected_before_any_upstream_call() {
        let rig = rig();
        let err = rig
            .orchestrator
            .turn(7, "asst_missing", text("hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnknownAssistant(_)));
        assert!(rig.provider.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_text_turn_on_thread_protocol() {
        let rig = rig();
        rig.provider
            .run_states
            .lock()
            .unwrap()
            .push_back(FakeProvider::run("run_new", RunStatus::Completed));
        *rig.provider.thread_messages.lock().unwrap() =
            vec![FakeProvider::message("assistant", &["Hello", "world"])];

        let reply = rig.orchestrator.turn(7, "asst_th", text("hi")).await.unwrap();

        assert_eq!(reply.text, "Hello\nworld");
        assert_eq!(reply.pointer, "thread_1");
        assert_eq!(
            rig.provider.sent_messages.lock().unwrap().as_slice(),
            [MessageInput::Text("hi".to_string())]
        );
        assert_eq!(
            rig.directory.thread_id(7, "asst_th").await.unwrap().as_deref(),
            Some("thread_1")
        );
        // Full call sequence for one clean turn.
        assert_eq!(
            rig.provider.calls.lock().unwrap().as_slice(),
            [
                "create_thread",
                "list_runs",
                "create_message",
                "create_run",
                "retrieve_run",
                "list_messages",
            ]
        );
    }

    #[tokio::test]
    async fn test_thread_is_created_once_and_reused() {
        let rig = rig();
        rig.provider
            .run_states
            .lock()
            .unwrap()
            .push_back(FakeProvider::run("run_new", RunStatus::Completed));
        *rig.provider.thread_messages.lock().unwrap() =
            vec![FakeProvider::message("assistant", &["ok"])];

        rig.orchestrator.turn(7, "asst_th", text("one")).await.unwrap();
        rig.orchestrator.turn(7, "asst_th", text("two")).await.unwrap();

        assert_eq!(rig.provider.created_threads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_leftover_run_is_waited_out_before_the_new_message() {
        let rig = rig();
        rig.provider
            .leftover_runs
            .lock()
            .unwrap()
            .push(FakeProvider::run("run_busy", RunStatus::InProgress));
        rig.provider.run_states.lock().unwrap().extend([
            FakeProvider::run("run_busy", RunStatus::Completed),
            FakeProvider::run("run_new", RunStatus::Completed),
        ]);
        *rig.provider.thread_messages.lock().unwrap() =
            vec![FakeProvider::message("assistant", &["done"])];

        let reply = rig.orchestrator.turn(7, "asst_th", text("next")).await.unwrap();

        assert_eq!(reply.text, "done");
        assert!(rig.provider.cancelled.lock().unwrap().is_empty());
        // The settle poll happens before the new message is appended.
        assert_eq!(
            rig.provider.calls.lock().unwrap().as_slice(),
            [
                "create_thread",
                "list_runs",
                "retrieve_run",
                "create_message",
                "create_run",
                "retrieve_run",
                "list_messages",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_run_surfaces_status_and_detail() {
        let rig = rig();
        rig.provider.run_states.lock().unwrap().push_back(Run {
            id: "run_new".to_string(),
            status: RunStatus::Failed,
            error_detail: Some("server_error: boom".to_string()),
        });

        let err = rig.orchestrator.turn(7, "asst_th", text("hi")).await.unwrap_err();

        match err {
            Error::RunFailed { status, detail } => {
                assert_eq!(status, "failed");
                assert_eq!(detail, "server_error: boom");
            }
            other => panic!("expected RunFailed, got {other:?}"),
        }
        // No reply fetch after a failed run.
        assert_eq!(rig.provider.called("list_messages"), 0);
    }

    #[tokio::test]
    async fn test_run_timeout_is_distinct_from_failure() {
        let rig = rig();
        rig.provider
            .run_states
            .lock()
            .unwrap()
            .push_back(FakeProvider::run("run_new", RunStatus::InProgress));

        let err = rig.orchestrator.turn(7, "asst_th", text("hi")).await.unwrap_err();

        assert!(matches!(err, Error::Timeout));
        assert_eq!(rig.provider.called("retrieve_run"), 3);
        assert_eq!(rig.provider.called("list_messages"), 0);
    }

    #[tokio::test]
    async fn test_empty_thread_reply_becomes_placeholder() {
        let rig = rig();
        rig.provider
            .run_states
            .lock()
            .unwrap()
            .push_back(FakeProvider::run("run_new", RunStatus::Completed));
        *rig.provider.thread_messages.lock().unwrap() =
            vec![FakeProvider::message("assistant", &[])];

        let reply = rig.orchestrator.turn(7, "asst_th", text("hi")).await.unwrap();
        assert_eq!(reply.text, EMPTY_REPLY);
    }

    #[tokio::test]
    async fn test_image_upload_becomes_inline_image_message() {
        let rig = rig();
        rig.provider
            .run_states
            .lock()
            .unwrap()
            .push_back(FakeProvider::run("run_new", RunStatus::Completed));
        *rig.provider.thread_messages.lock().unwrap() =
            vec![FakeProvider::message("assistant", &["a photo of a cat"])];

        rig.orchestrator.turn(7, "asst_th", file("photo.png")).await.unwrap();

        assert_eq!(rig.provider.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(
            rig.provider.sent_messages.lock().unwrap().as_slice(),
            [MessageInput::Image {
                prompt: IMAGE_PROMPT.to_string(),
                file_id: "file_1".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_document_upload_becomes_attachment_message() {
        let rig = rig();
        rig.provider
            .run_states
            .lock()
            .unwrap()
            .push_back(FakeProvider::run("run_new", RunStatus::Completed));
        *rig.provider.thread_messages.lock().unwrap() =
            vec![FakeProvider::message("assistant", &["summary"])];

        rig.orchestrator.turn(7, "asst_th", file("report.pdf")).await.unwrap();

        assert_eq!(
            rig.provider.sent_messages.lock().unwrap().as_slice(),
            [MessageInput::Document {
                prompt: DOCUMENT_PROMPT.to_string(),
                file_id: "file_1".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_response_turn_starts_without_chaining() {
        let rig = rig();
        rig.provider
            .response_script
            .lock()
            .unwrap()
            .push_back(FakeProvider::response("resp_1", &["Hi!"]));

        let reply = rig.orchestrator.turn(7, "asst_re", text("hello")).await.unwrap();

        assert_eq!(reply.text, "Hi!");
        assert_eq!(reply.pointer, "resp_1");

        let requests = rig.provider.response_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].previous_response_id, None);
        assert_eq!(requests[0].instructions, "Stay in character.");
        assert_eq!(requests[0].input, ResponseInput::Text("hello".to_string()));

        drop(requests);
        assert_eq!(
            rig.directory.last_response_id(7, "asst_re").await.unwrap().as_deref(),
            Some("resp_1")
        );
    }

    #[tokio::test]
    async fn test_response_turn_chains_to_previous_pointer() {
        let rig = rig();
        rig.directory
            .update(7, "asst_re", SessionKind::Response, "resp_0")
            .await
            .unwrap();
        rig.provider
            .response_script
            .lock()
            .unwrap()
            .push_back(FakeProvider::response("resp_1", &["again"]));

        rig.orchestrator.turn(7, "asst_re", text("more")).await.unwrap();

        let requests = rig.provider.response_requests.lock().unwrap();
        assert_eq!(requests[0].previous_response_id.as_deref(), Some("resp_0"));
        drop(requests);
        assert_eq!(
            rig.directory.last_response_id(7, "asst_re").await.unwrap().as_deref(),
            Some("resp_1")
        );
    }

    #[tokio::test]
    async fn test_failed_response_keeps_the_old_pointer() {
        let rig = rig();
        rig.directory
            .update(7, "asst_re", SessionKind::Response, "resp_0")
            .await
            .unwrap();
        rig.provider.response_script.lock().unwrap().push_back(ResponseUnit {
            id: "resp_bad".to_string(),
            status: "failed".to_string(),
            error_detail: Some("rate_limit_exceeded: slow down".to_string()),
            ..Default::default()
        });

        let err = rig.orchestrator.turn(7, "asst_re", text("hi")).await.unwrap_err();

        assert!(err.is_run_failed());
        assert_eq!(
            rig.directory.last_response_id(7, "asst_re").await.unwrap().as_deref(),
            Some("resp_0")
        );
    }

    #[tokio::test]
    async fn test_provider_error_keeps_the_old_pointer() {
        let rig = rig();
        rig.directory
            .update(7, "asst_re", SessionKind::Response, "resp_0")
            .await
            .unwrap();
        *rig.provider.response_error.lock().unwrap() =
            Some(ProviderError::new("create_response", "connection reset"));

        let err = rig.orchestrator.turn(7, "asst_re", text("hi")).await.unwrap_err();

        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(
            rig.directory.last_response_id(7, "asst_re").await.unwrap().as_deref(),
            Some("resp_0")
        );
    }

    #[tokio::test]
    async fn test_reset_breaks_the_chain() {
        let rig = rig();
        rig.provider.response_script.lock().unwrap().extend([
            FakeProvider::response("resp_1", &["one"]),
            FakeProvider::response("resp_2", &["two"]),
        ]);

        rig.orchestrator.turn(7, "asst_re", text("first")).await.unwrap();
        rig.directory.reset(7, "asst_re").await.unwrap();
        rig.orchestrator.turn(7, "asst_re", text("second")).await.unwrap();

        let requests = rig.provider.response_requests.lock().unwrap();
        assert_eq!(requests[1].previous_response_id, None);
    }

    #[tokio::test]
    async fn test_response_output_segments_concatenate() {
        let rig = rig();
        rig.provider
            .response_script
            .lock()
            .unwrap()
            .push_back(FakeProvider::response("resp_1", &["A", "B"]));

        let reply = rig.orchestrator.turn(7, "asst_re", text("hi")).await.unwrap();
        assert_eq!(reply.text, "AB");
    }

    #[tokio::test]
    async fn test_empty_response_output_becomes_placeholder() {
        let rig = rig();
        rig.provider
            .response_script
            .lock()
            .unwrap()
            .push_back(FakeProvider::response("resp_1", &[]));

        let reply = rig.orchestrator.turn(7, "asst_re", text("hi")).await.unwrap();
        assert_eq!(reply.text, EMPTY_REPLY);
    }

    #[tokio::test]
    async fn test_response_image_is_inlined_as_data_url() {
        let rig = rig();
        rig.provider
            .response_script
            .lock()
            .unwrap()
            .push_back(FakeProvider::response("resp_1", &["a cat"]));

        rig.orchestrator.turn(7, "asst_re", file("pic.jpg")).await.unwrap();

        assert_eq!(rig.provider.uploads.load(Ordering::SeqCst), 0);
        let requests = rig.provider.response_requests.lock().unwrap();
        match &requests[0].input {
            ResponseInput::Image { prompt, data_url } => {
                assert_eq!(prompt, IMAGE_PROMPT);
                assert!(
                    data_url.starts_with("data:image/jpeg;base64,"),
                    "unexpected data url: {data_url}"
                );
            }
            other => panic!("expected inline image input, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_response_document_is_uploaded_first() {
        let rig = rig();
        rig.provider
            .response_script
            .lock()
            .unwrap()
            .push_back(FakeProvider::response("resp_1", &["summary"]));

        rig.orchestrator.turn(7, "asst_re", file("notes.txt")).await.unwrap();

        assert_eq!(rig.provider.uploads.load(Ordering::SeqCst), 1);
        let requests = rig.provider.response_requests.lock().unwrap();
        assert_eq!(
            requests[0].input,
            ResponseInput::File {
                prompt: DOCUMENT_PROMPT.to_string(),
                file_id: "file_1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_retrieval_assistant_stays_on_the_thread_protocol() {
        let rig = rig();
        rig.provider
            .run_states
            .lock()
            .unwrap()
            .push_back(FakeProvider::run("run_new", RunStatus::Completed));
        *rig.provider.thread_messages.lock().unwrap() =
            vec![FakeProvider::message("assistant", &["from the knowledge base"])];

        rig.orchestrator.turn(7, "asst_rag", text("question")).await.unwrap();

        assert_eq!(rig.provider.called("create_response"), 0);
        assert_eq!(rig.provider.called("create_thread"), 1);
    }
}
