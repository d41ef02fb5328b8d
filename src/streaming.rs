// src/streaming.rs
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::SessionError;
use crate::llm::openai_client::{FunctionCall, OpenAIClient, ToolCallRequestPart};
use crate::llm::{ChatMessage, ModelEndpoint, StreamChunk};
use crate::session::Message;
use crate::tools::{ToolCall, ToolRegistry, ToolResult};

#[derive(Debug)]
pub enum SessionEvent {
    TextDelta(String),
    ToolCallRequested(ToolCall),
    ToolResult(ToolResult),
    /// Terminal success; carries the only message the turn produces.
    Done(Message),
    /// Terminal failure; nothing was produced.
    Failed(SessionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    ToolPending,
    Completed,
    Failed,
    Cancelled,
}

/// Tool call being assembled from streamed fragments.
#[derive(Debug, Default)]
struct PendingCall {
    index: usize,
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Drives one conversational turn against a model endpoint.
pub struct StreamingSession {
    endpoint: Arc<dyn ModelEndpoint>,
    tools: Arc<ToolRegistry>,
    system_prompt: String,
    max_tool_steps: usize,
    state: TurnState,
}

impl StreamingSession {
    pub fn new(
        endpoint: Arc<dyn ModelEndpoint>,
        tools: Arc<ToolRegistry>,
        system_prompt: impl Into<String>,
        max_tool_steps: usize,
    ) -> Self {
        Self {
            endpoint,
            tools,
            system_prompt: system_prompt.into(),
            max_tool_steps,
            state: TurnState::Idle,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Runs the turn to a terminal state, sending every event to `events`.
    /// Exactly one `Done` or `Failed` is sent. Returns the assistant message
    /// on success.
    pub async fn run_turn(
        &mut self,
        history: &[Message],
        events: &mpsc::UnboundedSender<SessionEvent>,
        mut cancel: watch::Receiver<bool>,
    ) -> Option<Message> {
        if self.state != TurnState::Idle {
            log::warn!("run_turn called on a session in state {:?}", self.state);
            let _ = events.send(SessionEvent::Failed(SessionError::Busy));
            return None;
        }

        let outcome = tokio::select! {
            result = self.drive(history, events) => result,
            _ = cancelled(&mut cancel) => Err(SessionError::Cancelled),
        };

        match outcome {
            Ok(message) => {
                self.state = TurnState::Completed;
                log::info!("Turn completed ({} chars)", message.content().len());
                let _ = events.send(SessionEvent::Done(message.clone()));
                Some(message)
            }
            Err(SessionError::Cancelled) => {
                self.state = TurnState::Cancelled;
                log::info!("Turn cancelled; discarding streamed text");
                let _ = events.send(SessionEvent::Failed(SessionError::Cancelled));
                None
            }
            Err(e) => {
                self.state = TurnState::Failed;
                log::error!("Turn failed: {}", e);
                let _ = events.send(SessionEvent::Failed(e));
                None
            }
        }
    }

    async fn drive(
        &mut self,
        history: &[Message],
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Message, SessionError> {
        let mut transcript = OpenAIClient::convert_messages(&self.system_prompt, history);
        let declarations = self.tools.declarations();
        let mut content = String::new();
        let mut tool_steps = 0;

        loop {
            self.state = TurnState::Streaming;
            log::info!("Requesting {} with {} transcript entries", self.endpoint.name(), transcript.len());
            let mut stream = self.endpoint.stream_chat(&transcript, &declarations).await?;

            let mut step_text = String::new();
            let mut calls: Vec<PendingCall> = Vec::new();
            while let Some(chunk) = stream.next().await {
                match chunk? {
                    StreamChunk::Text(text) => {
                        step_text.push_str(&text);
                        let _ = events.send(SessionEvent::TextDelta(text));
                    }
                    StreamChunk::ToolCall { index, id, name, arguments } => {
                        let pos = match calls.iter().position(|c| c.index == index) {
                            Some(pos) => pos,
                            None => {
                                calls.push(PendingCall { index, ..Default::default() });
                                calls.len() - 1
                            }
                        };
                        let call = &mut calls[pos];
                        if id.is_some() {
                            call.id = id;
                        }
                        if let Some(name) = name {
                            call.name.push_str(&name);
                        }
                        call.arguments.push_str(&arguments);
                    }
                    StreamChunk::Finish(reason) => {
                        log::debug!("Step finished: {:?}", reason);
                    }
                }
            }
            content.push_str(&step_text);

            if calls.is_empty() {
                return Ok(Message::assistant(content));
            }

            tool_steps += 1;
            if tool_steps > self.max_tool_steps {
                return Err(SessionError::TooManySteps(self.max_tool_steps));
            }

            self.state = TurnState::ToolPending;
            let requests: Vec<ToolCallRequestPart> = calls
                .iter()
                .map(|c| ToolCallRequestPart {
                    id: c.id.clone().unwrap_or_else(|| format!("call_{}", c.index)),
                    r#type: "function".to_string(),
                    function: FunctionCall { name: c.name.clone(), arguments: c.arguments.clone() },
                })
                .collect();
            transcript.push(ChatMessage::assistant_tool_calls(&step_text, requests.clone()));

            for request in requests {
                let call = self
                    .tools
                    .prepare_call(&request.id, &request.function.name, &request.function.arguments)?;
                let _ = events.send(SessionEvent::ToolCallRequested(call.clone()));
                let result = self.tools.execute(&call).await?;
                transcript.push(ChatMessage::tool_result(&result));
                let _ = events.send(SessionEvent::ToolResult(result));
            }
        }
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow() {
        if cancel.changed().await.is_err() {
            // sender gone: the turn can no longer be cancelled
            std::future::pending::<()>().await;
        }
    }
}

/// Handle to a turn running on the tokio runtime.
pub struct TurnHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<Option<Message>>,
}

impl TurnHandle {
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn join(self) -> Option<Message> {
        self.join.await.unwrap_or_else(|e| {
            log::error!("Turn task panicked: {}", e);
            None
        })
    }
}

/// Spawns `session` on the runtime and returns its handle and event feed.
pub fn spawn_turn(
    mut session: StreamingSession,
    history: Vec<Message>,
) -> (TurnHandle, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let join = tokio::spawn(async move { session.run_turn(&history, &tx, cancel_rx).await });
    (TurnHandle { cancel: cancel_tx, join }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChunkStream;
    use crate::tools::ToolDeclaration;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Plays back one scripted response per request and records transcripts.
    struct Scripted {
        steps: Mutex<Vec<Vec<Result<StreamChunk, SessionError>>>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Scripted {
        fn new(steps: Vec<Vec<Result<StreamChunk, SessionError>>>) -> Arc<Self> {
            Arc::new(Self { steps: Mutex::new(steps), seen: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl ModelEndpoint for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream_chat(&self, messages: &[ChatMessage], _tools: &[ToolDeclaration]) -> Result<ChunkStream, SessionError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let mut steps = self.steps.lock().unwrap();
            if steps.is_empty() {
                return Err(SessionError::transport("scripted", "no more steps"));
            }
            Ok(Box::pin(stream::iter(steps.remove(0))))
        }
    }

    /// Never yields anything.
    struct Stalled;

    #[async_trait]
    impl ModelEndpoint for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn stream_chat(&self, _m: &[ChatMessage], _t: &[ToolDeclaration]) -> Result<ChunkStream, SessionError> {
            Ok(Box::pin(stream::pending::<Result<StreamChunk, SessionError>>()))
        }
    }

    fn text(s: &str) -> Result<StreamChunk, SessionError> {
        Ok(StreamChunk::Text(s.to_string()))
    }

    fn tool_fragment(index: usize, id: Option<&str>, name: Option<&str>, args: &str) -> Result<StreamChunk, SessionError> {
        Ok(StreamChunk::ToolCall {
            index,
            id: id.map(String::from),
            name: name.map(String::from),
            arguments: args.to_string(),
        })
    }

    fn session(endpoint: Arc<dyn ModelEndpoint>) -> StreamingSession {
        let tools = Arc::new(ToolRegistry::with_builtin_tools(Duration::from_secs(5)));
        StreamingSession::new(endpoint, tools, "system", 3)
    }

    async fn run(session: &mut StreamingSession, history: &[Message]) -> (Option<Message>, Vec<SessionEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let out = session.run_turn(history, &tx, cancel_rx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        (out, events)
    }

    #[tokio::test]
    async fn text_only_turn_produces_one_message() {
        let endpoint = Scripted::new(vec![vec![text("Hel"), text("lo"), Ok(StreamChunk::Finish(None))]]);
        let mut s = session(endpoint);
        let (out, events) = run(&mut s, &[Message::user("hi")]).await;

        assert_eq!(out.as_ref().map(Message::content), Some("Hello"));
        assert_eq!(s.state(), TurnState::Completed);
        assert!(matches!(events[0], SessionEvent::TextDelta(ref t) if t == "Hel"));
        assert!(matches!(events.last(), Some(SessionEvent::Done(m)) if m.content() == "Hello"));
    }

    #[tokio::test]
    async fn tool_calls_run_in_arrival_order_and_feed_back() {
        let endpoint = Scripted::new(vec![
            vec![
                text("Let me check. "),
                tool_fragment(0, Some("a"), Some("searchDocs"), "{\"query\":"),
                tool_fragment(1, Some("b"), Some("analyzeCode"), "{\"code\":\"x\",\"language\":\"go\"}"),
                tool_fragment(0, None, None, "\"tokio\"}"),
                Ok(StreamChunk::Finish(Some("tool_calls".to_string()))),
            ],
            vec![text("Done.")],
        ]);
        let mut s = session(endpoint.clone());
        let (out, events) = run(&mut s, &[Message::user("help")]).await;

        assert_eq!(out.unwrap().content(), "Let me check. Done.");
        let requested: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::ToolCallRequested(c) => Some(c.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(requested, vec!["searchDocs", "analyzeCode"]);

        let seen = endpoint.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let second = &seen[1];
        let roles: Vec<&str> = second.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool", "tool"]);
        assert_eq!(second[3].tool_call_id.as_deref(), Some("a"));
        assert!(second[3].content.as_deref().unwrap().contains("best practices for tokio"));
    }

    #[tokio::test]
    async fn transport_error_mid_stream_fails_turn() {
        let endpoint = Scripted::new(vec![vec![text("partial"), Err(SessionError::transport("scripted", "reset"))]]);
        let mut s = session(endpoint);
        let (out, events) = run(&mut s, &[Message::user("hi")]).await;

        assert!(out.is_none());
        assert_eq!(s.state(), TurnState::Failed);
        assert!(matches!(events.last(), Some(SessionEvent::Failed(SessionError::Transport { .. }))));
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Done(_))));
    }

    #[tokio::test]
    async fn invalid_tool_arguments_fail_before_execution() {
        let endpoint = Scripted::new(vec![vec![tool_fragment(0, Some("a"), Some("analyzeCode"), "{\"code\":1}")]]);
        let mut s = session(endpoint);
        let (out, events) = run(&mut s, &[Message::user("hi")]).await;

        assert!(out.is_none());
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::ToolResult(_))));
        assert!(matches!(events.last(), Some(SessionEvent::Failed(SessionError::Tool(_)))));
    }

    #[tokio::test]
    async fn tool_loop_is_bounded() {
        let step = || vec![tool_fragment(0, Some("a"), Some("searchDocs"), "{\"query\":\"q\"}")];
        let endpoint = Scripted::new(vec![step(), step(), step(), step(), step()]);
        let mut s = session(endpoint);
        let (_, events) = run(&mut s, &[Message::user("hi")]).await;
        assert!(matches!(events.last(), Some(SessionEvent::Failed(SessionError::TooManySteps(3)))));
    }

    #[tokio::test]
    async fn cancelling_discards_the_turn() {
        let s = session(Arc::new(Stalled));
        let (handle, mut rx) = spawn_turn(s, vec![Message::user("hi")]);
        handle.cancel();
        assert!(handle.join().await.is_none());
        assert!(matches!(rx.recv().await, Some(SessionEvent::Failed(SessionError::Cancelled))));
    }

    #[tokio::test]
    async fn session_runs_only_once() {
        let endpoint = Scripted::new(vec![vec![text("a")], vec![text("b")]]);
        let mut s = session(endpoint);
        run(&mut s, &[Message::user("hi")]).await;
        let (out, events) = run(&mut s, &[Message::user("hi")]).await;
        assert!(out.is_none());
        assert!(matches!(events[0], SessionEvent::Failed(SessionError::Busy)));
    }
}
