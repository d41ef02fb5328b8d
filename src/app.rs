// src/app.rs
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::diagram::client::DiagramClient;
use crate::diagram::render::DiagramPipeline;
use crate::diagram::{DiagramRenderer, DiagramView, RenderedDiagram};
use crate::error::{RenderError, RepoError, SessionError};
use crate::llm::ModelEndpoint;
use crate::panel::InspectionPanel;
use crate::repo::{parse_repo, RepoId};
use crate::segmenter::{self, SegmentKind};
use crate::session::{Conversation, Message, Role};
use crate::streaming::{spawn_turn, SessionEvent, StreamingSession, TurnHandle};
use crate::tools::ToolRegistry;

/// Viewport assumed until the terminal reports its size.
const INITIAL_VIEWPORT_PX: u32 = 1280;

/// Outcome of a background diagram job, applied on the UI side.
#[derive(Debug)]
pub enum DiagramUpdate {
    Rendered {
        source: String,
        result: Result<RenderedDiagram, RenderError>,
    },
    FetchFailed {
        repo: String,
        error: SessionError,
    },
}

struct ActiveTurn {
    handle: TurnHandle,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

pub struct App {
    pub config: Config,
    pub conversation: Conversation,
    pub panel: InspectionPanel,
    pub diagram: DiagramView,
    pub diagram_focused: bool,
    pub input: String,
    tools: Arc<ToolRegistry>,
    endpoint: Arc<dyn ModelEndpoint>,
    pipeline: DiagramPipeline,
    diagram_client: Option<DiagramClient>,
    streaming_text: String,
    status: Option<String>,
    active_turn: Option<ActiveTurn>,
    pending_renders: usize,
    render_tx: mpsc::UnboundedSender<DiagramUpdate>,
    render_rx: mpsc::UnboundedReceiver<DiagramUpdate>,
}

impl App {
    pub fn new(config: Config, endpoint: Arc<dyn ModelEndpoint>, renderer: Arc<dyn DiagramRenderer>) -> Self {
        let tools = Arc::new(ToolRegistry::with_builtin_tools(config.tool_timeout()));
        let diagram_client = config.diagram_endpoint().map(|url| DiagramClient::new(&url));
        let panel = InspectionPanel::new(config.panel_initial_width(), INITIAL_VIEWPORT_PX);
        let (render_tx, render_rx) = mpsc::unbounded_channel();
        log::info!(
            "App ready: endpoint={}, tools={:?}, diagram endpoint={:?}",
            endpoint.name(),
            tools.names(),
            diagram_client.as_ref().map(|c| c.url())
        );
        App {
            config,
            conversation: Conversation::new(Some("Chat".to_string())),
            panel,
            diagram: DiagramView::default(),
            diagram_focused: false,
            input: String::new(),
            tools,
            endpoint,
            pipeline: DiagramPipeline::new(renderer),
            diagram_client,
            streaming_text: String::new(),
            status: None,
            active_turn: None,
            pending_renders: 0,
            render_tx,
            render_rx,
        }
    }

    /// True while a turn is in flight; new submissions are refused.
    pub fn is_loading(&self) -> bool {
        self.active_turn.is_some()
    }

    pub fn streaming_text(&self) -> &str {
        &self.streaming_text
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = Some(status.into());
    }

    pub fn endpoint_name(&self) -> &str {
        self.endpoint.name()
    }

    /// Appends the user message and starts a turn. Returns false when the
    /// input is blank or a turn is already running.
    pub fn submit(&mut self, input: &str) -> bool {
        let text = input.trim();
        if text.is_empty() {
            return false;
        }
        if self.is_loading() {
            log::warn!("Submission ignored: a response is still streaming");
            return false;
        }

        self.conversation.append(Message::user(text));
        self.streaming_text.clear();
        self.status = None;

        let session = StreamingSession::new(
            self.endpoint.clone(),
            self.tools.clone(),
            self.config.system_prompt(),
            self.config.max_tool_steps(),
        );
        let history = self.conversation.messages().to_vec();
        log::info!("Submitting turn with {} messages in history", history.len());
        let (handle, events) = spawn_turn(session, history);
        self.active_turn = Some(ActiveTurn { handle, events });
        true
    }

    /// Submits the contents of the input line and clears it on success.
    pub fn submit_input(&mut self) -> bool {
        let input = std::mem::take(&mut self.input);
        if self.submit(&input) {
            true
        } else {
            self.input = input;
            false
        }
    }

    pub fn cancel_turn(&mut self) {
        if let Some(turn) = &self.active_turn {
            log::info!("Cancelling in-flight turn");
            turn.handle.cancel();
        }
    }

    /// Waits for the next event of the running turn. `None` when no turn is
    /// running or its feed has closed.
    pub async fn recv_event(&mut self) -> Option<SessionEvent> {
        let turn = self.active_turn.as_mut()?;
        match turn.events.recv().await {
            Some(event) => Some(event),
            None => {
                log::error!("Turn ended without a terminal event");
                self.active_turn = None;
                self.streaming_text.clear();
                self.status = Some("The response ended unexpectedly".to_string());
                None
            }
        }
    }

    /// Drains whatever the running turn and the diagram jobs have produced
    /// so far without waiting.
    pub fn poll_events(&mut self) {
        let mut drained = Vec::new();
        if let Some(turn) = self.active_turn.as_mut() {
            while let Ok(event) = turn.events.try_recv() {
                drained.push(event);
            }
        }
        for event in drained {
            self.apply_event(event);
        }
        if self.active_turn.as_ref().is_some_and(|t| t.handle.is_finished() && t.events.is_empty()) {
            // The task is gone; a terminal event would have cleared the turn.
            self.active_turn = None;
            self.streaming_text.clear();
        }

        while let Ok(update) = self.render_rx.try_recv() {
            self.apply_diagram_update(update);
        }
    }

    /// Runs the current turn to its terminal event.
    pub async fn finish_turn(&mut self) {
        while let Some(event) = self.recv_event().await {
            self.apply_event(event);
        }
    }

    pub fn apply_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::TextDelta(text) => self.streaming_text.push_str(&text),
            SessionEvent::ToolCallRequested(call) => {
                log::debug!("Tool call requested: {} ({})", call.name, call.id);
                self.status = Some(format!("Running tool {}...", call.name));
            }
            SessionEvent::ToolResult(result) => {
                log::debug!("Tool result received for {}", result.call_id);
                self.status = None;
            }
            SessionEvent::Done(message) => {
                self.conversation.append(message);
                self.streaming_text.clear();
                self.status = None;
                self.active_turn = None;
            }
            SessionEvent::Failed(error) => {
                self.streaming_text.clear();
                self.status = Some(match error {
                    SessionError::Cancelled => "Response cancelled".to_string(),
                    other => format!("Error: {}", other),
                });
                self.active_turn = None;
            }
        }
    }

    fn latest_assistant(&self) -> impl Iterator<Item = &Message> {
        self.conversation.messages().iter().rev().filter(|m| m.role() == Role::Assistant)
    }

    /// Opens the inspection panel on the newest code block of any assistant
    /// message.
    pub fn open_latest_code_block(&mut self) -> bool {
        let found = self.latest_assistant().find_map(|m| {
            segmenter::code_blocks(&segmenter::segment(m.content()))
                .last()
                .map(|s| (s.language.clone(), s.text.clone()))
        });
        match found {
            Some((language, text)) => {
                let title = if language.is_empty() { "Code".to_string() } else { format!("Code ({})", language) };
                self.panel.open(&title, &text, &language);
                true
            }
            None => {
                self.status = Some("No code block to view".to_string());
                false
            }
        }
    }

    /// Renders the newest diagram block of any assistant message.
    pub fn show_latest_diagram(&mut self) -> bool {
        let source = self.latest_assistant().find_map(|m| {
            segmenter::segment(m.content())
                .into_iter()
                .rev()
                .find(|s| s.kind == SegmentKind::Diagram)
                .map(|s| s.text)
        });
        match source {
            Some(source) => {
                self.render_diagram(source);
                true
            }
            None => {
                self.status = Some("No diagram to show".to_string());
                false
            }
        }
    }

    fn render_diagram(&mut self, source: String) {
        self.diagram.begin(&source);
        self.diagram_focused = true;
        self.pending_renders += 1;
        let pipeline = self.pipeline.clone();
        let tx = self.render_tx.clone();
        tokio::spawn(async move {
            let result = pipeline.render_source(&source).await;
            let _ = tx.send(DiagramUpdate::Rendered { source, result });
        });
    }

    /// Validates `input` as a repository and fetches its architecture
    /// diagram in the background. The diagram area is left untouched until
    /// a model arrives.
    pub fn fetch_repo_diagram(&mut self, input: &str) -> Result<RepoId, RepoError> {
        let repo = match parse_repo(input) {
            Ok(repo) => repo,
            Err(e) => {
                self.status = Some(e.to_string());
                return Err(e);
            }
        };
        let Some(client) = self.diagram_client.clone() else {
            log::warn!("Diagram requested for {} but no diagram endpoint is configured", repo);
            self.status = Some("No diagram endpoint configured".to_string());
            return Ok(repo);
        };

        self.status = Some(format!("Fetching diagram for {}...", repo));
        self.pending_renders += 1;
        let pipeline = self.pipeline.clone();
        let tx = self.render_tx.clone();
        let url = repo.url();
        let name = repo.to_string();
        tokio::spawn(async move {
            let update = match client.fetch_model(&url).await {
                Ok(model) => {
                    let (source, result) = pipeline.render_model(&model).await;
                    DiagramUpdate::Rendered { source: source.text, result }
                }
                Err(error) => DiagramUpdate::FetchFailed { repo: name, error },
            };
            let _ = tx.send(update);
        });
        Ok(repo)
    }

    /// Waits for the next background diagram job to finish and applies it.
    pub async fn next_diagram_update(&mut self) -> bool {
        if self.pending_renders == 0 {
            return false;
        }
        match self.render_rx.recv().await {
            Some(update) => {
                self.apply_diagram_update(update);
                true
            }
            None => false,
        }
    }

    fn apply_diagram_update(&mut self, update: DiagramUpdate) {
        self.pending_renders = self.pending_renders.saturating_sub(1);
        match update {
            DiagramUpdate::Rendered { source, result } => {
                let failed = result.is_err();
                self.diagram.apply(source, result);
                self.diagram_focused = !failed;
                self.status = match &self.diagram {
                    DiagramView::Empty { notice } => notice.clone(),
                    _ => None,
                };
            }
            DiagramUpdate::FetchFailed { repo, error } => {
                log::error!("Diagram fetch for {} failed: {}", repo, error);
                self.status = Some(format!("Could not fetch diagram for {}: {}", repo, error));
            }
        }
    }

    pub fn zoom_diagram(&mut self, zoom_in: bool) {
        self.diagram.zoom_step(zoom_in);
    }

    /// Writes the rendered diagram, with the current pan and zoom applied,
    /// to `path`.
    pub fn export_diagram(&mut self, path: &Path) -> bool {
        let Some(svg) = self.diagram.export_svg() else {
            self.status = Some("No rendered diagram to save".to_string());
            return false;
        };
        match std::fs::write(path, svg) {
            Ok(()) => {
                log::info!("Diagram exported to {:?}", path);
                self.status = Some(format!("Diagram saved to {}", path.display()));
                true
            }
            Err(e) => {
                log::error!("Diagram export to {:?} failed: {}", path, e);
                self.status = Some(format!("Could not save diagram: {}", e));
                false
            }
        }
    }

    pub fn pan_diagram(&mut self, dx: f64, dy: f64) {
        if let Some(view) = self.diagram.view_mut() {
            view.pan_by(dx, dy);
        }
    }

    /// Esc: unfocus the diagram first, then close the panel.
    pub fn dismiss(&mut self) {
        if self.diagram_focused {
            self.diagram_focused = false;
        } else if self.panel.is_open() {
            self.panel.close();
        }
    }

    /// Terminal resized to `columns` cells.
    pub fn set_viewport_columns(&mut self, columns: u16) {
        self.panel
            .set_viewport_width(u32::from(columns).saturating_mul(self.config.cell_width_px()));
    }

    pub fn panel_columns(&self) -> u16 {
        let cols = self.panel.width() / self.config.cell_width_px();
        u16::try_from(cols).unwrap_or(u16::MAX)
    }
}
