// src/tui.rs
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame, Terminal,
};
use crossterm::event::{self, Event as CrosstermEvent, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use crate::app::App;
use crate::diagram::DiagramView;
use crate::segmenter::{self, SegmentKind};
use crate::session::{Message, Role};
use chrono::Local;
use std::io;
use std::path::Path;
use std::time::Duration;

const PAN_STEP: f64 = 20.0;
const DIAGRAM_EXPORT_FILE: &str = "codeai-diagram.svg";

pub struct Tui {
    terminal: Terminal<ratatui::backend::CrosstermBackend<io::Stdout>>,
    /// Width of the last drawn frame, in columns.
    last_width: u16,
}

impl Tui {
    pub fn new() -> io::Result<Self> {
        let stdout = io::stdout();
        let backend = ratatui::backend::CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        Ok(Self { terminal, last_width: 0 })
    }

    fn role_style(role: Role) -> (&'static str, Style) {
        match role {
            Role::User => ("You", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
            Role::Assistant => ("CodeAI", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
        }
    }

    /// Renders one finalized message from its segments.
    fn message_lines(message: &Message) -> Vec<Line<'static>> {
        let (label, style) = Self::role_style(message.role());
        let stamp = message.timestamp().with_timezone(&Local).format("%H:%M");
        let mut lines = vec![Line::from(vec![
            Span::styled(format!("{}:", label), style),
            Span::styled(format!(" {}", stamp), Style::default().fg(Color::DarkGray)),
        ])];
        for seg in segmenter::segment(message.content()) {
            match seg.kind {
                SegmentKind::Prose => {
                    lines.extend(seg.text.lines().map(|l| Line::from(l.to_string())));
                }
                SegmentKind::Code => {
                    let lang = if seg.language.is_empty() { "code" } else { seg.language.as_str() };
                    lines.push(Line::from(Span::styled(
                        format!("┌─ {} ─ Ctrl+O to view", lang),
                        Style::default().fg(Color::DarkGray),
                    )));
                    lines.extend(seg.text.lines().map(|l| {
                        Line::from(vec![
                            Span::styled("│ ", Style::default().fg(Color::DarkGray)),
                            Span::styled(l.to_string(), Style::default().fg(Color::Yellow)),
                        ])
                    }));
                }
                SegmentKind::Diagram => {
                    lines.push(Line::from(Span::styled(
                        format!("[diagram, {} lines] Ctrl+D to render", seg.text.lines().count()),
                        Style::default().fg(Color::Magenta),
                    )));
                }
            }
        }
        lines.push(Line::from(""));
        lines
    }

    fn draw_messages(f: &mut Frame, app: &App, area: Rect) {
        let mut lines: Vec<Line> = app
            .conversation
            .messages()
            .iter()
            .flat_map(Self::message_lines)
            .collect();
        if app.is_loading() {
            let (label, style) = Self::role_style(Role::Assistant);
            lines.push(Line::from(Span::styled(format!("{}:", label), style)));
            let preview = app.streaming_text();
            if preview.is_empty() {
                lines.push(Line::from(Span::styled("...", Style::default().fg(Color::DarkGray))));
            } else {
                lines.extend(preview.lines().map(|l| Line::from(l.to_string())));
            }
        }

        // keep the newest lines in view
        let visible = area.height.saturating_sub(2) as usize;
        let scroll = lines.len().saturating_sub(visible);
        let paragraph = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title(app.conversation.title.clone()))
            .wrap(Wrap { trim: false })
            .scroll((u16::try_from(scroll).unwrap_or(u16::MAX), 0));
        f.render_widget(paragraph, area);
    }

    fn draw_diagram(f: &mut Frame, app: &App, area: Rect) {
        let border = if app.diagram_focused { Color::Magenta } else { Color::DarkGray };
        let (title, body) = match &app.diagram {
            DiagramView::Empty { notice } => ("Diagram".to_string(), notice.clone().unwrap_or_default()),
            DiagramView::Loading { .. } => ("Diagram".to_string(), "Rendering...".to_string()),
            DiagramView::Ready { source, rendered, view } => {
                let (x, y) = view.offset();
                (
                    format!(
                        "Diagram {:.0}x{:.0} | zoom {:.2}x | offset ({:.0}, {:.0}) | +/- zoom, arrows pan, Ctrl+S save",
                        rendered.width,
                        rendered.height,
                        view.scale(),
                        x,
                        y
                    ),
                    source.clone(),
                )
            }
        };
        let paragraph = Paragraph::new(body)
            .block(Block::default().borders(Borders::ALL).title(title).border_style(Style::default().fg(border)))
            .wrap(Wrap { trim: false });
        f.render_widget(paragraph, area);
    }

    fn draw_panel(f: &mut Frame, app: &App, area: Rect) {
        f.render_widget(Clear, area);
        let border = if app.panel.is_resizing() { Color::Yellow } else { Color::Blue };
        let lines: Vec<Line> = app
            .panel
            .content()
            .lines()
            .enumerate()
            .map(|(i, l)| {
                Line::from(vec![
                    Span::styled(format!("{:>4} ", i + 1), Style::default().fg(Color::DarkGray)),
                    Span::raw(l.to_string()),
                ])
            })
            .collect();
        let title = format!("{} | {}px | Esc to close, drag edge to resize", app.panel.title(), app.panel.width());
        let paragraph = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title(title).border_style(Style::default().fg(border)));
        f.render_widget(paragraph, area);
    }

    fn draw(f: &mut Frame, app: &App) {
        let area = f.area();
        let (main_area, panel_area) = if app.panel.is_open() {
            let cols = app.panel_columns().min(area.width);
            let chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Min(0), Constraint::Length(cols)])
                .split(area);
            (chunks[0], Some(chunks[1]))
        } else {
            (area, None)
        };

        let show_diagram = app.diagram != DiagramView::default();
        let mut constraints = vec![Constraint::Min(3)];
        if show_diagram {
            constraints.push(Constraint::Percentage(35));
        }
        constraints.push(Constraint::Length(3));
        constraints.push(Constraint::Length(1));
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(main_area);

        Self::draw_messages(f, app, chunks[0]);
        let mut next = 1;
        if show_diagram {
            Self::draw_diagram(f, app, chunks[next]);
            next += 1;
        }

        let input_title = if app.is_loading() { "Input (waiting for reply, Esc to cancel)" } else { "Input" };
        let input = Paragraph::new(app.input.as_str())
            .style(Style::default().fg(Color::White))
            .block(Block::default().borders(Borders::ALL).title(input_title));
        f.render_widget(input, chunks[next]);

        let status = app.status().map(str::to_string).unwrap_or_else(|| {
            format!(
                "[{}] Enter send | Ctrl+O code | Ctrl+D diagram | Ctrl+G repo diagram | Ctrl+C quit",
                app.endpoint_name()
            )
        });
        f.render_widget(
            Paragraph::new(status).style(Style::default().fg(Color::DarkGray)),
            chunks[next + 1],
        );

        if let Some(panel_area) = panel_area {
            Self::draw_panel(f, app, panel_area);
        }
    }

    /// Returns false when the app should exit.
    fn handle_key(app: &mut App, key: KeyEvent) -> bool {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => {
                log::info!("Ctrl+C pressed, exiting TUI loop.");
                app.cancel_turn();
                return false;
            }
            KeyCode::Char('o') if ctrl => {
                app.open_latest_code_block();
            }
            KeyCode::Char('d') if ctrl => {
                app.show_latest_diagram();
            }
            KeyCode::Char('s') if ctrl => {
                app.export_diagram(Path::new(DIAGRAM_EXPORT_FILE));
            }
            KeyCode::Char('g') if ctrl => {
                let repo = app.input.clone();
                if app.fetch_repo_diagram(&repo).is_ok() {
                    app.input.clear();
                }
            }
            KeyCode::Esc => {
                if app.panel.is_resizing() {
                    app.panel.cancel_resize();
                } else if app.diagram_focused || app.panel.is_open() {
                    app.dismiss();
                } else if app.is_loading() {
                    app.cancel_turn();
                }
            }
            KeyCode::Char('+') | KeyCode::Char('=') if app.diagram_focused => app.zoom_diagram(true),
            KeyCode::Char('-') if app.diagram_focused => app.zoom_diagram(false),
            KeyCode::Left if app.diagram_focused => app.pan_diagram(PAN_STEP, 0.0),
            KeyCode::Right if app.diagram_focused => app.pan_diagram(-PAN_STEP, 0.0),
            KeyCode::Up if app.diagram_focused => app.pan_diagram(0.0, PAN_STEP),
            KeyCode::Down if app.diagram_focused => app.pan_diagram(0.0, -PAN_STEP),
            KeyCode::Enter => {
                app.submit_input();
            }
            KeyCode::Backspace => {
                app.input.pop();
            }
            KeyCode::Char(c) if !ctrl => app.input.push(c),
            _ => {}
        }
        true
    }

    /// Maps a drag on the panel's left border onto the resize gesture. Cell
    /// columns are converted to pixels so bounds stay in one unit.
    fn handle_mouse(app: &mut App, mouse: MouseEvent, frame_width: u16) {
        if !app.panel.is_open() {
            return;
        }
        let cell_px = i32::try_from(app.config.cell_width_px()).unwrap_or(i32::MAX);
        let x_px = i32::from(mouse.column).saturating_mul(cell_px);
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                let edge = frame_width.saturating_sub(app.panel_columns().min(frame_width));
                if mouse.column.abs_diff(edge) <= 1 {
                    app.panel.begin_resize(x_px);
                }
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                app.panel.drag_to(x_px);
            }
            MouseEventKind::Up(MouseButton::Left) => app.panel.end_resize(),
            _ => {}
        }
    }

    async fn event_loop(&mut self, app: &mut App) -> io::Result<()> {
        let size = self.terminal.size()?;
        self.last_width = size.width;
        app.set_viewport_columns(size.width);

        loop {
            app.poll_events();
            self.terminal.draw(|f| Self::draw(f, app))?;

            if crossterm::event::poll(Duration::from_millis(50))? {
                match event::read()? {
                    CrosstermEvent::Key(key) if key.kind == event::KeyEventKind::Press => {
                        if !Self::handle_key(app, key) {
                            break;
                        }
                    }
                    CrosstermEvent::Mouse(mouse) => Self::handle_mouse(app, mouse, self.last_width),
                    CrosstermEvent::Resize(cols, _) => {
                        self.last_width = cols;
                        app.set_viewport_columns(cols);
                    }
                    _ => {}
                }
            }
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    pub async fn run_loop(&mut self, app: &mut App) -> io::Result<()> {
        crossterm::terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen, crossterm::event::EnableMouseCapture)?;
        log::info!("TUI run loop started.");

        let result = self.event_loop(app).await;

        crossterm::terminal::disable_raw_mode()?;
        crossterm::execute!(self.terminal.backend_mut(), crossterm::terminal::LeaveAlternateScreen, crossterm::event::DisableMouseCapture)?;
        self.terminal.show_cursor()?;
        result
    }
}
