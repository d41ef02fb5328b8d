// src/panel.rs
//
// Right-anchored inspection panel for viewing a code block full-size.

pub const MIN_PANEL_WIDTH: u32 = 300;
pub const MAX_PANEL_RATIO: f64 = 0.8;
pub const DEFAULT_PANEL_WIDTH: u32 = 500;

/// One drag on the panel's left edge, alive from pointer-down to pointer-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeGesture {
    start_x: i32,
    start_width: u32,
}

impl ResizeGesture {
    /// Width implied by the pointer at `current_x`. Moving left grows the
    /// panel because it is anchored to the right edge.
    pub fn proposed_width(&self, current_x: i32) -> i64 {
        i64::from(self.start_width) - (i64::from(current_x) - i64::from(self.start_x))
    }
}

#[derive(Debug, Clone)]
pub struct InspectionPanel {
    is_open: bool,
    width: u32,
    title: String,
    content: String,
    language: String,
    viewport_width: u32,
    gesture: Option<ResizeGesture>,
}

impl InspectionPanel {
    pub fn new(initial_width: u32, viewport_width: u32) -> Self {
        let mut panel = InspectionPanel {
            is_open: false,
            width: initial_width,
            title: String::new(),
            content: String::new(),
            language: String::new(),
            viewport_width,
            gesture: None,
        };
        panel.width = panel.clamp(initial_width);
        panel
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn viewport_width(&self) -> u32 {
        self.viewport_width
    }

    pub fn is_resizing(&self) -> bool {
        self.gesture.is_some()
    }

    /// Largest allowed width. When the viewport is too narrow for the
    /// minimum, the minimum wins.
    pub fn max_width(&self) -> u32 {
        let max = (f64::from(self.viewport_width) * MAX_PANEL_RATIO).floor() as u32;
        max.max(MIN_PANEL_WIDTH)
    }

    fn clamp(&self, width: u32) -> u32 {
        width.clamp(MIN_PANEL_WIDTH, self.max_width())
    }

    /// Opens the panel on a snapshot of `content`. The width is kept from
    /// the previous session.
    pub fn open(&mut self, title: &str, content: &str, language: &str) {
        self.title = title.to_string();
        self.content = content.to_string();
        self.language = language.to_string();
        self.is_open = true;
        log::debug!("Inspection panel opened: '{}' ({} bytes)", title, content.len());
    }

    pub fn close(&mut self) {
        self.gesture = None;
        self.is_open = false;
        log::debug!("Inspection panel closed at width {}", self.width);
    }

    pub fn set_viewport_width(&mut self, viewport_width: u32) {
        self.viewport_width = viewport_width;
        self.width = self.clamp(self.width);
    }

    /// Pointer-down on the resize edge. Ignored while closed or while another
    /// drag is active.
    pub fn begin_resize(&mut self, pointer_x: i32) -> bool {
        if !self.is_open {
            return false;
        }
        if self.gesture.is_some() {
            log::warn!("Ignoring resize start at x={} while a drag is active", pointer_x);
            return false;
        }
        self.gesture = Some(ResizeGesture { start_x: pointer_x, start_width: self.width });
        true
    }

    /// Pointer-move during a drag. Commits the new width only when it is
    /// inside `[MIN_PANEL_WIDTH, MAX_PANEL_RATIO * viewport]`.
    pub fn drag_to(&mut self, pointer_x: i32) -> bool {
        let Some(gesture) = self.gesture else {
            return false;
        };
        let proposed = gesture.proposed_width(pointer_x);
        let in_range = proposed >= i64::from(MIN_PANEL_WIDTH)
            && (proposed as f64) <= f64::from(self.viewport_width) * MAX_PANEL_RATIO;
        if in_range {
            self.width = proposed as u32;
        }
        in_range
    }

    /// Pointer-up. Ends the drag and keeps the last committed width.
    pub fn end_resize(&mut self) {
        self.gesture = None;
    }

    /// Abandons the drag and restores the width it started from.
    pub fn cancel_resize(&mut self) {
        if let Some(gesture) = self.gesture.take() {
            self.width = gesture.start_width;
        }
    }
}

impl Default for InspectionPanel {
    fn default() -> Self {
        // 1280 px is a common laptop viewport
        Self::new(DEFAULT_PANEL_WIDTH, 1280)
    }
}
