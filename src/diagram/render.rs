// src/diagram/render.rs
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use super::{generate, C4Model, DiagramSource};
use crate::error::RenderError;

pub const MIN_ZOOM: f64 = 0.1;
pub const MAX_ZOOM: f64 = 20.0;
const ZOOM_STEP: f64 = 1.2;

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDiagram {
    pub svg: String,
    pub width: f64,
    pub height: f64,
}

impl RenderedDiagram {
    pub fn new(svg: String) -> Self {
        let (width, height) = svg_dimensions(&svg).unwrap_or((0.0, 0.0));
        Self { svg, width, height }
    }

    /// Wraps the render in an outer document that applies `view`. The
    /// rendered SVG itself is embedded unchanged.
    pub fn with_view(&self, view: &PanZoom) -> String {
        format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\"><g transform=\"{t}\">{svg}</g></svg>",
            w = self.width,
            h = self.height,
            t = view.transform(),
            svg = self.svg,
        )
    }
}

fn dimension_regexes() -> &'static (Regex, Regex, Regex) {
    static RE: OnceLock<(Regex, Regex, Regex)> = OnceLock::new();
    RE.get_or_init(|| {
        (
            Regex::new(r#"viewBox="\s*[-\d.]+[\s,]+[-\d.]+[\s,]+([\d.]+)[\s,]+([\d.]+)\s*""#).expect("valid regex"),
            Regex::new(r#"<svg[^>]*\swidth="([\d.]+)(?:px)?""#).expect("valid regex"),
            Regex::new(r#"<svg[^>]*\sheight="([\d.]+)(?:px)?""#).expect("valid regex"),
        )
    })
}

/// Reads the size of an SVG document from its viewBox, falling back to the
/// width/height attributes.
pub fn svg_dimensions(svg: &str) -> Option<(f64, f64)> {
    let (view_box, width, height) = dimension_regexes();
    if let Some(caps) = view_box.captures(svg) {
        let w = caps[1].parse().ok()?;
        let h = caps[2].parse().ok()?;
        return Some((w, h));
    }
    let w = width.captures(svg)?[1].parse().ok()?;
    let h = height.captures(svg)?[1].parse().ok()?;
    Some((w, h))
}

#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    async fn render(&self, source: &str) -> Result<RenderedDiagram, RenderError>;
}

/// Renders Mermaid source to SVG natively on a blocking worker.
#[derive(Debug, Default)]
pub struct MermaidRenderer;

#[async_trait]
impl DiagramRenderer for MermaidRenderer {
    async fn render(&self, source: &str) -> Result<RenderedDiagram, RenderError> {
        if source.trim().is_empty() {
            return Err(RenderError::EmptySource);
        }
        let source = source.to_string();
        let svg = tokio::task::spawn_blocking(move || {
            let opts = mermaid_rs_renderer::RenderOptions {
                theme: mermaid_rs_renderer::Theme::modern(),
                layout: mermaid_rs_renderer::LayoutConfig::default(),
            };
            mermaid_rs_renderer::render_with_options(&source, opts).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| RenderError::Unavailable(e.to_string()))?
        .map_err(RenderError::Renderer)?;

        log::debug!("Mermaid SVG generated ({} bytes)", svg.len());
        Ok(RenderedDiagram::new(svg))
    }
}

/// Pan and zoom over a rendered diagram. Scale stays within
/// [`MIN_ZOOM`, `MAX_ZOOM`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanZoom {
    scale: f64,
    x: f64,
    y: f64,
}

impl Default for PanZoom {
    fn default() -> Self {
        Self { scale: 1.0, x: 0.0, y: 0.0 }
    }
}

impl PanZoom {
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn offset(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// Scales by `factor` keeping the point (`focus_x`, `focus_y`) fixed on
    /// screen.
    pub fn zoom_at(&mut self, factor: f64, focus_x: f64, focus_y: f64) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let new_scale = (self.scale * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        let ratio = new_scale / self.scale;
        self.x = focus_x - (focus_x - self.x) * ratio;
        self.y = focus_y - (focus_y - self.y) * ratio;
        self.scale = new_scale;
    }

    pub fn zoom_in(&mut self, focus_x: f64, focus_y: f64) {
        self.zoom_at(ZOOM_STEP, focus_x, focus_y);
    }

    pub fn zoom_out(&mut self, focus_x: f64, focus_y: f64) {
        self.zoom_at(1.0 / ZOOM_STEP, focus_x, focus_y);
    }

    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        self.x += dx;
        self.y += dy;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn transform(&self) -> String {
        format!("translate({} {}) scale({})", self.x, self.y, self.scale)
    }
}

/// What the diagram area currently shows.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagramView {
    /// Nothing to show. `notice` carries the reason after a failed render.
    Empty { notice: Option<String> },
    Loading { source: String },
    Ready {
        source: String,
        rendered: RenderedDiagram,
        view: PanZoom,
    },
}

impl Default for DiagramView {
    fn default() -> Self {
        DiagramView::Empty { notice: None }
    }
}

impl DiagramView {
    pub fn begin(&mut self, source: &str) {
        *self = DiagramView::Loading { source: source.to_string() };
    }

    /// Applies a finished render. Results are taken in the order they
    /// resolve, so the last one to arrive is what stays on screen.
    pub fn apply(&mut self, source: String, result: Result<RenderedDiagram, RenderError>) {
        *self = match result {
            Ok(rendered) => DiagramView::Ready { source, rendered, view: PanZoom::default() },
            Err(e) => {
                log::error!("Diagram render failed: {}", e);
                DiagramView::Empty { notice: Some(format!("Diagram could not be rendered: {}", e)) }
            }
        };
    }

    /// One zoom step about the centre of the render. False unless ready.
    pub fn zoom_step(&mut self, zoom_in: bool) -> bool {
        let DiagramView::Ready { rendered, view, .. } = self else {
            return false;
        };
        let (cx, cy) = (rendered.width / 2.0, rendered.height / 2.0);
        if zoom_in {
            view.zoom_in(cx, cy);
        } else {
            view.zoom_out(cx, cy);
        }
        true
    }

    /// SVG document of the ready render with the current pan and zoom.
    pub fn export_svg(&self) -> Option<String> {
        match self {
            DiagramView::Ready { rendered, view, .. } => Some(rendered.with_view(view)),
            _ => None,
        }
    }

    pub fn view_mut(&mut self) -> Option<&mut PanZoom> {
        match self {
            DiagramView::Ready { view, .. } => Some(view),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, DiagramView::Loading { .. })
    }
}

/// Model-to-render pipeline over an injected renderer.
#[derive(Clone)]
pub struct DiagramPipeline {
    renderer: Arc<dyn DiagramRenderer>,
}

impl DiagramPipeline {
    pub fn new(renderer: Arc<dyn DiagramRenderer>) -> Self {
        Self { renderer }
    }

    pub async fn render_source(&self, source: &str) -> Result<RenderedDiagram, RenderError> {
        self.renderer.render(source).await
    }

    pub async fn render_model(&self, model: &C4Model) -> (DiagramSource, Result<RenderedDiagram, RenderError>) {
        let source = generate(model);
        log::info!(
            "Generated diagram source: {} containers, {} components, {} relationships",
            model.containers.len(),
            model.components.len(),
            model.relationships.len()
        );
        let result = self.renderer.render(&source.text).await;
        (source, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSvg;

    #[async_trait]
    impl DiagramRenderer for FixedSvg {
        async fn render(&self, source: &str) -> Result<RenderedDiagram, RenderError> {
            if source.contains("broken") {
                return Err(RenderError::Renderer("parse error".to_string()));
            }
            Ok(RenderedDiagram::new(
                r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 120 80"><g/></svg>"#.to_string(),
            ))
        }
    }

    #[test]
    fn zoom_is_clamped() {
        let mut pz = PanZoom::default();
        for _ in 0..100 {
            pz.zoom_in(0.0, 0.0);
        }
        assert_eq!(pz.scale(), MAX_ZOOM);
        for _ in 0..200 {
            pz.zoom_out(0.0, 0.0);
        }
        assert_eq!(pz.scale(), MIN_ZOOM);
        pz.zoom_at(0.0, 1.0, 1.0);
        pz.zoom_at(f64::NAN, 1.0, 1.0);
        assert_eq!(pz.scale(), MIN_ZOOM);
    }

    #[test]
    fn zoom_keeps_focus_point_fixed() {
        let mut pz = PanZoom::default();
        pz.zoom_at(2.0, 50.0, 40.0);
        // the diagram point under the focus before zooming is still there
        let (x, y) = pz.offset();
        assert_eq!((50.0 - x) / pz.scale(), 50.0);
        assert_eq!((40.0 - y) / pz.scale(), 40.0);
        pz.pan_by(5.0, -5.0);
        assert_eq!(pz.transform(), "translate(-45 -45) scale(2)");
        pz.reset();
        assert_eq!(pz, PanZoom::default());
    }

    #[test]
    fn dimensions_from_viewbox_or_attributes() {
        assert_eq!(svg_dimensions(r#"<svg viewBox="0 0 300.5 200">"#), Some((300.5, 200.0)));
        assert_eq!(svg_dimensions(r#"<svg width="64px" height="32">"#), Some((64.0, 32.0)));
        assert_eq!(svg_dimensions("<svg>"), None);
    }

    #[test]
    fn view_wrapping_leaves_render_untouched() {
        let rendered = RenderedDiagram::new(r#"<svg viewBox="0 0 10 10"><rect/></svg>"#.to_string());
        let mut pz = PanZoom::default();
        pz.zoom_in(0.0, 0.0);
        let doc = rendered.with_view(&pz);
        assert!(doc.contains(&rendered.svg));
        assert!(doc.contains("scale(1.2)"));
    }

    #[tokio::test]
    async fn failed_render_degrades_to_empty_notice() {
        let pipeline = DiagramPipeline::new(Arc::new(FixedSvg));
        let mut view = DiagramView::default();
        view.begin("graph LR\n broken");
        assert!(view.is_loading());
        let result = pipeline.render_source("graph LR\n broken").await;
        view.apply("graph LR\n broken".to_string(), result);
        assert!(matches!(view, DiagramView::Empty { notice: Some(_) }));
        assert!(view.view_mut().is_none());
    }

    #[tokio::test]
    async fn last_resolved_render_wins() {
        let pipeline = DiagramPipeline::new(Arc::new(FixedSvg));
        let mut view = DiagramView::default();
        view.begin("first");
        view.begin("second");
        let second = pipeline.render_source("second").await;
        let first = pipeline.render_source("first").await;
        view.apply("second".to_string(), second);
        view.apply("first".to_string(), first);
        match view {
            DiagramView::Ready { ref source, ref rendered, .. } => {
                assert_eq!(source, "first");
                assert_eq!(rendered.width, 120.0);
            }
            other => panic!("unexpected view {:?}", other),
        }
    }

    #[tokio::test]
    async fn keyboard_zoom_is_centred_and_exported() {
        let pipeline = DiagramPipeline::new(Arc::new(FixedSvg));
        let mut view = DiagramView::default();
        assert!(!view.zoom_step(true));
        assert_eq!(view.export_svg(), None);

        let result = pipeline.render_source("graph LR").await;
        view.apply("graph LR".to_string(), result);
        assert!(view.zoom_step(true));
        let doc = view.export_svg().unwrap();
        // 120x80 render: the centre (60, 40) stays put under a 1.2x zoom
        assert!(doc.contains("transform=\"translate(-12 -8) scale(1.2)\""), "{}", doc);
        assert!(doc.contains("viewBox=\"0 0 120 80\""));

        assert!(view.zoom_step(false));
        let scale = view.view_mut().map(|v| v.scale()).unwrap();
        assert!((scale - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn render_model_generates_then_renders() {
        let pipeline = DiagramPipeline::new(Arc::new(FixedSvg));
        let model: C4Model = serde_json::from_str(r#"{"containers":[{"id":"a.rs","name":"a"}]}"#).unwrap();
        let (source, result) = pipeline.render_model(&model).await;
        assert!(source.text.contains("a_rs[\"a\"]"));
        assert!(result.is_ok());
    }
}
