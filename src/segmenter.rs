// src/segmenter.rs
//
// Splits finalized assistant text into prose, code and diagram segments.

pub const FENCE: &str = "```";
pub const DIAGRAM_TAG: &str = "mermaid";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Prose,
    Code,
    Diagram,
}

/// Opening line of a fenced block exactly as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenceHeader {
    pub raw: String,
    /// False when the fenced part had no newline at all.
    pub line_break: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Trimmed language tag for code blocks; empty for prose and diagrams.
    pub language: String,
    pub text: String,
    header: Option<FenceHeader>,
}

impl Segment {
    pub fn prose(text: &str) -> Self {
        Segment {
            kind: SegmentKind::Prose,
            language: String::new(),
            text: text.to_string(),
            header: None,
        }
    }

    pub fn header(&self) -> Option<&FenceHeader> {
        self.header.as_ref()
    }

    fn fenced(part: &str) -> Self {
        let (raw, text, line_break) = match part.split_once('\n') {
            Some((tag, rest)) => (tag, rest, true),
            None => (part, "", false),
        };
        let tag = raw.trim();
        let (kind, language) = if tag == DIAGRAM_TAG {
            (SegmentKind::Diagram, String::new())
        } else {
            (SegmentKind::Code, tag.to_string())
        };
        Segment {
            kind,
            language,
            text: text.to_string(),
            header: Some(FenceHeader { raw: raw.to_string(), line_break }),
        }
    }
}

/// Segments `content`. Parts outside fences are prose (empty ones included),
/// parts inside are code or diagram blocks. An unterminated fence becomes a
/// trailing block; this never fails.
pub fn segment(content: &str) -> Vec<Segment> {
    content
        .split(FENCE)
        .enumerate()
        .map(|(idx, part)| if idx % 2 == 0 { Segment::prose(part) } else { Segment::fenced(part) })
        .collect()
}

/// Inverse of [`segment`]: re-inserts fences and headers.
pub fn reconstruct(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (idx, seg) in segments.iter().enumerate() {
        if idx > 0 {
            out.push_str(FENCE);
        }
        if let Some(header) = &seg.header {
            out.push_str(&header.raw);
            if header.line_break {
                out.push('\n');
            }
        }
        out.push_str(&seg.text);
    }
    out
}

/// Fenced code blocks of a message, in order.
pub fn code_blocks(segments: &[Segment]) -> impl Iterator<Item = &Segment> {
    segments.iter().filter(|s| s.kind == SegmentKind::Code)
}

pub fn diagram_blocks(segments: &[Segment]) -> impl Iterator<Item = &Segment> {
    segments.iter().filter(|s| s.kind == SegmentKind::Diagram)
}
