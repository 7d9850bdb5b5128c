//! From recognized lines to an ordered, speaker-attributed transcript.
//! noise → cluster → classify (color / position chain) → speaker → assemble.

pub mod assemble;
pub mod classify;
pub mod cluster;
pub mod color;
pub mod noise;
pub mod position;
pub mod speaker;

use serde::Serialize;

use crate::ocr::RawTextLine;

pub use assemble::assemble;
pub use classify::{Classifier, ClassifierChain};
pub use cluster::BubbleClusterer;
pub use color::{ColorClassifier, ColorRegion, ColorThresholds};
pub use noise::{NoiseFilter, NoiseReason};
pub use position::PositionClassifier;
pub use speaker::{MySide, SpeakerMapping};

/// A recognized line that survived noise filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentLine {
    /// Trimmed text.
    pub text: String,
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ContentLine {
    pub fn from_raw(raw: &RawTextLine) -> Self {
        let poly = &raw.polygon;
        Self {
            text: raw.text.trim().to_string(),
            x: poly.left(),
            y: poly.top(),
            width: poly.right() - poly.left(),
            height: poly.bottom() - poly.top(),
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// Axis-aligned bounds in image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Bounds {
    pub fn of_line(line: &ContentLine) -> Self {
        Self {
            left: line.x,
            top: line.y,
            right: line.right(),
            bottom: line.bottom(),
        }
    }

    pub fn union(self, other: Bounds) -> Self {
        Self {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorClass {
    Sent,
    Received,
    Unknown,
}

/// Lines grouped into one chat bubble.
#[derive(Debug, Clone)]
pub struct MessageBubble {
    pub lines: Vec<ContentLine>,
    /// Constituent texts joined with a single space.
    pub text: String,
    /// Mean of the constituent lines' `x`.
    pub centroid_x: f64,
    /// Mean of the constituent lines' `y`.
    pub centroid_y: f64,
    pub bounds: Bounds,
    pub color_class: ColorClass,
}

impl MessageBubble {
    pub fn from_line(line: ContentLine) -> Self {
        Self {
            text: line.text.clone(),
            centroid_x: line.x,
            centroid_y: line.y,
            bounds: Bounds::of_line(&line),
            lines: vec![line],
            color_class: ColorClass::Unknown,
        }
    }

    pub fn push(&mut self, line: ContentLine) {
        let n = self.lines.len() as f64;
        self.centroid_x = (self.centroid_x * n + line.x) / (n + 1.0);
        self.centroid_y = (self.centroid_y * n + line.y) / (n + 1.0);
        self.bounds = self.bounds.union(Bounds::of_line(&line));
        self.text.push(' ');
        self.text.push_str(&line.text);
        self.lines.push(line);
    }

    pub fn top(&self) -> f64 {
        self.bounds.top
    }

    pub fn bottom(&self) -> f64 {
        self.bounds.bottom
    }
}

/// Sender decision for one bubble. `Sent`/`Received` come from color
/// evidence, `Left`/`Right` from layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Sent,
    Received,
    Left,
    Right,
}

impl Label {
    pub fn is_color(self) -> bool {
        matches!(self, Label::Sent | Label::Received)
    }

    pub fn color_class(self) -> ColorClass {
        match self {
            Label::Sent => ColorClass::Sent,
            Label::Received => ColorClass::Received,
            Label::Left | Label::Right => ColorClass::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedMessage {
    pub text: String,
    pub speaker: String,
    /// Ordering key (bubble top edge).
    #[serde(skip_serializing)]
    pub y: f64,
}

/// Messages ordered top to bottom.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Transcript {
    pub messages: Vec<ExtractedMessage>,
}

impl Transcript {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// `"Speaker: text"` lines, the shape handed to downstream analysis.
    pub fn to_conversation_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.speaker, m.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
