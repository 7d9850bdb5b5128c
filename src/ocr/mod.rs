//! OCR provider abstraction.
//! The pipeline depends only on `OcrProvider`; `azure` implements it against
//! the Computer Vision Read API, tests substitute scripted providers.

pub mod azure;
pub mod cache;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

pub use azure::AzureReadClient;
pub use cache::OcrResultCache;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Quadrilateral reported by the provider, clockwise from top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingPolygon(pub [Point; 4]);

impl BoundingPolygon {
    /// Build from the provider's flat `[x1, y1, ..., x4, y4]` layout.
    pub fn from_flat(coords: &[f64]) -> Option<Self> {
        if coords.len() != 8 {
            return None;
        }
        let p = |i: usize| Point { x: coords[2 * i], y: coords[2 * i + 1] };
        Some(Self([p(0), p(1), p(2), p(3)]))
    }

    /// Axis-aligned rectangle `(x, y, width, height)`.
    pub fn from_rect(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self([
            Point { x, y },
            Point { x: x + width, y },
            Point { x: x + width, y: y + height },
            Point { x, y: y + height },
        ])
    }

    pub fn left(&self) -> f64 {
        self.0.iter().map(|p| p.x).fold(f64::INFINITY, f64::min)
    }

    pub fn top(&self) -> f64 {
        self.0.iter().map(|p| p.y).fold(f64::INFINITY, f64::min)
    }

    pub fn right(&self) -> f64 {
        self.0.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn bottom(&self) -> f64 {
        self.0.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max)
    }
}

/// One recognized line of text, as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTextLine {
    pub text: String,
    pub polygon: BoundingPolygon,
}

impl RawTextLine {
    pub fn new(text: impl Into<String>, polygon: BoundingPolygon) -> Self {
        Self {
            text: text.into(),
            polygon,
        }
    }
}

/// A text recognition backend that turns image bytes into positioned lines.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Recognize text lines. Must return promptly with `Cancelled` once
    /// `cancel` fires.
    async fn recognize(
        &self,
        image: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<RawTextLine>, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_from_flat_bounds() {
        let poly = BoundingPolygon::from_flat(&[12.0, 40.0, 220.0, 42.0, 219.0, 70.0, 11.0, 68.0])
            .unwrap();
        assert_eq!(poly.left(), 11.0);
        assert_eq!(poly.top(), 40.0);
        assert_eq!(poly.right(), 220.0);
        assert_eq!(poly.bottom(), 70.0);
    }

    #[test]
    fn polygon_rejects_wrong_arity() {
        assert!(BoundingPolygon::from_flat(&[1.0, 2.0, 3.0]).is_none());
    }
}
