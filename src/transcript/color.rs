//! Color-region classifier.
//! Scans the screenshot in square windows, buckets pixels into sent-green,
//! received-dark and received-light, and looks each bubble up in the
//! resulting region map. CPU-bound: call from the blocking pool.

use image::RgbImage;
use serde::Serialize;
use tracing::debug;

use super::classify::Classifier;
use super::{ColorClass, Label, MessageBubble};

/// Calibration parameters for pixel bucketing and window classification.
#[derive(Debug, Clone)]
pub struct ColorThresholds {
    pub window: u32,
    /// Sent pixel: `g > r + margin && g > b + margin / 2`.
    pub green_margin: i32,
    pub dark_floor: u8,
    pub dark_ceiling: u8,
    pub light_floor: u8,
    pub light_max_spread: u8,
    pub sent_ratio: f64,
    pub received_ratio: f64,
    /// Max distance from a bubble's centre to a region centre.
    pub search_radius: f64,
}

impl Default for ColorThresholds {
    fn default() -> Self {
        Self {
            window: 24,
            green_margin: 20,
            dark_floor: 25,
            dark_ceiling: 80,
            light_floor: 200,
            light_max_spread: 20,
            sent_ratio: 0.20,
            received_ratio: 0.30,
            search_radius: 60.0,
        }
    }
}

/// A window whose pixels carry sender evidence.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// `Sent` or `Received`, never `Unknown`.
    pub class: ColorClass,
    pub sent_ratio: f64,
    pub received_ratio: f64,
}

impl ColorRegion {
    pub fn is_sent_color(&self) -> bool {
        self.class == ColorClass::Sent
    }

    fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x as f64
            && px < (self.x + self.width) as f64
            && py >= self.y as f64
            && py < (self.y + self.height) as f64
    }

    fn distance_to(&self, px: f64, py: f64) -> f64 {
        let cx = self.x as f64 + self.width as f64 / 2.0;
        let cy = self.y as f64 + self.height as f64 / 2.0;
        ((cx - px).powi(2) + (cy - py).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelBucket {
    Sent,
    ReceivedDark,
    ReceivedLight,
    Other,
}

#[derive(Debug, Clone, Default)]
pub struct ColorClassifier {
    pub thresholds: ColorThresholds,
}

impl ColorClassifier {
    pub fn new(thresholds: ColorThresholds) -> Self {
        Self { thresholds }
    }

    fn bucket(&self, [r, g, b]: [u8; 3]) -> PixelBucket {
        let t = &self.thresholds;
        let (ri, gi, bi) = (r as i32, g as i32, b as i32);
        if gi > ri + t.green_margin && gi > bi + t.green_margin / 2 {
            return PixelBucket::Sent;
        }
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        if (t.dark_floor..=t.dark_ceiling).contains(&max) {
            PixelBucket::ReceivedDark
        } else if min >= t.light_floor && max - min <= t.light_max_spread {
            PixelBucket::ReceivedLight
        } else {
            PixelBucket::Other
        }
    }

    /// Classify every window of the grid; only Sent/Received windows are kept.
    pub fn detect_regions(&self, image: &RgbImage) -> Vec<ColorRegion> {
        let t = &self.thresholds;
        let window = t.window.max(1);
        let (width, height) = image.dimensions();
        let mut regions = Vec::new();

        for wy in (0..height).step_by(window as usize) {
            for wx in (0..width).step_by(window as usize) {
                let w = window.min(width - wx);
                let h = window.min(height - wy);
                let (mut sent, mut dark, mut light) = (0u32, 0u32, 0u32);
                for y in wy..wy + h {
                    for x in wx..wx + w {
                        match self.bucket(image.get_pixel(x, y).0) {
                            PixelBucket::Sent => sent += 1,
                            PixelBucket::ReceivedDark => dark += 1,
                            PixelBucket::ReceivedLight => light += 1,
                            PixelBucket::Other => {}
                        }
                    }
                }
                let total = (w * h) as f64;
                let sent_ratio = sent as f64 / total;
                let received_ratio = dark.max(light) as f64 / total;
                let class = if sent_ratio >= t.sent_ratio {
                    ColorClass::Sent
                } else if received_ratio >= t.received_ratio {
                    ColorClass::Received
                } else {
                    continue;
                };
                regions.push(ColorRegion {
                    x: wx,
                    y: wy,
                    width: w,
                    height: h,
                    class,
                    sent_ratio,
                    received_ratio,
                });
            }
        }
        regions
    }

    /// Containing region wins, then the nearest region within the search radius.
    pub fn class_at(&self, regions: &[ColorRegion], px: f64, py: f64) -> ColorClass {
        if let Some(region) = regions.iter().find(|r| r.contains(px, py)) {
            return region.class;
        }
        regions
            .iter()
            .map(|r| (r, r.distance_to(px, py)))
            .filter(|(_, d)| *d <= self.thresholds.search_radius)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(r, _)| r.class)
            .unwrap_or(ColorClass::Unknown)
    }

    /// Per-bubble color class. All `Unknown` unless at least one bubble sits
    /// on sent-colored pixels.
    pub fn classify_bubbles(&self, bubbles: &[MessageBubble], image: &RgbImage) -> Vec<ColorClass> {
        let regions = self.detect_regions(image);
        let classes: Vec<ColorClass> = bubbles
            .iter()
            .map(|bubble| {
                let (cx, cy) = bubble.bounds.center();
                self.class_at(&regions, cx, cy)
            })
            .collect();

        if !classes.contains(&ColorClass::Sent) {
            debug!(regions = regions.len(), "no_sent_color_evidence");
            return vec![ColorClass::Unknown; bubbles.len()];
        }
        classes
    }
}

impl Classifier for ColorClassifier {
    fn name(&self) -> &'static str {
        "color"
    }

    fn classify(&self, bubbles: &[MessageBubble], image: &RgbImage) -> Vec<Option<Label>> {
        self.classify_bubbles(bubbles, image)
            .into_iter()
            .map(|class| match class {
                ColorClass::Sent => Some(Label::Sent),
                ColorClass::Received => Some(Label::Received),
                ColorClass::Unknown => None,
            })
            .collect()
    }
}
