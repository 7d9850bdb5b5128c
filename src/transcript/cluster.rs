//! Greedy single-pass grouping of content lines into message bubbles.

use super::{ContentLine, MessageBubble};

#[derive(Debug, Clone)]
pub struct BubbleClusterer {
    /// A line joins a bubble when `|line.y - bubble.bottom|` is below this.
    pub vertical_threshold: f64,
    /// ...and `|line.x - bubble.centroid_x|` is below this.
    pub horizontal_threshold: f64,
}

impl Default for BubbleClusterer {
    fn default() -> Self {
        Self {
            vertical_threshold: 25.0,
            horizontal_threshold: 100.0,
        }
    }
}

impl BubbleClusterer {
    /// Lines are consumed in reading order. Each one joins the candidate
    /// bubble with the smallest vertical gap, or opens a new bubble.
    pub fn cluster(&self, lines: Vec<ContentLine>) -> Vec<MessageBubble> {
        let mut bubbles: Vec<MessageBubble> = Vec::new();

        for line in lines {
            let best = bubbles
                .iter()
                .enumerate()
                .filter_map(|(i, bubble)| {
                    let gap = line.y - bubble.bottom();
                    let aligned = (line.x - bubble.centroid_x).abs() < self.horizontal_threshold;
                    (gap.abs() < self.vertical_threshold && aligned).then_some((i, gap.abs()))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i);

            match best {
                Some(i) => bubbles[i].push(line),
                None => bubbles.push(MessageBubble::from_line(line)),
            }
        }

        bubbles
    }
}
