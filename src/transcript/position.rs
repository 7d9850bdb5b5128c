//! Layout classifier: splits bubbles into a left and a right column.

use image::RgbImage;

use super::classify::Classifier;
use super::{Label, MessageBubble};

#[derive(Debug, Clone)]
pub struct PositionClassifier {
    /// Gaps narrower than this fraction of the image width are not
    /// treated as a column split.
    pub min_split_gap_ratio: f64,
}

impl Default for PositionClassifier {
    fn default() -> Self {
        Self {
            min_split_gap_ratio: 0.08,
        }
    }
}

impl PositionClassifier {
    /// Midpoint of the largest gap between sorted x-centroids, or the image
    /// midpoint when there is no convincing gap.
    pub fn split_point(&self, centroids: &[f64], image_width: f64) -> f64 {
        let midpoint = image_width / 2.0;
        if centroids.len() < 2 {
            return midpoint;
        }
        let mut xs = centroids.to_vec();
        xs.sort_by(f64::total_cmp);

        let (gap, split) = xs
            .windows(2)
            .map(|w| (w[1] - w[0], (w[0] + w[1]) / 2.0))
            .fold((0.0, midpoint), |best, cur| if cur.0 > best.0 { cur } else { best });

        if gap < image_width * self.min_split_gap_ratio {
            midpoint
        } else {
            split
        }
    }

    pub fn label_all(&self, bubbles: &[MessageBubble], image_width: f64) -> Vec<Label> {
        let centroids: Vec<f64> = bubbles.iter().map(|b| b.centroid_x).collect();
        let split = self.split_point(&centroids, image_width);
        centroids
            .iter()
            .map(|&x| if x < split { Label::Left } else { Label::Right })
            .collect()
    }
}

impl Classifier for PositionClassifier {
    fn name(&self) -> &'static str {
        "position"
    }

    fn classify(&self, bubbles: &[MessageBubble], image: &RgbImage) -> Vec<Option<Label>> {
        self.label_all(bubbles, image.width() as f64)
            .into_iter()
            .map(Some)
            .collect()
    }
}
