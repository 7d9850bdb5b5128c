//! Pluggable sender classification.
//! A chain runs its stages in order; the first stage to decide a bubble
//! wins. The position classifier always closes the chain, so every bubble
//! ends up labelled.

use image::RgbImage;
use tracing::debug;

use super::color::ColorClassifier;
use super::position::PositionClassifier;
use super::{Label, MessageBubble};

/// One classification stage. Returns one entry per bubble; `None` means
/// "no decision, ask the next stage".
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn classify(&self, bubbles: &[MessageBubble], image: &RgbImage) -> Vec<Option<Label>>;
}

pub struct ClassifierChain {
    stages: Vec<Box<dyn Classifier>>,
    fallback: PositionClassifier,
}

impl ClassifierChain {
    pub fn new(stages: Vec<Box<dyn Classifier>>, fallback: PositionClassifier) -> Self {
        Self { stages, fallback }
    }

    /// Color evidence first, layout for whatever color could not decide.
    pub fn color_then_position() -> Self {
        Self::new(
            vec![Box::new(ColorClassifier::default())],
            PositionClassifier::default(),
        )
    }

    /// Layout only; the caller's declared side is the sole signal.
    pub fn position_only() -> Self {
        Self::new(Vec::new(), PositionClassifier::default())
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .map(|s| s.name())
            .chain(std::iter::once(self.fallback.name()))
            .collect()
    }

    pub fn classify(&self, bubbles: &[MessageBubble], image: &RgbImage) -> Vec<Label> {
        let mut labels: Vec<Option<Label>> = vec![None; bubbles.len()];

        for stage in &self.stages {
            if labels.iter().all(Option::is_some) {
                break;
            }
            let decided = stage.classify(bubbles, image);
            let mut taken = 0usize;
            for (slot, decision) in labels.iter_mut().zip(decided) {
                if slot.is_none() && decision.is_some() {
                    *slot = decision;
                    taken += 1;
                }
            }
            debug!(stage = stage.name(), decided = taken, "classifier_stage_done");
        }

        let positions = self.fallback.label_all(bubbles, image.width() as f64);
        labels
            .into_iter()
            .zip(positions)
            .map(|(label, position)| label.unwrap_or(position))
            .collect()
    }
}
