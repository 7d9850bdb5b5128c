//! Labelled bubbles → transcript ordered top to bottom.

use super::speaker::SpeakerMapping;
use super::{ExtractedMessage, Label, MessageBubble, Transcript};

/// One bubble, one message. Stable by bubble top, so bubbles on the same
/// row keep their clustering order.
pub fn assemble(
    bubbles: &[MessageBubble],
    labels: &[Label],
    mapping: &SpeakerMapping,
) -> Transcript {
    let mut messages: Vec<ExtractedMessage> = bubbles
        .iter()
        .zip(labels)
        .map(|(bubble, &label)| ExtractedMessage {
            text: bubble.text.clone(),
            speaker: mapping.resolve(label).to_string(),
            y: bubble.top(),
        })
        .collect();
    messages.sort_by(|a, b| a.y.total_cmp(&b.y));
    Transcript { messages }
}
