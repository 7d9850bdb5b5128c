//! Maps classifier labels onto the caller's participant names.

use serde::Deserialize;

use super::Label;

/// Which side (or color) the caller's own messages appear on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MySide {
    Left,
    #[default]
    Right,
    Green,
}

impl std::str::FromStr for MySide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LEFT" => Ok(MySide::Left),
            "RIGHT" => Ok(MySide::Right),
            "GREEN" => Ok(MySide::Green),
            other => Err(format!("messageSide must be LEFT, RIGHT or GREEN, got {other:?}")),
        }
    }
}

/// Supplied once per request, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerMapping {
    pub me_name: String,
    pub them_name: String,
    pub my_side: MySide,
}

impl Default for SpeakerMapping {
    fn default() -> Self {
        Self {
            me_name: "Me".into(),
            them_name: "Them".into(),
            my_side: MySide::Right,
        }
    }
}

impl SpeakerMapping {
    pub fn is_me(&self, label: Label) -> bool {
        match label {
            Label::Sent => true,
            Label::Received => false,
            Label::Left => self.my_side == MySide::Left,
            // Green without color evidence falls back to the outgoing column.
            Label::Right => matches!(self.my_side, MySide::Right | MySide::Green),
        }
    }

    pub fn resolve(&self, label: Label) -> &str {
        if self.is_me(label) {
            &self.me_name
        } else {
            &self.them_name
        }
    }
}
