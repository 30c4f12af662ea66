//! Model router: picks a backend tier from request metadata.
//!
//! Routing is a pure function of [`RouteRequest`]. The metadata is gathered
//! from the inbound text before any backend call is made, and the router
//! never asks a model which model to use.

use seedkeeper_core::ModelChoice;
use std::collections::HashMap;

const DEPTH_CUES: &[&str] = &[
    "how",
    "why",
    "what if",
    "help me",
    "i feel",
    "i am",
    "i'm",
    "tell me about",
];

/// Everything the router is allowed to look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteRequest {
    /// Lowercased command name, `None` for free-form conversation
    pub command: Option<String>,
    pub word_count: usize,
    pub has_question: bool,
    /// Phrases that usually ask for reflection ("why", "i feel", ...)
    pub has_depth_cue: bool,
    pub is_dm: bool,
}

impl RouteRequest {
    /// Derive routing metadata from message text.
    pub fn from_text(command: Option<&str>, text: &str, is_dm: bool) -> Self {
        let lower = text.to_lowercase();
        Self {
            command: command.map(str::to_lowercase),
            word_count: text.split_whitespace().count(),
            has_question: text.contains('?'),
            has_depth_cue: DEPTH_CUES.iter().any(|cue| lower.contains(cue)),
            is_dm,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelRouter {
    overrides: HashMap<String, ModelChoice>,
    simple: Vec<String>,
    complex: Vec<String>,
    /// Messages shorter than this are economical unless they ask something
    short_words: usize,
    /// DMs longer than this go deep
    dm_deep_words: usize,
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            simple: ["hello", "hi", "seeds", "garden", "tend", "seasons", "about", "help"]
                .map(String::from)
                .to_vec(),
            complex: ["catchup", "admin"].map(String::from).to_vec(),
            short_words: 10,
            dm_deep_words: 15,
        }
    }
}

impl ModelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force `command` to always use `choice`.
    pub fn with_override(mut self, command: impl Into<String>, choice: ModelChoice) -> Self {
        self.overrides.insert(command.into().to_lowercase(), choice);
        self
    }

    pub fn set_override(&mut self, command: impl Into<String>, choice: ModelChoice) {
        self.overrides.insert(command.into().to_lowercase(), choice);
    }

    pub fn override_for(&self, command: &str) -> Option<ModelChoice> {
        self.overrides.get(command).copied()
    }

    pub fn route(&self, req: &RouteRequest) -> ModelChoice {
        if let Some(command) = req.command.as_deref() {
            if let Some(choice) = self.override_for(command) {
                return choice;
            }
            if self.simple.iter().any(|c| c == command) {
                return ModelChoice::Economical;
            }
            if self.complex.iter().any(|c| c == command) {
                return ModelChoice::Deep;
            }
        }

        if req.word_count < self.short_words {
            return if req.has_question {
                ModelChoice::Deep
            } else {
                ModelChoice::Economical
            };
        }

        if req.is_dm && req.word_count > self.dm_deep_words {
            return ModelChoice::Deep;
        }

        if req.has_question || req.has_depth_cue {
            return ModelChoice::Deep;
        }

        ModelChoice::Economical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(text: &str, is_dm: bool) -> ModelChoice {
        ModelRouter::default().route(&RouteRequest::from_text(None, text, is_dm))
    }

    #[test]
    fn short_greeting_in_dm_is_economical() {
        assert_eq!(route("hi", true), ModelChoice::Economical);
    }

    #[test]
    fn short_question_goes_deep() {
        assert_eq!(route("are you there?", false), ModelChoice::Deep);
    }

    #[test]
    fn long_dm_goes_deep() {
        let text = "today was long and the garden was quiet and I kept thinking about the river and the light on it";
        assert_eq!(route(text, true), ModelChoice::Deep);
        // Same words in a channel with no depth cue stay economical.
        assert_eq!(route(text, false), ModelChoice::Economical);
    }

    #[test]
    fn depth_cue_in_channel_goes_deep() {
        let text = "honestly I feel like the new members are settling in really nicely here";
        assert_eq!(route(text, false), ModelChoice::Deep);
    }

    #[test]
    fn commands_use_their_class() {
        let router = ModelRouter::default();
        let garden = RouteRequest::from_text(Some("Seeds"), "!seeds", false);
        let catchup = RouteRequest::from_text(Some("catchup"), "!catchup link", false);
        assert_eq!(router.route(&garden), ModelChoice::Economical);
        assert_eq!(router.route(&catchup), ModelChoice::Deep);
    }

    #[test]
    fn override_beats_heuristics() {
        let router = ModelRouter::default().with_override("hello", ModelChoice::Deep);
        let req = RouteRequest::from_text(Some("hello"), "!hello", false);
        assert_eq!(router.route(&req), ModelChoice::Deep);
        assert_eq!(router.override_for("hello"), Some(ModelChoice::Deep));
        assert_eq!(router.override_for("tend"), None);
    }
}
