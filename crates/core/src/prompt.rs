//! Prompt layers and the system blocks they collapse into.

use serde::{Deserialize, Serialize};

/// Which slot of the layered prompt a layer fills, in assembly order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Invocation,
    CoreContext,
    CorePerspectives,
    Perspectives,
    TeamLetters,
    Background,
    Foreground,
    Benediction,
}

impl LayerKind {
    /// XML-ish tag wrapping the layer's content.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Invocation => "invocation",
            Self::CoreContext => "core_context",
            Self::CorePerspectives => "core_perspectives",
            Self::Perspectives => "perspectives",
            Self::TeamLetters => "team_letters",
            Self::Background => "background",
            Self::Foreground => "foreground",
            Self::Benediction => "benediction",
        }
    }
}

/// One ordered block of context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptLayer {
    pub kind: LayerKind,

    pub content: String,

    /// Marks the last layer of a reusable prefix
    #[serde(default)]
    pub cache_boundary: bool,
}

/// A system block as sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemBlock {
    pub text: String,

    /// Ask the backend to cache everything up to and including this block
    pub cache: bool,
}

/// Collapse layers into system blocks.
///
/// Layers up to and including each cache boundary are joined into one
/// cached block; layers after the last boundary each become their own
/// uncached block.
pub fn system_blocks(layers: &[PromptLayer]) -> Vec<SystemBlock> {
    let mut blocks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for layer in layers {
        if layer.cache_boundary {
            pending.push(&layer.content);
            blocks.push(SystemBlock {
                text: pending.join("\n\n"),
                cache: true,
            });
            pending.clear();
        } else {
            pending.push(&layer.content);
        }
    }

    blocks.extend(pending.into_iter().map(|text| SystemBlock {
        text: text.to_string(),
        cache: false,
    }));
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(kind: LayerKind, content: &str, boundary: bool) -> PromptLayer {
        PromptLayer {
            kind,
            content: content.into(),
            cache_boundary: boundary,
        }
    }

    #[test]
    fn prefix_collapses_into_one_cached_block() {
        let layers = vec![
            layer(LayerKind::Invocation, "inv", false),
            layer(LayerKind::CoreContext, "core", false),
            layer(LayerKind::CorePerspectives, "views", true),
            layer(LayerKind::Perspectives, "sampled", false),
            layer(LayerKind::Foreground, "now", false),
        ];
        let blocks = system_blocks(&layers);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].text, "inv\n\ncore\n\nviews");
        assert!(blocks[0].cache);
        assert!(!blocks[1].cache);
        assert_eq!(blocks[2].text, "now");
    }

    #[test]
    fn no_boundary_means_no_cached_block() {
        let layers = vec![layer(LayerKind::Foreground, "now", false)];
        let blocks = system_blocks(&layers);
        assert_eq!(blocks.len(), 1);
        assert!(!blocks[0].cache);
    }

    #[test]
    fn kinds_sort_in_assembly_order() {
        assert!(LayerKind::Invocation < LayerKind::CoreContext);
        assert!(LayerKind::Foreground < LayerKind::Benediction);
        assert_eq!(LayerKind::TeamLetters.tag(), "team_letters");
    }
}
