//! Prompt assembly for Seedkeeper.
//!
//! The perspective corpus, the voice assets that open and close every
//! prompt, and the compiler that orders them into cacheable layers.

pub mod compiler;
pub mod perspectives;
pub mod token;
pub mod voice;

pub use compiler::{CompileInput, CompiledPrompt, LayerStats, PromptCompiler};
pub use perspectives::{
    PerspectiveFragment, PerspectiveSet, PerspectiveStats, PerspectiveStore, SelectMode,
    Selection, Tier,
};
pub use voice::Voice;

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("Perspective fetch failed: {0}")]
    Fetch(String),

    #[error("Perspective file error: {0}")]
    Io(String),
}
