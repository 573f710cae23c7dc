//! Concrete backend adapters (spec §4.2). Each module implements one of
//! the three response-parsing strategies the spec enumerates.

mod claude_cli;
mod codex_cli;
mod gemini_cli;

pub use claude_cli::ClaudeCliAdapter;
pub use codex_cli::CodexCliAdapter;
pub use gemini_cli::GeminiCliAdapter;

use crate::adapter::{Adapter, AdapterRegistry};

/// The default, compile-time-closed set of adapters, in the order
/// auto-detect probes them.
pub fn default_registry() -> AdapterRegistry {
    let adapters: Vec<Box<dyn Adapter>> = vec![
        Box::new(ClaudeCliAdapter),
        Box::new(CodexCliAdapter),
        Box::new(GeminiCliAdapter),
    ];
    AdapterRegistry::new(adapters)
}
