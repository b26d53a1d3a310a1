//! Tools module — the `Tool` trait and the registry tool calls are looked
//! up through.
//!
//! Individual tool implementations (file IO, shell, web search, ...) are
//! out of scope for this crate; embedding applications register their own
//! `Tool` impls into a `ToolRegistry` and hand it to the engine.

mod registry;
mod traits;

pub use registry::ToolRegistry;
pub use traits::{ProgressEmitter, Tool, ToolContext, ToolOutput};
