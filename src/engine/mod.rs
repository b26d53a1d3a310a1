//! The engine module: the attachment catalog, the tool batch dispatcher,
//! the iteration runtime (the think/plan/execute/observe state machine
//! itself), the top-level `ReactEngine`, the planned-execution driver, and
//! the final-answer summarizer.
//!
//! `catalog`, `dispatcher`, `formatters`, `runtime`, and `workflow` are
//! implementation modules the top-level drivers (`react`, `planned`) compose
//! — they're `pub` so advanced callers can reuse individual pieces (e.g. a
//! host embedding just the attachment catalog), but `ReactEngine` and
//! `PlannedExecutionDriver` are the intended entry points.

pub mod catalog;
pub mod dispatcher;
pub mod formatters;
pub mod planned;
pub mod react;
pub mod runtime;
pub mod summarizer;
pub mod workflow;

pub use planned::PlannedExecutionDriver;
pub use react::{ReactEngine, RunError};
pub use summarizer::FinalAnswerSummarizer;
