//! LLM-facing stages: prompt rendering, completion calls and explanations.

pub mod completion;
pub mod explainer;
pub mod prompt;
pub mod retry;

pub use completion::{CompletionService, HttpCompletionClient, LlmProvider};
pub use explainer::ResultExplainer;
pub use prompt::PromptBuilder;
pub use retry::{RetryPolicy, RetryingCompletion};
