pub mod bridge;
pub mod dispatch;
pub mod error;
pub mod openai;
pub mod postprocess;
pub mod provider;

pub use bridge::{ToolBridge, ToolExecutor};
pub use dispatch::{run_dispatch_loop, DispatchOptions, DispatchOutcome};
pub use error::AgentError;
pub use openai::OpenAiProvider;
pub use provider::{ChatRequest, ChatResponse, LlmProvider, ToolCall, ToolDefinition};
