//! Adapter implementations.

pub mod openai;
pub use openai::OpenAiAdapter;

pub mod anthropic;
pub use anthropic::AnthropicAdapter;

pub mod mock;
pub use mock::{MockAdapter, MockTurn};
