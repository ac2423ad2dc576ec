pub mod anthropic;
pub mod generator;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use generator::AIGenerator;
pub use provider::LlmProvider;
