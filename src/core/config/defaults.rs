pub const HOST: &str = "127.0.0.1";
pub const PORT: u16 = 8000;
pub const DOCS_DIR: &str = "docs";
pub const FRONTEND_DIR: &str = "frontend";

pub const ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const MAX_TOKENS: u32 = 2048;
pub const MAX_TOOL_ROUNDS: u32 = 2;
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

pub const EMBEDDING_PROVIDER: &str = "hashing";
pub const EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
pub const EMBEDDING_BASE_URL: &str = "http://localhost:1234";
pub const EMBEDDING_DIMENSION: usize = 384;

pub const CHUNK_SIZE: usize = 800;
pub const CHUNK_OVERLAP: usize = 100;
pub const MAX_RESULTS: usize = 5;
pub const MAX_HISTORY: usize = 2;

pub const EMBEDDING_PROVIDERS: [&str; 2] = ["hashing", "openai_compatible"];
