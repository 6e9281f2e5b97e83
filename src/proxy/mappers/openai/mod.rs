pub mod models;
pub mod request;
pub mod response;
pub mod streaming;

pub use request::transform_openai_to_claude;
pub use response::{map_gemini_finish_reason, transform_claude_response_to_openai};
pub use streaming::{create_openai_sse_stream, create_synthetic_openai_sse};
