pub mod collector;
pub mod wrapper;

pub use collector::collect_gemini_stream;
pub use wrapper::{unwrap_response, wrap_request};
