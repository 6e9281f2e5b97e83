pub mod models;
pub mod request;
pub mod response;
pub mod streaming;

pub use request::transform_claude_request_in;
pub use response::transform_response;
pub use streaming::create_claude_sse_stream;
