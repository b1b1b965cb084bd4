// Core types for the trellis page framework
// Requests, responses, the error taxonomy, streaming bodies and middleware

pub mod error;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod modules;
pub mod params;
pub mod streaming;

// Re-export commonly used types
pub use error::*;
pub use http::*;
pub use middleware::*;
pub use modules::{MODULES_PREFIX, module_url};
pub use params::*;
pub use streaming::{BoxByteStream, ByteStream, ByteStreamSender, ServerSentEvent};
