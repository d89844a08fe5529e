mod body;
mod error;
mod sse;
mod stream_mode;

pub use body::*;
pub use error::*;
pub use sse::*;
pub use stream_mode::*;
