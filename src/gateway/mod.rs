//! Gateway server implementation

mod router;
mod server;
pub mod streaming;

pub use router::{AppState, ProcessMessage, create_router};
pub use server::{Gateway, shutdown_signal};
pub use streaming::{StreamEvent, invoke, sse_response};
