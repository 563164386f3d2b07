//! HTTP/WebSocket transport for the linker.

mod routes;

pub use routes::{create_router, create_router_with_name, AppState};
