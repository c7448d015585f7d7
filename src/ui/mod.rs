//! HTTP control surface and event stream

pub mod handlers;
pub mod server;
pub mod websocket;

pub use handlers::ApiResponse;
pub use server::{router, AppState, WebServer};
