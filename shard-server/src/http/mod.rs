//! HTTP Dispatcher (component F).

pub mod error;
pub mod multipart;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;
