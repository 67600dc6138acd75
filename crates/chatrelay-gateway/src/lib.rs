pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod router;
pub mod server;
pub mod state;
pub mod ui_stream;

pub use router::build_router;
pub use server::GatewayServer;
pub use state::{AppState, SharedState};
