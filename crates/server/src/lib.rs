pub mod app_state;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod schema;
pub mod server;
pub mod time;

pub use app_state::AppState;
pub use handlers::router;
