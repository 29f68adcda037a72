//! surge-daemon library surface.
//!
//! `main.rs` is a thin binary over these modules; tests compose the router
//! directly via `routes::build_router`.

pub mod api_types;
pub mod routes;
pub mod state;
pub mod sweeper;
pub mod validate;
