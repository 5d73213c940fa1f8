pub mod controller;
pub mod crud;
pub mod extractor;
pub mod gate;
pub mod interface;
pub mod model;
pub mod routes;
pub mod schema;
pub mod verification;

pub use routes::auth_routes;
