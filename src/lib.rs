pub mod config;
pub mod engine;
pub mod janitor;
pub mod limits;
pub mod model;
pub mod observability;
pub mod registry;
pub mod sql;
pub mod tls;
pub mod wire;
