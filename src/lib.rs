pub mod cluster;
pub mod config;
pub mod counter;
pub mod failure;
pub mod lifecycle;
pub mod server;
pub mod state;
