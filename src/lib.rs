pub mod app;
pub mod client;
pub mod cluster;
pub mod conf;
pub mod error;
pub mod trigger;
