pub mod agent;
pub mod capabilities;
pub mod config;
pub mod logging;
pub mod models;
pub mod providers;
pub mod registry;
pub mod tools;
pub mod transport;
