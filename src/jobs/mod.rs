pub mod monitor;
pub mod runner;
pub mod sink;
pub mod store;
