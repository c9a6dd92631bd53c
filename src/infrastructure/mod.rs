// Infrastructure module - Wire protocols and external adapters
pub mod config;
pub mod http;
pub mod logging;
pub mod mqtt;

#[cfg(test)]
pub mod testing;
