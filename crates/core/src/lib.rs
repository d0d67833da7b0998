pub mod config;
pub mod http;
pub mod launch;
pub mod monitor;
pub mod session;
pub mod system;
pub mod task;
pub mod types;

#[cfg(test)]
mod testing;
