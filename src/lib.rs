pub mod configuration;
pub mod controller;
pub mod device_control;
pub mod error_handling;
pub mod media_ingest;
pub mod session_management;
pub mod web_interface;

#[cfg(test)]
mod testing;
