pub mod commands;
pub mod connection;
pub mod device;
mod error;
pub mod modbus;
pub mod output;
pub mod readings;
pub mod registers;
pub mod settings;
#[cfg(test)]
mod testing;

pub use error::Error;
