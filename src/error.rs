use crate::{connection, modbus, settings};

/// Why a fetch or send of unit state failed. Every variant aborts the whole operation.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not exchange data with the unit")]
    Transport(#[source] connection::Error),
    #[error("the unit responded unexpectedly")]
    Protocol(#[source] modbus::ProtocolError),
    #[error(
        "unknown device model (GEO identification register holds {geo}, AIR9 identification \
         register holds {air9})"
    )]
    UnknownDevice { geo: u16, air9: u16 },
    #[error("settings are not valid")]
    Validation(#[source] settings::ValidationError),
}

impl From<connection::Error> for Error {
    fn from(value: connection::Error) -> Self {
        Self::Transport(value)
    }
}

impl From<modbus::ProtocolError> for Error {
    fn from(value: modbus::ProtocolError) -> Self {
        Self::Protocol(value)
    }
}
