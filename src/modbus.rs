use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::registers::{RegisterIndex, SlaveId};

/// Length of the MBAP header up to and including the length field.
const HEADER_LENGTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub unit_id: SlaveId,
    pub transaction_id: u16,
    pub operation: Operation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetHoldings { address: u16, count: u16 },
    SetHolding { address: u16, value: u16 },
}

impl Operation {
    pub fn function_code(&self) -> u8 {
        match self {
            Operation::GetHoldings { .. } => 3,
            Operation::SetHolding { .. } => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub unit_id: SlaveId,
    pub transaction_id: u16,
    pub kind: ResponseKind,
}

impl Response {
    pub fn exception_code(&self) -> Option<u8> {
        match &self.kind {
            ResponseKind::Exception { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    Exception { function_code: u8, code: u8 },
    GetHoldings { values: Vec<u8> },
    SetHolding { address: u16, value: u16 },
    /// A frame with a function code this client never sends, or one too short for its function.
    Unexpected { function_code: u8 },
}

/// The device answered, but not in the way a Modbus holding register exchange should go.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unit {unit_id} rejected the request for register {address} with exception code {code}")]
    Exception { unit_id: SlaveId, address: u16, code: u8 },
    #[error("reading register {address} on unit {unit_id} returned {length} bytes instead of one word")]
    UnexpectedLength { unit_id: SlaveId, address: u16, length: usize },
    #[error("unit {unit_id} answered a request for register {address} with function code {function_code}")]
    UnexpectedResponse { unit_id: SlaveId, address: u16, function_code: u8 },
    #[error("writing {value} to register {address} on unit {unit_id} was echoed back as {echoed_address}={echoed_value}")]
    WriteNotConfirmed {
        unit_id: SlaveId,
        address: u16,
        value: u16,
        echoed_address: u16,
        echoed_value: u16,
    },
    #[error("register {register} holds {value}, which is outside of its domain")]
    OutOfDomain { register: RegisterIndex, value: u16 },
    #[error("register {register} was not read")]
    NotRead { register: RegisterIndex },
}

pub struct ModbusTCPCodec {}

impl Encoder<Request> for ModbusTCPCodec {
    type Error = std::io::Error;
    fn encode(&mut self, req: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (address, payload) = match req.operation {
            Operation::GetHoldings { address, count } => (address, count),
            Operation::SetHolding { address, value } => (address, value),
        };
        dst.reserve(HEADER_LENGTH + 6);
        dst.put_u16(req.transaction_id);
        // Protocol identifier, then the length of everything that follows the length field.
        dst.put_u16(0);
        dst.put_u16(6);
        dst.put_u8(req.unit_id);
        dst.put_u8(req.operation.function_code());
        dst.put_u16(address);
        dst.put_u16(payload);
        trace!(message="sending encoded", buffer=?dst);
        Ok(())
    }
}

impl Decoder for ModbusTCPCodec {
    type Item = Response;
    type Error = std::io::Error;
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message="attempt at decoding", buffer=?src);
            let Some(header) = src.first_chunk::<HEADER_LENGTH>() else {
                return Ok(None);
            };
            let transaction_id = u16::from_be_bytes([header[0], header[1]]);
            let proto = u16::from_be_bytes([header[2], header[3]]);
            let required_length = usize::from(u16::from_be_bytes([header[4], header[5]]));
            // Resynchronize on garbage: every frame carries at least a unit id and function code.
            if proto != 0 || required_length < 2 {
                src.advance(1);
                continue;
            }
            let frame_length = HEADER_LENGTH + required_length;
            if src.len() < frame_length {
                src.reserve(frame_length - src.len());
                return Ok(None);
            }
            let frame = src.split_to(frame_length);
            let [unit_id, function_code, data @ ..] = &frame[HEADER_LENGTH..] else {
                unreachable!("frame length checked above");
            };
            let (unit_id, function_code) = (*unit_id, *function_code);
            let kind = match (function_code, data) {
                (code, data) if code & 0x80 != 0 => ResponseKind::Exception {
                    function_code: code & 0x7F,
                    code: data.first().copied().unwrap_or(0),
                },
                (3, [byte_count, values @ ..]) => {
                    let values = values.get(..usize::from(*byte_count)).unwrap_or(values);
                    ResponseKind::GetHoldings { values: values.to_vec() }
                }
                (6, [a, b, c, d]) => ResponseKind::SetHolding {
                    address: u16::from_be_bytes([*a, *b]),
                    value: u16::from_be_bytes([*c, *d]),
                },
                (function_code, _) => ResponseKind::Unexpected { function_code },
            };
            trace!(message = "decoded a response", transaction_id, unit_id, ?kind);
            return Ok(Some(Response { unit_id, transaction_id, kind }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(request: Request) -> Vec<u8> {
        let mut buffer = BytesMut::new();
        ModbusTCPCodec {}.encode(request, &mut buffer).unwrap();
        buffer.to_vec()
    }

    #[test]
    fn encodes_read_holding_registers() {
        let request = Request {
            unit_id: 4,
            transaction_id: 0x0102,
            operation: Operation::GetHoldings { address: 21839, count: 1 },
        };
        assert_eq!(
            encode(request),
            [0x01, 0x02, 0, 0, 0, 6, 4, 3, 0x55, 0x4F, 0, 1]
        );
    }

    #[test]
    fn encodes_write_single_register() {
        let request = Request {
            unit_id: 1,
            transaction_id: 7,
            operation: Operation::SetHolding { address: 20148, value: 103 },
        };
        assert_eq!(encode(request), [0, 7, 0, 0, 0, 6, 1, 6, 0x4E, 0xB4, 0, 103]);
    }

    #[test]
    fn decodes_read_response_in_pieces() {
        let mut codec = ModbusTCPCodec {};
        let mut buffer = BytesMut::from(&[0, 9, 0, 0, 0, 5, 1, 3, 2][..]);
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
        buffer.extend_from_slice(&[0x00, 0xD7]);
        let response = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(
            response,
            Response {
                unit_id: 1,
                transaction_id: 9,
                kind: ResponseKind::GetHoldings { values: vec![0x00, 0xD7] },
            }
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn decodes_exceptions_and_write_echoes() {
        let mut codec = ModbusTCPCodec {};
        let mut buffer = BytesMut::from(
            &[
                0, 1, 0, 0, 0, 3, 4, 0x83, 2, // illegal data address
                0, 2, 0, 0, 0, 6, 1, 6, 0x4E, 0xB4, 0, 103,
            ][..],
        );
        let exception = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(exception.exception_code(), Some(2));
        assert_eq!(
            exception.kind,
            ResponseKind::Exception { function_code: 3, code: 2 }
        );
        let echo = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(echo.kind, ResponseKind::SetHolding { address: 20148, value: 103 });
        assert_eq!(echo.exception_code(), None);
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
    }

    #[test]
    fn skips_bytes_that_are_not_a_frame() {
        let mut codec = ModbusTCPCodec {};
        let mut buffer = BytesMut::from(&[0xFF, 0, 3, 0, 0, 0, 5, 1, 3, 2, 0, 1][..]);
        let response = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(response.transaction_id, 3);
        assert_eq!(response.kind, ResponseKind::GetHoldings { values: vec![0, 1] });
    }
}
