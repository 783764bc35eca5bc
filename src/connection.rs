use crate::modbus::{ModbusTCPCodec, Operation, ProtocolError, Request, ResponseKind};
use crate::registers::{DataType, RegisterIndex, SlaveId, Value};
use futures::{SinkExt as _, StreamExt as _};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

/// Factory default address of the unit's Modbus TCP interface.
pub const DEFAULT_ADDRESS: &str = "192.168.5.107:502";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("`{0}` did not resolve to any address")]
    NoAddresses(String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("connecting to `{0}` did not complete within {1:?}")]
    ConnectTimeout(String, Duration),
    #[error("could not send out the request")]
    Send(#[source] std::io::Error),
    #[error("could not read data from the stream")]
    Receive(#[source] std::io::Error),
    #[error("the unit did not respond within {0:?}")]
    ResponseTimeout(Duration),
    #[error("the unit closed the connection")]
    Closed,
    #[error("could not shut down the connection")]
    Shutdown(#[source] std::io::Error),
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "connection::Args")]
pub struct Args {
    /// The `host:port` of the unit's Modbus TCP interface.
    #[arg(long, short = 'a', env = "NILAN_ADDRESS", default_value = DEFAULT_ADDRESS)]
    address: String,

    /// Consider the unit unreachable if connecting to it, or a response to any single request,
    /// takes longer than this.
    #[arg(long, default_value = "10s")]
    timeout: humantime::Duration,
}

/// Something that can open a connection to one unit on the field bus.
#[allow(async_fn_in_trait)]
pub trait Transport {
    type Session: Session;
    async fn open(&self, slave: SlaveId) -> Result<Self::Session, Error>;
}

/// A connection bound to a single unit. Requests are sent one at a time.
#[allow(async_fn_in_trait)]
pub trait Session {
    async fn read_holding(&mut self, address: u16) -> Result<u16, crate::Error>;
    async fn write_holding(&mut self, address: u16, value: u16) -> Result<(), crate::Error>;
    async fn close(self) -> Result<(), Error>;
}

/// Open a session to `slave`, run `operation` with it and close the session again, regardless of
/// how `operation` went.
///
/// Should `operation` panic, the session is dropped during unwinding, which closes the socket
/// without the orderly shutdown.
pub async fn with_session<T: Transport, R>(
    transport: &T,
    slave: SlaveId,
    operation: impl AsyncFnOnce(&mut T::Session) -> Result<R, crate::Error>,
) -> Result<R, crate::Error> {
    let mut session = transport.open(slave).await?;
    let result = operation(&mut session).await;
    if let Err(e) = session.close().await {
        warn!(
            message = "closing the session failed",
            slave,
            error = (&e as &dyn std::error::Error)
        );
    }
    result
}

/// Raw words read from catalog registers.
#[derive(Debug, Default, Clone)]
pub struct RegisterValues(BTreeMap<RegisterIndex, u16>);

impl RegisterValues {
    pub fn word(&self, register: RegisterIndex) -> Result<u16, ProtocolError> {
        self.0.get(&register).copied().ok_or(ProtocolError::NotRead { register })
    }

    pub fn value_of(&self, register: RegisterIndex) -> Result<Value, ProtocolError> {
        Ok(register.data_type().from_word(self.word(register)?))
    }

    pub fn iter(&self) -> impl Iterator<Item = (RegisterIndex, Value)> + '_ {
        self.0.iter().map(|(r, w)| (*r, r.data_type().from_word(*w)))
    }
}

fn slaves_of(registers: impl Iterator<Item = RegisterIndex>) -> BTreeSet<SlaveId> {
    registers.map(|r| r.slave()).collect()
}

/// Read `registers` one transaction at a time, using one session for each slave they belong to.
pub async fn read_registers<T: Transport>(
    transport: &T,
    registers: &[RegisterIndex],
) -> Result<RegisterValues, crate::Error> {
    let mut values = RegisterValues::default();
    for slave in slaves_of(registers.iter().copied()) {
        with_session(transport, slave, async |session| {
            for &register in registers.iter().filter(|r| r.slave() == slave) {
                let word = session.read_holding(register.address()).await?;
                trace!(
                    message = "read a register",
                    register.address = register.address(),
                    register.name = register.name(),
                    word
                );
                values.0.insert(register, word);
            }
            Ok(())
        })
        .await?;
    }
    Ok(values)
}

/// Write `writes` in the given order, using one session for each slave they belong to.
///
/// Stops at the first write that fails. Writes issued before it stay in effect.
pub async fn write_registers<T: Transport>(
    transport: &T,
    writes: &[(RegisterIndex, u16)],
) -> Result<(), crate::Error> {
    for slave in slaves_of(writes.iter().map(|(r, _)| *r)) {
        with_session(transport, slave, async |session| {
            for &(register, value) in writes.iter().filter(|(r, _)| r.slave() == slave) {
                debug!(
                    message = "writing a register",
                    register.address = register.address(),
                    register.name = register.name(),
                    value
                );
                session.write_holding(register.address(), value).await?;
            }
            Ok(())
        })
        .await?;
    }
    Ok(())
}

/// Connects to the unit over Modbus TCP, once for every session.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    address: String,
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(args: &Args) -> Self {
        Self::with_timeout(args.address.clone(), *args.timeout)
    }

    pub fn with_timeout(address: String, timeout: Duration) -> Self {
        Self { address, timeout }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<TcpStream, Error> {
        let address = &self.address;
        info!(message = "connecting...", address);
        let addresses = tokio::net::lookup_host(address)
            .await
            .map_err(|e| Error::LookupHost(e, address.to_string()))?
            .collect::<Vec<_>>();
        debug!(message = "resolved", ?addresses);
        if addresses.is_empty() {
            return Err(Error::NoAddresses(address.to_string()));
        }
        let socket = TcpStream::connect(&*addresses)
            .await
            .map_err(|e| Error::Connect(e, address.to_string()))?;
        let nodelay_result = socket.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        Ok(socket)
    }
}

impl Transport for TcpTransport {
    type Session = TcpSession;

    async fn open(&self, slave: SlaveId) -> Result<TcpSession, Error> {
        let socket = tokio::time::timeout(self.timeout, self.connect())
            .await
            .map_err(|_| Error::ConnectTimeout(self.address.clone(), self.timeout))??;
        info!(message = "connected", slave);
        Ok(TcpSession {
            io: Framed::new(socket, ModbusTCPCodec {}),
            unit_id: slave,
            timeout: self.timeout,
            next_transaction_id: 0,
        })
    }
}

pub struct TcpSession {
    io: Framed<TcpStream, ModbusTCPCodec>,
    unit_id: SlaveId,
    timeout: Duration,
    next_transaction_id: u16,
}

impl TcpSession {
    async fn transact(&mut self, operation: Operation) -> Result<ResponseKind, crate::Error> {
        let transaction_id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        let request = Request { unit_id: self.unit_id, transaction_id, operation };
        let timeout = self.timeout;
        let io = &mut self.io;
        let exchange = async move {
            io.send(request).await.map_err(Error::Send)?;
            loop {
                let response = match io.next().await {
                    None => return Err(Error::Closed),
                    Some(Err(e)) => return Err(Error::Receive(e)),
                    Some(Ok(response)) => response,
                };
                // Anything else is a late answer to a request that has been given up on.
                if response.transaction_id != transaction_id {
                    debug!(
                        message = "a response we were not expecting",
                        transaction = response.transaction_id
                    );
                    continue;
                }
                return Ok(response.kind);
            }
        };
        let kind = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| Error::ResponseTimeout(timeout))??;
        Ok(kind)
    }
}

fn unexpected_response(unit_id: SlaveId, address: u16, kind: ResponseKind) -> ProtocolError {
    match kind {
        ResponseKind::Exception { code, .. } => ProtocolError::Exception { unit_id, address, code },
        ResponseKind::GetHoldings { .. } => {
            ProtocolError::UnexpectedResponse { unit_id, address, function_code: 3 }
        }
        ResponseKind::SetHolding { .. } => {
            ProtocolError::UnexpectedResponse { unit_id, address, function_code: 6 }
        }
        ResponseKind::Unexpected { function_code } => {
            ProtocolError::UnexpectedResponse { unit_id, address, function_code }
        }
    }
}

impl Session for TcpSession {
    async fn read_holding(&mut self, address: u16) -> Result<u16, crate::Error> {
        let unit_id = self.unit_id;
        match self.transact(Operation::GetHoldings { address, count: 1 }).await? {
            ResponseKind::GetHoldings { values } => DataType::U16
                .from_bytes(&values)
                .map(Value::into_inner)
                .ok_or_else(|| {
                    let length = values.len();
                    crate::Error::from(ProtocolError::UnexpectedLength { unit_id, address, length })
                }),
            other => Err(unexpected_response(unit_id, address, other).into()),
        }
    }

    async fn write_holding(&mut self, address: u16, value: u16) -> Result<(), crate::Error> {
        let unit_id = self.unit_id;
        match self.transact(Operation::SetHolding { address, value }).await? {
            ResponseKind::SetHolding { address: echoed_address, value: echoed_value }
                if echoed_address == address && echoed_value == value =>
            {
                Ok(())
            }
            ResponseKind::SetHolding { address: echoed_address, value: echoed_value } => {
                Err(ProtocolError::WriteNotConfirmed {
                    unit_id,
                    address,
                    value,
                    echoed_address,
                    echoed_value,
                }
                .into())
            }
            other => Err(unexpected_response(unit_id, address, other).into()),
        }
    }

    async fn close(mut self) -> Result<(), Error> {
        self.io.close().await.map_err(Error::Shutdown)
    }
}
