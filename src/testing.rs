//! An in-memory unit for exercising the codecs without a network.

use crate::connection::{self, Session, Transport};
use crate::modbus::ProtocolError;
use crate::registers::{RegisterIndex, SlaveId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transaction {
    Read { slave: SlaveId, address: u16 },
    Write { slave: SlaveId, address: u16, value: u16 },
}

#[derive(Default)]
struct State {
    registers: BTreeMap<(SlaveId, u16), u16>,
    transactions: Vec<Transaction>,
    sessions: Vec<SlaveId>,
    closed_sessions: usize,
    unreachable: bool,
    rejected_writes: Vec<(SlaveId, u16)>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeDevice {
    state: Arc<Mutex<State>>,
}

impl FakeDevice {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A device that refuses every connection attempt.
    pub(crate) fn unreachable() -> Self {
        let device = Self::default();
        device.state().unreachable = true;
        device
    }

    pub(crate) fn with(self, register: RegisterIndex, value: u16) -> Self {
        self.state().registers.insert((register.slave(), register.address()), value);
        self
    }

    /// Answer writes to `register` with exception 4, slave device failure.
    pub(crate) fn rejecting_writes_to(self, register: RegisterIndex) -> Self {
        self.state().rejected_writes.push((register.slave(), register.address()));
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn value(&self, register: RegisterIndex) -> Option<u16> {
        self.state().registers.get(&(register.slave(), register.address())).copied()
    }

    pub(crate) fn transactions(&self) -> Vec<Transaction> {
        self.state().transactions.clone()
    }

    pub(crate) fn writes(&self) -> Vec<Transaction> {
        let transactions = self.transactions();
        transactions.into_iter().filter(|t| matches!(t, Transaction::Write { .. })).collect()
    }

    /// Slave ids of every session opened, in order.
    pub(crate) fn sessions(&self) -> Vec<SlaveId> {
        self.state().sessions.clone()
    }

    pub(crate) fn closed_sessions(&self) -> usize {
        self.state().closed_sessions
    }
}

pub(crate) struct FakeSession {
    device: FakeDevice,
    slave: SlaveId,
}

impl Transport for FakeDevice {
    type Session = FakeSession;

    async fn open(&self, slave: SlaveId) -> Result<FakeSession, connection::Error> {
        let mut state = self.state();
        if state.unreachable {
            let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
            return Err(connection::Error::Connect(refused, "fake device".to_string()));
        }
        state.sessions.push(slave);
        Ok(FakeSession { device: self.clone(), slave })
    }
}

impl Session for FakeSession {
    async fn read_holding(&mut self, address: u16) -> Result<u16, crate::Error> {
        let mut state = self.device.state();
        state.transactions.push(Transaction::Read { slave: self.slave, address });
        let value = state.registers.get(&(self.slave, address)).copied();
        // Unknown registers are answered with exception 2, illegal data address.
        value.ok_or_else(|| {
            ProtocolError::Exception { unit_id: self.slave, address, code: 2 }.into()
        })
    }

    async fn write_holding(&mut self, address: u16, value: u16) -> Result<(), crate::Error> {
        let mut state = self.device.state();
        state.transactions.push(Transaction::Write { slave: self.slave, address, value });
        if state.rejected_writes.contains(&(self.slave, address)) {
            return Err(ProtocolError::Exception { unit_id: self.slave, address, code: 4 }.into());
        }
        state.registers.insert((self.slave, address), value);
        Ok(())
    }

    async fn close(self) -> Result<(), connection::Error> {
        self.device.state().closed_sessions += 1;
        Ok(())
    }
}
