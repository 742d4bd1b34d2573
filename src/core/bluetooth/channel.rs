//! Send/receive façade over a ready [`GattConnection`]

use std::collections::HashMap;

use log::{debug, info};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::core::bluetooth::connection::GattConnection;
use crate::core::bluetooth::error::{BleError, RadioError};
use crate::core::bluetooth::events::EventSink;
use crate::core::bluetooth::radio::RadioAdapter;
use crate::core::bluetooth::types::{ConnectionState, ControllerEvent, WriteId, WriteMode};

/// Resolved with the platform's verdict on one write
pub type WriteResponder = oneshot::Sender<Result<(), BleError>>;

pub struct DataChannel {
    write_mode: WriteMode,
    next_write: u64,
    pending: HashMap<WriteId, Option<WriteResponder>>,
}

impl DataChannel {
    pub fn new(write_mode: WriteMode) -> Self {
        Self {
            write_mode,
            next_write: 0,
            pending: HashMap::new(),
        }
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Writes `data` to the write characteristic. `responder`, if given, is
    /// resolved exactly once: with the synchronous error, or later with the
    /// platform's completion.
    pub fn send(
        &mut self,
        connection: Option<&GattConnection>,
        radio: &mut dyn RadioAdapter,
        data: &[u8],
        responder: Option<WriteResponder>,
    ) -> Result<WriteId, BleError> {
        match self.issue_write(connection, radio, data) {
            Ok(write) => {
                self.pending.insert(write, responder);
                Ok(write)
            }
            Err(e) => {
                if let Some(responder) = responder {
                    let _ = responder.send(Err(e.clone()));
                }
                Err(e)
            }
        }
    }

    fn issue_write(
        &mut self,
        connection: Option<&GattConnection>,
        radio: &mut dyn RadioAdapter,
        data: &[u8],
    ) -> Result<WriteId, BleError> {
        let connection = match connection {
            Some(connection) if connection.is_ready() => connection,
            Some(connection) => return Err(BleError::NotReady(connection.state())),
            None => return Err(BleError::NotReady(ConnectionState::Disconnected)),
        };
        let characteristics = connection
            .characteristics()
            .ok_or(BleError::NotReady(connection.state()))?;

        let write = WriteId(self.next_write);
        self.next_write += 1;

        debug!("Sending {} bytes to {}: {:02X?}", data.len(), connection.address(), data);
        radio.write_characteristic(
            connection.link(),
            characteristics.write,
            data,
            self.write_mode,
            write,
        )?;
        Ok(write)
    }

    pub fn on_write_complete(&mut self, write: WriteId, result: Result<(), RadioError>) {
        match self.pending.remove(&write) {
            Some(responder) => {
                if let Err(e) = &result {
                    info!("Write {:?} failed: {}", write, e);
                }
                if let Some(responder) = responder {
                    let _ = responder.send(result.map_err(BleError::from));
                }
            }
            None => debug!("Ignoring completion of unknown write {:?}", write),
        }
    }

    /// Forwards a notification if it comes from the read characteristic of a
    /// ready connection.
    pub fn on_notification(
        &self,
        connection: Option<&GattConnection>,
        characteristic: Uuid,
        value: Vec<u8>,
        events: &EventSink,
    ) {
        let accepted = connection
            .filter(|c| c.is_ready())
            .and_then(|c| c.characteristics())
            .is_some_and(|c| c.read == characteristic);

        if !accepted {
            debug!("Dropping notification from {} ({} bytes)", characteristic, value.len());
            return;
        }
        debug!("Received data: {:02X?}", value);
        events.emit(ControllerEvent::DataReceived { data: value });
    }

    /// Resolves every outstanding write with `err`.
    pub fn fail_pending(&mut self, err: BleError) {
        for (_, responder) in self.pending.drain() {
            if let Some(responder) = responder {
                let _ = responder.send(Err(err.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GattProfile;
    use crate::core::bluetooth::constants::{UUID_UART_READ_CHAR, UUID_UART_WRITE_CHAR};
    use crate::core::bluetooth::fake::{FakeRadio, RadioCall, uart_services};
    use crate::core::bluetooth::registry::CharacteristicRegistry;
    use crate::core::bluetooth::types::{Address, LinkId};
    use tokio::sync::mpsc;

    fn ready_connection(radio: &mut FakeRadio) -> GattConnection {
        let registry = CharacteristicRegistry::new(GattProfile::default());
        let mut conn = GattConnection::open(Address::new("AA"), LinkId(1), None, radio).unwrap();
        conn.on_link_up(None, radio).unwrap();
        conn.on_services_discovered(Ok(uart_services()), &registry, radio)
            .unwrap();
        conn.on_descriptor_written(Ok(()), radio).unwrap();
        conn
    }

    #[test]
    fn test_send_not_ready() {
        let mut radio = FakeRadio::new();
        let mut channel = DataChannel::new(WriteMode::WithResponse);

        assert_eq!(
            channel.send(None, &mut radio, b"hi", None),
            Err(BleError::NotReady(ConnectionState::Disconnected))
        );

        let conn = GattConnection::open(Address::new("AA"), LinkId(1), None, &mut radio).unwrap();
        let (tx, mut rx) = oneshot::channel();
        assert_eq!(
            channel.send(Some(&conn), &mut radio, b"hi", Some(tx)),
            Err(BleError::NotReady(ConnectionState::Connecting))
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Err(BleError::NotReady(ConnectionState::Connecting))
        );
        assert_eq!(channel.pending_writes(), 0);
    }

    #[test]
    fn test_send_and_ack() {
        let mut radio = FakeRadio::new();
        let conn = ready_connection(&mut radio);
        let mut channel = DataChannel::new(WriteMode::WithoutResponse);

        let (tx, mut rx) = oneshot::channel();
        let write = channel
            .send(Some(&conn), &mut radio, &[0x01, 0x02], Some(tx))
            .unwrap();
        assert_eq!(
            radio.calls().last(),
            Some(&RadioCall::WriteCharacteristic {
                link: LinkId(1),
                characteristic: UUID_UART_WRITE_CHAR,
                value: vec![0x01, 0x02],
                mode: WriteMode::WithoutResponse,
                write,
            })
        );
        assert!(rx.try_recv().is_err());

        channel.on_write_complete(write, Ok(()));
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
        assert_eq!(channel.pending_writes(), 0);
    }

    #[test]
    fn test_write_failure_reported() {
        let mut radio = FakeRadio::new();
        let conn = ready_connection(&mut radio);
        let mut channel = DataChannel::new(WriteMode::WithResponse);

        let (tx, mut rx) = oneshot::channel();
        let write = channel.send(Some(&conn), &mut radio, b"x", Some(tx)).unwrap();
        channel.on_write_complete(write, Err(RadioError::Status(0x0d)));
        assert!(matches!(rx.try_recv().unwrap(), Err(BleError::OperationFailed(_))));

        radio.set_fail_writes(true);
        assert!(matches!(
            channel.send(Some(&conn), &mut radio, b"x", None),
            Err(BleError::OperationFailed(_))
        ));
    }

    #[test]
    fn test_fail_pending() {
        let mut radio = FakeRadio::new();
        let conn = ready_connection(&mut radio);
        let mut channel = DataChannel::new(WriteMode::WithResponse);

        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        channel.send(Some(&conn), &mut radio, b"a", Some(tx1)).unwrap();
        channel.send(Some(&conn), &mut radio, b"b", Some(tx2)).unwrap();

        channel.fail_pending(BleError::LinkLost);
        assert_eq!(rx1.try_recv().unwrap(), Err(BleError::LinkLost));
        assert_eq!(rx2.try_recv().unwrap(), Err(BleError::LinkLost));
    }

    #[test]
    fn test_notifications_in_order() {
        let mut radio = FakeRadio::new();
        let conn = ready_connection(&mut radio);
        let channel = DataChannel::new(WriteMode::WithResponse);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = EventSink::new(tx);

        channel.on_notification(Some(&conn), UUID_UART_READ_CHAR, vec![1], &events);
        channel.on_notification(Some(&conn), UUID_UART_WRITE_CHAR, vec![9], &events);
        channel.on_notification(Some(&conn), UUID_UART_READ_CHAR, vec![2, 3], &events);
        channel.on_notification(None, UUID_UART_READ_CHAR, vec![4], &events);

        assert_eq!(
            rx.try_recv().unwrap(),
            ControllerEvent::DataReceived { data: vec![1] }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ControllerEvent::DataReceived { data: vec![2, 3] }
        );
        assert!(rx.try_recv().is_err());
    }
}
