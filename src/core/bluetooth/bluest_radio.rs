//! Radio Adapter port on top of the `bluest` crate
//! Each request spawns a short tokio task that performs the async platform
//! call and posts the outcome back through the [`RadioEventSink`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use bluest::{Adapter, AdapterEvent, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::{DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE};
use crate::core::bluetooth::error::RadioError;
use crate::core::bluetooth::precondition::{
    AdapterState, Environment, LocationPermission, Remediation,
};
use crate::core::bluetooth::radio::{RadioAdapter, RadioEvent, RadioEventSink};
use crate::core::bluetooth::runtime::RemediationNotifier;
use crate::core::bluetooth::types::{
    Address, DiscoveredDevice, GattCharacteristic, GattService, LinkId, SessionId, WriteId,
    WriteMode,
};

type CharacteristicTable = Arc<Mutex<HashMap<Uuid, Characteristic>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn platform_error(err: bluest::Error) -> RadioError {
    RadioError::Platform(err.to_string())
}

struct Link {
    address: Address,
    device: Device,
    /// Cancelled when the link is closed; parent of every task for the link
    cancel: CancellationToken,
    characteristics: CharacteristicTable,
    notify: Option<CancellationToken>,
}

pub struct BluestRadio {
    adapter: Adapter,
    sink: RadioEventSink,
    /// Devices seen while scanning, keyed by platform id
    devices: Arc<Mutex<HashMap<Address, Device>>>,
    scan_cancel: Option<CancellationToken>,
    links: HashMap<LinkId, Link>,
}

impl BluestRadio {
    pub fn new(adapter: Adapter, sink: RadioEventSink) -> Self {
        Self {
            adapter,
            sink,
            devices: Arc::new(Mutex::new(HashMap::new())),
            scan_cancel: None,
            links: HashMap::new(),
        }
    }

    /// Opens the default adapter of this host.
    pub async fn default_adapter() -> Result<Adapter> {
        Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))
    }

    fn link(&self, link: LinkId) -> Result<&Link, RadioError> {
        self.links.get(&link).ok_or(RadioError::UnknownLink)
    }

    fn characteristic(&self, link: LinkId, uuid: Uuid) -> Result<Characteristic, RadioError> {
        lock(&self.link(link)?.characteristics)
            .get(&uuid)
            .cloned()
            .ok_or_else(|| RadioError::Platform(format!("characteristic {} not discovered", uuid)))
    }

    async fn scan_task(
        adapter: Adapter,
        session: SessionId,
        devices: Arc<Mutex<HashMap<Address, Device>>>,
        sink: RadioEventSink,
        cancel_token: CancellationToken,
    ) {
        info!("Starting bluetooth scan");
        let mut scan_stream = match adapter.scan(&[]).await {
            Ok(stream) => stream,
            Err(e) => {
                sink.send(RadioEvent::ScanFailed {
                    session,
                    reason: e.to_string(),
                });
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                result = scan_stream.next() => match result {
                    Some(discovered) => {
                        let address = Address::new(discovered.device.id().to_string());
                        let name = discovered
                            .adv_data
                            .local_name
                            .clone()
                            .or_else(|| discovered.device.name().ok());
                        lock(&devices).insert(address.clone(), discovered.device.clone());
                        sink.send(RadioEvent::DeviceFound {
                            session,
                            device: DiscoveredDevice::new(address, name, discovered.rssi),
                        });
                    }
                    None => {
                        info!("Bluetooth scan stream has ended.");
                        sink.send(RadioEvent::ScanFailed {
                            session,
                            reason: "scan stream ended".to_string(),
                        });
                        break;
                    }
                }
            }
        }
    }

    async fn discover(
        device: &Device,
        table: &CharacteristicTable,
    ) -> Result<Vec<GattService>, bluest::Error> {
        let mut services = Vec::new();
        for service in device.services().await? {
            let mut characteristics = Vec::new();
            for characteristic in service.characteristics().await? {
                let descriptors = characteristic
                    .descriptors()
                    .await
                    .map(|found| found.iter().map(|d| d.uuid()).collect())
                    .unwrap_or_default();
                characteristics.push(GattCharacteristic::new(characteristic.uuid(), descriptors));
                lock(table).insert(characteristic.uuid(), characteristic);
            }
            services.push(GattService::new(service.uuid(), characteristics));
        }
        Ok(services)
    }

    async fn notify_task(
        link: LinkId,
        characteristic: Characteristic,
        sink: RadioEventSink,
        cancel_token: CancellationToken,
    ) {
        let uuid = characteristic.uuid();
        let mut notification_stream = match characteristic.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                sink.send(RadioEvent::DescriptorWritten {
                    link,
                    result: Err(platform_error(e)),
                });
                return;
            }
        };
        sink.send(RadioEvent::DescriptorWritten { link, result: Ok(()) });

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                result = notification_stream.next() => match result {
                    Some(Ok(value)) => sink.send(RadioEvent::Notification {
                        link,
                        characteristic: uuid,
                        value,
                    }),
                    Some(Err(e)) => warn!("Notification error on {}: {}", uuid, e),
                    None => {
                        sink.send(RadioEvent::LinkDown {
                            link,
                            reason: Some("notification stream ended".to_string()),
                        });
                        break;
                    }
                }
            }
        }
        debug!("Notification task for {:?} finished", link);
    }
}

impl RadioAdapter for BluestRadio {
    fn start_scan(&mut self, session: SessionId) -> Result<(), RadioError> {
        let cancel_token = CancellationToken::new();
        if let Some(previous) = self.scan_cancel.replace(cancel_token.clone()) {
            previous.cancel();
        }
        lock(&self.devices).retain(|address, _| {
            self.links.values().any(|link| &link.address == address)
        });

        tokio::spawn(Self::scan_task(
            self.adapter.clone(),
            session,
            self.devices.clone(),
            self.sink.clone(),
            cancel_token,
        ));
        Ok(())
    }

    fn stop_scan(&mut self) {
        if let Some(cancel_token) = self.scan_cancel.take() {
            info!("Stopping Bluetooth scan.");
            cancel_token.cancel();
        }
    }

    fn open_connection(&mut self, address: &Address, link: LinkId) -> Result<(), RadioError> {
        let device = lock(&self.devices)
            .get(address)
            .cloned()
            .ok_or_else(|| RadioError::UnknownDevice(address.to_string()))?;

        let cancel_token = CancellationToken::new();
        self.links.insert(
            link,
            Link {
                address: address.clone(),
                device: device.clone(),
                cancel: cancel_token.clone(),
                characteristics: Arc::new(Mutex::new(HashMap::new())),
                notify: None,
            },
        );

        let adapter = self.adapter.clone();
        let sink = self.sink.clone();
        tokio::spawn(async move {
            // An existing platform connection is reused
            let result = if device.is_connected().await {
                Ok(())
            } else {
                adapter.connect_device(&device).await
            };
            if cancel_token.is_cancelled() {
                return;
            }
            match result {
                Ok(()) => sink.send(RadioEvent::LinkUp {
                    link,
                    name: device.name().ok(),
                }),
                Err(e) => sink.send(RadioEvent::LinkDown {
                    link,
                    reason: Some(e.to_string()),
                }),
            }
        });
        Ok(())
    }

    fn disconnect(&mut self, link: LinkId) {
        let Ok(entry) = self.link(link) else {
            warn!("Disconnect requested for unknown link {:?}", link);
            return;
        };
        let device = entry.device.clone();
        let adapter = self.adapter.clone();
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let reason = match adapter.disconnect_device(&device).await {
                Ok(()) => None,
                Err(e) => {
                    error!("Failed to disconnect {}: {}", device.id(), e);
                    Some(e.to_string())
                }
            };
            sink.send(RadioEvent::LinkDown { link, reason });
        });
    }

    fn close_connection(&mut self, link: LinkId) {
        if let Some(entry) = self.links.remove(&link) {
            debug!("Closing link {:?} to {}", link, entry.device.id());
            entry.cancel.cancel();
        }
    }

    fn discover_services(&mut self, link: LinkId) -> Result<(), RadioError> {
        let entry = self.link(link)?;
        let device = entry.device.clone();
        let table = entry.characteristics.clone();
        let cancel_token = entry.cancel.clone();
        let sink = self.sink.clone();

        tokio::spawn(async move {
            let result = Self::discover(&device, &table)
                .await
                .map_err(platform_error);
            if !cancel_token.is_cancelled() {
                sink.send(RadioEvent::ServicesDiscovered { link, result });
            }
        });
        Ok(())
    }

    fn set_notification(
        &mut self,
        link: LinkId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), RadioError> {
        // bluest subscribes when the notification stream is opened, which
        // happens on the descriptor write
        self.characteristic(link, characteristic)?;
        debug!("Notifications on {} requested: {}", characteristic, enabled);
        Ok(())
    }

    fn write_descriptor(
        &mut self,
        link: LinkId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), RadioError> {
        let target = self.characteristic(link, characteristic)?;
        let sink = self.sink.clone();
        let Some(entry) = self.links.get_mut(&link) else {
            return Err(RadioError::UnknownLink);
        };

        if let Some(previous) = entry.notify.take() {
            previous.cancel();
        }

        if value == ENABLE_NOTIFICATION_VALUE {
            let cancel_token = entry.cancel.child_token();
            entry.notify = Some(cancel_token.clone());
            tokio::spawn(Self::notify_task(link, target, sink, cancel_token));
            Ok(())
        } else if value == DISABLE_NOTIFICATION_VALUE {
            sink.send(RadioEvent::DescriptorWritten { link, result: Ok(()) });
            Ok(())
        } else {
            Err(RadioError::Unsupported(format!(
                "raw write to descriptor {}",
                descriptor
            )))
        }
    }

    fn write_characteristic(
        &mut self,
        link: LinkId,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
        write: WriteId,
    ) -> Result<(), RadioError> {
        let target = self.characteristic(link, characteristic)?;
        let value = value.to_vec();
        let sink = self.sink.clone();

        tokio::spawn(async move {
            let result = match mode {
                WriteMode::WithResponse => target.write(&value).await,
                WriteMode::WithoutResponse => target.write_without_response(&value).await,
            };
            sink.send(RadioEvent::CharacteristicWritten {
                link,
                write,
                result: result.map_err(platform_error),
            });
        });
        Ok(())
    }
}

/// Applies an adapter availability change. Returns true when the adapter
/// came back.
fn apply_adapter_event(available: &AtomicBool, event: AdapterEvent) -> bool {
    match event {
        AdapterEvent::Available => !available.swap(true, Ordering::SeqCst),
        AdapterEvent::Unavailable => {
            if available.swap(false, Ordering::SeqCst) {
                warn!("Bluetooth adapter became unavailable");
            }
            false
        }
    }
}

/// [`Environment`] of a desktop host: no location permission tier, the only
/// precondition is a powered adapter.
pub struct HostEnvironment {
    adapter: Adapter,
    available: Arc<AtomicBool>,
    notifier: RemediationNotifier,
    watch_cancel: CancellationToken,
}

impl HostEnvironment {
    /// Reads the current adapter state and keeps following it until dropped.
    pub async fn new(adapter: Adapter, notifier: RemediationNotifier) -> Self {
        let available = adapter.is_available().await.unwrap_or(false);
        info!("Bluetooth adapter available: {}", available);
        let available = Arc::new(AtomicBool::new(available));
        let watch_cancel = CancellationToken::new();

        tokio::spawn(Self::watch_adapter(
            adapter.clone(),
            available.clone(),
            notifier.clone(),
            watch_cancel.clone(),
        ));

        Self {
            adapter,
            available,
            notifier,
            watch_cancel,
        }
    }

    async fn watch_adapter(
        adapter: Adapter,
        available: Arc<AtomicBool>,
        notifier: RemediationNotifier,
        cancel_token: CancellationToken,
    ) {
        let mut adapter_events = match adapter.events().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Cannot follow adapter state: {}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                result = adapter_events.next() => match result {
                    Some(Ok(event)) => {
                        if apply_adapter_event(&available, event) {
                            info!("Bluetooth adapter is available.");
                            notifier.completed();
                        }
                    }
                    Some(Err(e)) => warn!("Adapter event error: {}", e),
                    None => break,
                }
            }
        }
        debug!("Adapter watcher finished");
    }
}

impl Drop for HostEnvironment {
    fn drop(&mut self) {
        self.watch_cancel.cancel();
    }
}

impl Environment for HostEnvironment {
    fn platform_version(&self) -> u32 {
        0
    }

    fn has_permission(&self, _permission: LocationPermission) -> bool {
        true
    }

    fn location_service_enabled(&self) -> bool {
        true
    }

    fn adapter_state(&self) -> AdapterState {
        if self.available.load(Ordering::SeqCst) {
            AdapterState::On
        } else {
            AdapterState::Off
        }
    }

    fn launch(&self, remediation: Remediation) {
        if remediation != Remediation::EnableAdapter {
            debug!("Nothing to launch for {:?} on this host", remediation);
            return;
        }

        warn!("Bluetooth adapter is off, waiting for it to become available...");
        let adapter = self.adapter.clone();
        let available = self.available.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            match adapter.wait_available().await {
                Ok(()) => {
                    if apply_adapter_event(&available, AdapterEvent::Available) {
                        info!("Bluetooth adapter is available.");
                        notifier.completed();
                    }
                }
                Err(e) => error!("Failed waiting for the adapter: {}", e),
            }
        });
    }
}
