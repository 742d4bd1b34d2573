//! Timed, single-flight BLE discovery
//! A [`ScanSession`] runs at most one discovery pass at a time, forwards
//! each address at most once per pass, and stops the radio when its timer
//! expires.

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::{ControllerConfig, DedupPolicy};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::events::EventSink;
use crate::core::bluetooth::precondition::{Precondition, PreconditionGate};
use crate::core::bluetooth::radio::RadioAdapter;
use crate::core::bluetooth::timer::{Timer, TimerEvent, TimerHandle};
use crate::core::bluetooth::types::{
    Address, ControllerEvent, DiscoveredDevice, ScanState, SessionId,
};

pub struct ScanSession {
    timeout: Duration,
    dedup: DedupPolicy,
    min_rssi: Option<i16>,
    state: ScanState,
    session: Option<SessionId>,
    seen_addresses: HashSet<Address>,
    timer: Option<TimerHandle>,
}

impl ScanSession {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            timeout: config.scan_timeout(),
            dedup: config.dedup,
            min_rssi: config.min_rssi,
            state: ScanState::Idle,
            session: None,
            seen_addresses: HashSet::new(),
            timer: None,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Token of the running (or just expired) session
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn is_running(&self) -> bool {
        self.state == ScanState::Running
    }

    /// Starts a discovery pass tagged with `session`.
    ///
    /// Does nothing if a pass is already running.
    pub fn start(
        &mut self,
        session: SessionId,
        gate: &PreconditionGate,
        radio: &mut dyn RadioAdapter,
        timer: &dyn Timer,
        events: &EventSink,
    ) -> Result<(), BleError> {
        if self.is_running() {
            debug!("Scan {:?} already running, ignoring start", self.session);
            return Ok(());
        }

        let precondition = gate.evaluate();
        if precondition != Precondition::Satisfied {
            warn!("Cannot start scan: {}", precondition);
            return Err(BleError::PreconditionNotSatisfied(precondition));
        }

        // A finished pass is reset before the next one begins
        self.reset();

        radio.start_scan(session)?;
        self.state = ScanState::Running;
        self.session = Some(session);
        events.emit(ControllerEvent::ScanStarted);
        self.timer = Some(timer.schedule(self.timeout, TimerEvent::ScanTimeout(session)));

        info!("Scan {:?} started, timeout {:?}", session, self.timeout);
        Ok(())
    }

    /// Stops a running pass. Idle or expired sessions are left untouched
    /// apart from being reset.
    pub fn stop(&mut self, radio: &mut dyn RadioAdapter, events: &EventSink) {
        match self.state {
            ScanState::Running => {
                info!("Stopping scan {:?}", self.session);
                if let Some(timer) = self.timer.take() {
                    timer.cancel();
                }
                radio.stop_scan();
                self.reset();
                events.emit(ControllerEvent::ScanStopped);
            }
            ScanState::Stopped => self.reset(),
            ScanState::Idle => debug!("No scan running"),
        }
    }

    /// Stops the current pass (if any) and immediately starts a new one.
    pub fn rescan(
        &mut self,
        session: SessionId,
        gate: &PreconditionGate,
        radio: &mut dyn RadioAdapter,
        timer: &dyn Timer,
        events: &EventSink,
    ) -> Result<(), BleError> {
        self.stop(radio, events);
        self.start(session, gate, radio, timer, events)
    }

    /// Timer expiry for `session`. Stale expiries are ignored.
    pub fn on_timeout(
        &mut self,
        session: SessionId,
        radio: &mut dyn RadioAdapter,
        events: &EventSink,
    ) {
        if !self.is_current(session) {
            debug!("Ignoring timeout of stale scan {:?}", session);
            return;
        }

        info!("Scan {:?} timed out", session);
        self.timer = None;
        radio.stop_scan();
        self.state = ScanState::Stopped;
        events.emit(ControllerEvent::ScanStopped);
    }

    /// The platform aborted the scan on its own.
    pub fn on_failed(&mut self, session: SessionId, reason: &str, events: &EventSink) {
        if !self.is_current(session) {
            debug!("Ignoring failure of stale scan {:?}", session);
            return;
        }

        warn!("Scan {:?} failed: {}", session, reason);
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.reset();
        events.emit(ControllerEvent::ScanStopped);
    }

    /// Handles a scan result. Returns true if the device was forwarded.
    pub fn on_device_found(
        &mut self,
        session: SessionId,
        device: DiscoveredDevice,
        events: &EventSink,
    ) -> bool {
        if !self.is_current(session) {
            debug!(
                "Dropping result for {} from stale scan {:?}",
                device.address, session
            );
            return false;
        }

        if let Some(min_rssi) = self.min_rssi {
            match device.rssi {
                Some(rssi) if rssi >= min_rssi => {}
                _ => {
                    debug!("Dropping weak device {} ({:?})", device.address, device.rssi);
                    return false;
                }
            }
        }

        let first_seen = self.seen_addresses.insert(device.address.clone());
        if !first_seen && self.dedup == DedupPolicy::FirstSeenOnly {
            return false;
        }

        debug!("Found device - Address: {}, Name: {:?}, RSSI: {:?}", device.address, device.name, device.rssi);
        events.emit(ControllerEvent::DeviceFound { device });
        true
    }

    fn is_current(&self, session: SessionId) -> bool {
        self.is_running() && self.session == Some(session)
    }

    fn reset(&mut self) {
        self.state = ScanState::Idle;
        self.session = None;
        self.timer = None;
        self.seen_addresses.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::fake::{FakeEnvironment, FakeRadio, ManualTimer, RadioCall};
    use crate::core::bluetooth::precondition::AdapterState;
    use tokio::sync::mpsc;

    struct Harness {
        scan: ScanSession,
        gate: PreconditionGate,
        env: FakeEnvironment,
        radio: FakeRadio,
        timer: ManualTimer,
        events: EventSink,
        rx: mpsc::UnboundedReceiver<ControllerEvent>,
    }

    impl Harness {
        fn new(config: ControllerConfig) -> Self {
            let env = FakeEnvironment::satisfied();
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                scan: ScanSession::new(&config),
                gate: PreconditionGate::new(Box::new(env.clone())),
                env,
                radio: FakeRadio::new(),
                timer: ManualTimer::new(),
                events: EventSink::new(tx),
                rx,
            }
        }

        fn start(&mut self, session: u64) -> Result<(), BleError> {
            self.scan.start(
                SessionId(session),
                &self.gate,
                &mut self.radio,
                &self.timer,
                &self.events,
            )
        }

        fn found(&mut self, session: u64, address: &str) -> bool {
            let device = DiscoveredDevice::new(address, None, Some(-60));
            self.scan
                .on_device_found(SessionId(session), device, &self.events)
        }

        fn drain(&mut self) -> Vec<ControllerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn found_addresses(events: &[ControllerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                ControllerEvent::DeviceFound { device } => Some(device.address.to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_requires_precondition() {
        let mut h = Harness::new(ControllerConfig::default());
        h.env.set_adapter(AdapterState::Off);

        assert_eq!(
            h.start(1),
            Err(BleError::PreconditionNotSatisfied(Precondition::AdapterDisabled))
        );
        assert_eq!(h.scan.state(), ScanState::Idle);
        assert!(h.radio.calls().is_empty());
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_start_schedules_timeout() {
        let mut h = Harness::new(ControllerConfig {
            scan_timeout_ms: 1500,
            ..Default::default()
        });
        h.start(1).unwrap();

        assert_eq!(h.scan.state(), ScanState::Running);
        assert_eq!(h.radio.calls(), vec![RadioCall::StartScan(SessionId(1))]);
        assert_eq!(
            h.timer.pending(),
            vec![(
                Duration::from_millis(1500),
                TimerEvent::ScanTimeout(SessionId(1))
            )]
        );
        assert_eq!(h.drain(), vec![ControllerEvent::ScanStarted]);
    }

    #[test]
    fn test_start_is_single_flight() {
        let mut h = Harness::new(ControllerConfig::default());
        h.start(1).unwrap();
        h.start(2).unwrap();

        assert_eq!(h.scan.session(), Some(SessionId(1)));
        assert_eq!(h.radio.calls(), vec![RadioCall::StartScan(SessionId(1))]);
        assert_eq!(h.drain(), vec![ControllerEvent::ScanStarted]);
    }

    #[test]
    fn test_first_seen_only() {
        let mut h = Harness::new(ControllerConfig::default());
        h.start(1).unwrap();
        for address in ["A", "B", "A", "C"] {
            h.found(1, address);
        }
        assert_eq!(found_addresses(&h.drain()), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_always_forward() {
        let mut h = Harness::new(ControllerConfig {
            dedup: DedupPolicy::AlwaysForward,
            ..Default::default()
        });
        h.start(1).unwrap();
        for address in ["A", "B", "A"] {
            h.found(1, address);
        }
        assert_eq!(found_addresses(&h.drain()), vec!["A", "B", "A"]);
    }

    #[test]
    fn test_dedup_resets_between_sessions() {
        let mut h = Harness::new(ControllerConfig::default());
        h.start(1).unwrap();
        assert!(h.found(1, "A"));
        h.scan.stop(&mut h.radio, &h.events);
        h.start(2).unwrap();
        assert!(h.found(2, "A"));
    }

    #[test]
    fn test_min_rssi() {
        let mut h = Harness::new(ControllerConfig {
            min_rssi: Some(-70),
            ..Default::default()
        });
        h.start(1).unwrap();

        let weak = DiscoveredDevice::new("weak", None, Some(-90));
        let unknown = DiscoveredDevice::new("unknown", None, None);
        let strong = DiscoveredDevice::new("strong", None, Some(-70));
        assert!(!h.scan.on_device_found(SessionId(1), weak, &h.events));
        assert!(!h.scan.on_device_found(SessionId(1), unknown, &h.events));
        assert!(h.scan.on_device_found(SessionId(1), strong, &h.events));
    }

    #[test]
    fn test_timeout_stops_scan_and_drops_late_results() {
        let mut h = Harness::new(ControllerConfig::default());
        h.start(1).unwrap();
        h.found(1, "A");

        h.scan.on_timeout(SessionId(1), &mut h.radio, &h.events);
        assert_eq!(h.scan.state(), ScanState::Stopped);
        assert!(!h.found(1, "B"));

        // Second stop after expiry is a no-op
        h.scan.on_timeout(SessionId(1), &mut h.radio, &h.events);
        h.scan.stop(&mut h.radio, &h.events);
        assert_eq!(h.scan.state(), ScanState::Idle);

        assert_eq!(
            h.drain(),
            vec![
                ControllerEvent::ScanStarted,
                ControllerEvent::DeviceFound {
                    device: DiscoveredDevice::new("A", None, Some(-60))
                },
                ControllerEvent::ScanStopped,
            ]
        );
        assert_eq!(
            h.radio.calls(),
            vec![RadioCall::StartScan(SessionId(1)), RadioCall::StopScan]
        );
    }

    #[test]
    fn test_stop_cancels_timer() {
        let mut h = Harness::new(ControllerConfig::default());
        h.start(1).unwrap();
        h.scan.stop(&mut h.radio, &h.events);

        assert_eq!(h.scan.state(), ScanState::Idle);
        assert!(h.timer.pending().is_empty());

        // The cancelled timer firing anyway is ignored
        h.scan.on_timeout(SessionId(1), &mut h.radio, &h.events);
        assert_eq!(
            h.drain(),
            vec![ControllerEvent::ScanStarted, ControllerEvent::ScanStopped]
        );

        h.scan.stop(&mut h.radio, &h.events);
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_results_from_old_session_are_ignored() {
        let mut h = Harness::new(ControllerConfig::default());
        h.start(1).unwrap();
        h.scan.stop(&mut h.radio, &h.events);
        h.start(2).unwrap();
        assert!(!h.found(1, "A"));
        assert!(h.found(2, "A"));
    }

    #[test]
    fn test_rescan_stops_before_starting() {
        let mut h = Harness::new(ControllerConfig::default());
        h.start(1).unwrap();
        h.drain();

        h.scan
            .rescan(SessionId(2), &h.gate, &mut h.radio, &h.timer, &h.events)
            .unwrap();

        assert_eq!(
            h.drain(),
            vec![ControllerEvent::ScanStopped, ControllerEvent::ScanStarted]
        );
        assert_eq!(h.scan.session(), Some(SessionId(2)));
        assert_eq!(
            h.radio.calls(),
            vec![
                RadioCall::StartScan(SessionId(1)),
                RadioCall::StopScan,
                RadioCall::StartScan(SessionId(2)),
            ]
        );
    }

    #[test]
    fn test_scan_failure_ends_session() {
        let mut h = Harness::new(ControllerConfig::default());
        h.start(1).unwrap();
        h.scan.on_failed(SessionId(1), "adapter reset", &h.events);

        assert_eq!(h.scan.state(), ScanState::Idle);
        assert!(h.timer.pending().is_empty());
        assert_eq!(
            h.drain(),
            vec![ControllerEvent::ScanStarted, ControllerEvent::ScanStopped]
        );
    }

    #[test]
    fn test_radio_start_failure() {
        let mut h = Harness::new(ControllerConfig::default());
        h.radio.set_fail_scan(true);
        assert!(matches!(h.start(1), Err(BleError::OperationFailed(_))));
        assert_eq!(h.scan.state(), ScanState::Idle);
        assert!(h.drain().is_empty());
    }
}
