//! Owner task for a [`Controller`]
//! Host commands, radio callbacks, timer expiries and remediation results
//! all go through one unbounded queue and are handled strictly in order by a
//! single tokio task. Nothing outside that task touches controller state.

use log::{debug, info};
use tokio::sync::{mpsc, oneshot};

use crate::config::ControllerConfig;
use crate::core::bluetooth::channel::WriteResponder;
use crate::core::bluetooth::error::{BleError, ConfigError};
use crate::core::bluetooth::events::EventSink;
use crate::core::bluetooth::manager::Controller;
use crate::core::bluetooth::precondition::Environment;
use crate::core::bluetooth::radio::{RadioAdapter, RadioEvent, RadioEventSink};
use crate::core::bluetooth::timer::{TimerEvent, TokioTimer};
use crate::core::bluetooth::types::{Address, ControllerEvent, ControllerSnapshot};
use crate::storage::DeviceNameStore;

type Reply<T> = oneshot::Sender<T>;

pub(crate) enum Command {
    Start(Reply<Result<(), BleError>>),
    Stop(Reply<()>),
    Rescan(Reply<Result<(), BleError>>),
    Connect(Address, Reply<Result<(), BleError>>),
    Disconnect(Reply<()>),
    Send(Vec<u8>, WriteResponder),
    Snapshot(Reply<ControllerSnapshot>),
    Shutdown(Reply<()>),
}

/// Everything the owner task reacts to
pub(crate) enum Input {
    Command(Command),
    Radio(RadioEvent),
    Timer(TimerEvent),
    PreconditionsChanged,
}

/// Owner queue of a controller that has not been spawned yet.
///
/// The radio backend and the host environment usually need a way to post
/// back into the queue before the controller exists, so the queue is created
/// first and handed out through [`radio_sink`](Self::radio_sink) and
/// [`remediation_notifier`](Self::remediation_notifier).
pub struct ControllerRuntime {
    inputs: mpsc::UnboundedSender<Input>,
    receiver: mpsc::UnboundedReceiver<Input>,
}

impl Default for ControllerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerRuntime {
    pub fn new() -> Self {
        let (inputs, receiver) = mpsc::unbounded_channel();
        Self { inputs, receiver }
    }

    pub fn radio_sink(&self) -> RadioEventSink {
        RadioEventSink::new(self.inputs.clone())
    }

    pub fn remediation_notifier(&self) -> RemediationNotifier {
        RemediationNotifier {
            inputs: self.inputs.clone(),
        }
    }

    /// Builds the controller and spawns its owner task on the current tokio
    /// runtime. The task runs until [`ControllerHandle::shutdown`].
    pub fn spawn(
        self,
        config: ControllerConfig,
        radio: impl RadioAdapter + 'static,
        env: impl Environment + 'static,
        store: impl DeviceNameStore + 'static,
    ) -> Result<(ControllerHandle, mpsc::UnboundedReceiver<ControllerEvent>), ConfigError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let controller = Controller::new(
            config,
            Box::new(radio),
            Box::new(env),
            Box::new(TokioTimer::new(self.inputs.clone())),
            Box::new(store),
            EventSink::new(event_tx),
        )?;

        tokio::spawn(run(controller, self.receiver));

        Ok((
            ControllerHandle {
                inputs: self.inputs,
            },
            event_rx,
        ))
    }
}

async fn run(mut controller: Controller, mut inputs: mpsc::UnboundedReceiver<Input>) {
    info!("Controller task started");
    while let Some(input) = inputs.recv().await {
        match input {
            Input::Command(Command::Shutdown(reply)) => {
                controller.shutdown();
                let _ = reply.send(());
                break;
            }
            Input::Command(command) => handle_command(&mut controller, command),
            Input::Radio(event) => controller.handle_radio_event(event),
            Input::Timer(event) => controller.handle_timer(event),
            Input::PreconditionsChanged => controller.preconditions_changed(),
        }
    }
    info!("Controller task stopped");
}

fn handle_command(controller: &mut Controller, command: Command) {
    match command {
        Command::Start(reply) => {
            let _ = reply.send(controller.start());
        }
        Command::Stop(reply) => {
            controller.stop();
            let _ = reply.send(());
        }
        Command::Rescan(reply) => {
            let _ = reply.send(controller.rescan());
        }
        Command::Connect(address, reply) => {
            let _ = reply.send(controller.connect(address));
        }
        Command::Disconnect(reply) => {
            controller.disconnect();
            let _ = reply.send(());
        }
        Command::Send(data, responder) => {
            // The responder carries the outcome either way
            let _ = controller.send(&data, Some(responder));
        }
        Command::Snapshot(reply) => {
            let _ = reply.send(controller.snapshot());
        }
        Command::Shutdown(reply) => {
            controller.shutdown();
            let _ = reply.send(());
        }
    }
}

/// Cloneable front end to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    inputs: mpsc::UnboundedSender<Input>,
}

impl ControllerHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, BleError> {
        let (tx, rx) = oneshot::channel();
        self.inputs
            .send(Input::Command(command(tx)))
            .map_err(|_| BleError::ControllerStopped)?;
        rx.await.map_err(|_| BleError::ControllerStopped)
    }

    pub async fn start(&self) -> Result<(), BleError> {
        self.request(Command::Start).await?
    }

    pub async fn stop(&self) -> Result<(), BleError> {
        self.request(Command::Stop).await
    }

    pub async fn rescan(&self) -> Result<(), BleError> {
        self.request(Command::Rescan).await?
    }

    /// Returns once the connection attempt has started; watch the event
    /// stream for its outcome.
    pub async fn connect(&self, address: impl Into<Address>) -> Result<(), BleError> {
        let address = address.into();
        self.request(|reply| Command::Connect(address, reply)).await?
    }

    pub async fn disconnect(&self) -> Result<(), BleError> {
        self.request(Command::Disconnect).await
    }

    /// Writes `data` and waits for the platform to report the write complete.
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), BleError> {
        let data = data.into();
        debug!("Queueing {} bytes for sending", data.len());
        self.request(|responder| Command::Send(data, responder)).await?
    }

    pub async fn snapshot(&self) -> Result<ControllerSnapshot, BleError> {
        self.request(Command::Snapshot).await
    }

    /// Stops scanning, drops the connection and ends the owner task.
    pub async fn shutdown(&self) -> Result<(), BleError> {
        self.request(Command::Shutdown).await
    }
}

/// Lets the host report that a remediation flow (permission dialog,
/// settings screen, adapter prompt) has finished.
#[derive(Clone)]
pub struct RemediationNotifier {
    inputs: mpsc::UnboundedSender<Input>,
}

impl RemediationNotifier {
    pub fn completed(&self) {
        if self.inputs.send(Input::PreconditionsChanged).is_err() {
            debug!("Controller task gone, dropping remediation result");
        }
    }
}
