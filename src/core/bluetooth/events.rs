//! Delivery of controller events to the presentation layer

use log::debug;
use tokio::sync::mpsc;

use crate::core::bluetooth::types::ControllerEvent;

#[derive(Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<ControllerEvent>,
}

impl EventSink {
    pub fn new(sender: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        Self { sender }
    }

    pub fn emit(&self, event: ControllerEvent) {
        if let Err(e) = self.sender.send(event) {
            debug!("No listener for controller event: {:?}", e.0);
        }
    }
}
