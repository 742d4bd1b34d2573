//! Deferred, cancellable timers delivered on the owner queue

use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::runtime::Input;
use crate::core::bluetooth::types::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    ScanTimeout(SessionId),
}

/// Cancels the timer it was returned for. Dropping it does not cancel.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancel_token: CancellationToken,
}

impl TimerHandle {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self { cancel_token }
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

pub trait Timer: Send {
    /// Posts `event` to the owner queue after `delay` unless cancelled first.
    fn schedule(&self, delay: Duration, event: TimerEvent) -> TimerHandle;
}

/// [`Timer`] backed by `tokio::time`
pub struct TokioTimer {
    inputs: mpsc::UnboundedSender<Input>,
}

impl TokioTimer {
    pub(crate) fn new(inputs: mpsc::UnboundedSender<Input>) -> Self {
        Self { inputs }
    }
}

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, event: TimerEvent) -> TimerHandle {
        let cancel_token = CancellationToken::new();
        let cancel_token_for_task = cancel_token.clone();
        let inputs = self.inputs.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel_token_for_task.cancelled() => {
                    debug!("Timer {:?} cancelled", event);
                }
                _ = tokio::time::sleep(delay) => {
                    let _ = inputs.send(Input::Timer(event));
                }
            }
        });

        TimerHandle::new(cancel_token)
    }
}
