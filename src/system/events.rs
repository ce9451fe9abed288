//! Request queue feeding the control loop.
//!
//! HTTP handlers and the simulator push requests; the controller is the
//! single consumer.

use crate::pump::PumpEvent;
use crate::types::REQUEST_QUEUE_SIZE;
use crate::wifi::WifiEvent;
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::{Channel, TrySendError},
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Everything the control loop can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ControlRequest {
    Pump(PumpEvent),
    Wifi(WifiEvent),
}

impl From<PumpEvent> for ControlRequest {
    fn from(event: PumpEvent) -> Self {
        ControlRequest::Pump(event)
    }
}

impl From<WifiEvent> for ControlRequest {
    fn from(event: WifiEvent) -> Self {
        ControlRequest::Wifi(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    RequestQueueFull,
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::RequestQueueFull => write!(f, "Request queue is full"),
        }
    }
}

impl std::error::Error for RequestError {}

type RequestQueue = Channel<CriticalSectionRawMutex, ControlRequest, REQUEST_QUEUE_SIZE>;

pub struct RequestChannel {
    channel: Arc<RequestQueue>,
}

impl RequestChannel {
    pub fn new() -> Self {
        Self {
            channel: Arc::new(Channel::new()),
        }
    }

    pub fn sender(&self) -> RequestSender {
        RequestSender {
            channel: Arc::clone(&self.channel),
        }
    }

    /// Wait for the next request.
    pub async fn receive(&self) -> ControlRequest {
        self.channel.receive().await
    }

    pub fn try_receive(&self) -> Option<ControlRequest> {
        self.channel.try_receive().ok()
    }

    pub fn pending(&self) -> usize {
        self.channel.len()
    }
}

impl Default for RequestChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable producer handle.
#[derive(Clone)]
pub struct RequestSender {
    channel: Arc<RequestQueue>,
}

impl RequestSender {
    /// Queue a request, waiting for room if the queue is full.
    pub async fn request(&self, request: impl Into<ControlRequest>) {
        let request = request.into();
        debug!("Queueing request: {:?}", request);
        self.channel.send(request).await;
    }

    pub fn try_request(&self, request: impl Into<ControlRequest>) -> Result<(), RequestError> {
        let request = request.into();
        match self.channel.try_send(request) {
            Ok(()) => {
                debug!("Queued request: {:?}", request);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(RequestError::RequestQueueFull),
        }
    }
}
