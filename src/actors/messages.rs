//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: each actor owns one mpsc mailbox and a command enum for it
//! 2. **Replies**: every request carries a [`ReplyTo`]; relays pass it along untouched,
//!    so the worker that finally handles a request answers the original caller
//! 3. **Termination**: a stopped child shows up as a `Terminated` command on its
//!    parent's mailbox, ordered with all other traffic

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{RegistryError, RegistryResult};

use super::device::DeviceHandle;
use super::worker::{ExitReason, WorkerId};

/// Ask for the device `(group_id, device_id)` to be tracked
///
/// Answered with [`Reply::DeviceRegistered`] by the device worker itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTrackDevice {
    pub group_id: String,
    pub device_id: String,
}

impl RequestTrackDevice {
    pub fn new(group_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            device_id: device_id.into(),
        }
    }
}

/// Commands that can be sent to a DeviceActor
#[derive(Debug)]
pub enum DeviceCommand {
    /// Forwarded by the owning group, answered with `DeviceRegistered`
    TrackDevice {
        request: RequestTrackDevice,
        reply_to: ReplyTo,
    },

    /// Overwrite the stored reading
    RecordTemperature {
        request_id: u64,
        value: f64,
        reply_to: ReplyTo,
    },

    /// Read the stored reading, if any
    ReadTemperature { request_id: u64, reply_to: ReplyTo },

    /// Stop the device
    Stop,
}

/// Commands that can be sent to a DeviceGroupActor
#[derive(Debug)]
pub enum GroupCommand {
    /// Route to (creating if needed) the device worker
    TrackDevice {
        request: RequestTrackDevice,
        reply_to: ReplyTo,
    },

    /// List the ids of all currently tracked devices
    RequestDeviceList { request_id: u64, reply_to: ReplyTo },

    /// Collect the readings of all currently tracked devices
    RequestAllTemperatures { request_id: u64, reply_to: ReplyTo },

    /// A watched device stopped
    Terminated { worker: WorkerId, reason: ExitReason },

    /// Stop the group and every device in it
    Stop,
}

/// Commands that can be sent to the DeviceManagerActor
#[derive(Debug)]
pub enum ManagerCommand {
    /// Route to (creating if needed) the group registry
    TrackDevice {
        request: RequestTrackDevice,
        reply_to: ReplyTo,
    },

    /// Relay a device list query to the group registry for `group_id`
    RequestDeviceList {
        group_id: String,
        request_id: u64,
        reply_to: ReplyTo,
    },

    /// Relay an all-temperatures query to the group registry for `group_id`
    RequestAllTemperatures {
        group_id: String,
        request_id: u64,
        reply_to: ReplyTo,
    },

    /// A watched group stopped
    Terminated { worker: WorkerId, reason: ExitReason },

    /// Stop the manager, every group and every device
    Stop,
}

/// Outcome for a single device in an all-temperatures query
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum TemperatureReading {
    /// The device answered with a reading
    Temperature(f64),

    /// The device answered, but has not recorded anything yet
    TemperatureNotAvailable,

    /// The device stopped before answering
    DeviceNotAvailable,

    /// The device did not answer before the query deadline
    DeviceTimedOut,
}

/// Replies delivered to a caller's [`Inbox`]
#[derive(Debug, Clone)]
pub enum Reply {
    /// Routing succeeded; `device` is the worker that answered
    DeviceRegistered { device: DeviceHandle },

    TemperatureRecorded {
        request_id: u64,
    },

    RespondTemperature {
        request_id: u64,
        value: Option<f64>,
    },

    ReplyDeviceList {
        request_id: u64,
        ids: HashSet<String>,
    },

    RespondAllTemperatures {
        request_id: u64,
        temperatures: HashMap<String, TemperatureReading>,
    },
}

impl Reply {
    /// Variant name, for logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::DeviceRegistered { .. } => "DeviceRegistered",
            Reply::TemperatureRecorded { .. } => "TemperatureRecorded",
            Reply::RespondTemperature { .. } => "RespondTemperature",
            Reply::ReplyDeviceList { .. } => "ReplyDeviceList",
            Reply::RespondAllTemperatures { .. } => "RespondAllTemperatures",
        }
    }
}

/// Where a worker sends its answer
///
/// Cloned into every request. Sending never blocks; if the caller is gone the
/// reply is dropped.
#[derive(Debug, Clone)]
pub struct ReplyTo(mpsc::UnboundedSender<Reply>);

impl ReplyTo {
    pub fn send(&self, reply: Reply) {
        let kind = reply.kind();
        if self.0.send(reply).is_err() {
            trace!("requester went away, dropping {kind}");
        }
    }
}

/// Caller-side mailbox for replies
///
/// The inbox keeps its own sender, so the channel stays open for as long as the
/// inbox lives: a request that is dropped somewhere along the way is observed as
/// silence (a timeout), never as a closed channel.
#[derive(Debug)]
pub struct Inbox {
    tx: mpsc::UnboundedSender<Reply>,
    rx: mpsc::UnboundedReceiver<Reply>,
}

impl Inbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Reply destination to attach to outgoing requests
    pub fn reply_to(&self) -> ReplyTo {
        ReplyTo(self.tx.clone())
    }

    /// Wait for the next reply
    pub async fn recv(&mut self) -> Option<Reply> {
        self.rx.recv().await
    }

    /// Wait for the next reply, giving up after `after`
    pub async fn recv_timeout(&mut self, after: Duration) -> RegistryResult<Reply> {
        match tokio::time::timeout(after, self.rx.recv()).await {
            Ok(Some(reply)) => Ok(reply),
            // unreachable while we hold `tx`, but a timeout is the honest answer
            Ok(None) | Err(_) => Err(RegistryError::Timeout { after }),
        }
    }

    /// Take a reply if one is already waiting
    pub fn try_recv(&mut self) -> Option<Reply> {
        self.rx.try_recv().ok()
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}
