//! DeviceActor - Holds the latest reading of one physical sensor
//!
//! ## Message Flow
//!
//! ```text
//! RecordTemperature ─► overwrite reading ─► TemperatureRecorded ─► caller
//! ReadTemperature   ─► current reading   ─► RespondTemperature  ─► caller
//! TrackDevice       ─► ids match?        ─► DeviceRegistered    ─► caller
//! ```
//!
//! The device never fails: every message that reaches it is answered, except
//! track requests for another device, which are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};

use super::messages::{DeviceCommand, Inbox, Reply, ReplyTo, RequestTrackDevice};
use super::worker::{self, ExitReason, Lifecycle, Worker, WorkerId};

/// Actor owning the reading of a single device
pub struct DeviceActor {
    group_id: Arc<str>,
    device_id: Arc<str>,

    /// Latest recorded reading, absent until the first record
    last_reading: Option<f64>,

    command_rx: mpsc::Receiver<DeviceCommand>,

    /// Handle to ourselves, sent along with `DeviceRegistered`
    ///
    /// Held weakly so that the device still stops once every outside handle is gone.
    self_ref: mpsc::WeakSender<DeviceCommand>,

    lifecycle: Option<Lifecycle>,
    ask_timeout: Duration,
}

impl DeviceActor {
    /// Run the actor's main loop
    ///
    /// This runs until:
    /// - A Stop command is received
    /// - Every handle to the device has been dropped
    #[instrument(skip(self), fields(group = %self.group_id, device = %self.device_id))]
    pub async fn run(mut self) {
        debug!("starting device actor");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                DeviceCommand::TrackDevice { request, reply_to } => {
                    self.handle_track(request, reply_to);
                }

                DeviceCommand::RecordTemperature {
                    request_id,
                    value,
                    reply_to,
                } => {
                    trace!("recording temperature {value} (request {request_id})");
                    self.last_reading = Some(value);
                    reply_to.send(Reply::TemperatureRecorded { request_id });
                }

                DeviceCommand::ReadTemperature {
                    request_id,
                    reply_to,
                } => {
                    reply_to.send(Reply::RespondTemperature {
                        request_id,
                        value: self.last_reading,
                    });
                }

                DeviceCommand::Stop => {
                    debug!("received stop command");
                    break;
                }
            }
        }

        debug!("device actor stopped");
    }

    fn handle_track(&self, request: RequestTrackDevice, reply_to: ReplyTo) {
        if request.group_id != *self.group_id || request.device_id != *self.device_id {
            warn!(
                "ignoring TrackDevice request for {}/{}, this actor is responsible for {}/{}",
                request.group_id, request.device_id, self.group_id, self.device_id
            );
            return;
        }

        let (Some(sender), Some(lifecycle)) = (self.self_ref.upgrade(), self.lifecycle.clone())
        else {
            // nobody outside can reach us anymore, so nobody is waiting for this
            trace!("device is unreachable, not registering");
            return;
        };

        reply_to.send(Reply::DeviceRegistered {
            device: DeviceHandle {
                sender,
                lifecycle,
                group_id: self.group_id.clone(),
                device_id: self.device_id.clone(),
                ask_timeout: self.ask_timeout,
            },
        });
    }
}

/// Handle for talking to a DeviceActor
///
/// Cheap to clone. Two handles are equal if they point at the same worker.
#[derive(Clone, Debug)]
pub struct DeviceHandle {
    sender: mpsc::Sender<DeviceCommand>,
    lifecycle: Lifecycle,
    group_id: Arc<str>,
    device_id: Arc<str>,
    ask_timeout: Duration,
}

impl DeviceHandle {
    /// Spawn a new device actor bound to `(group_id, device_id)`
    pub fn spawn(
        group_id: impl Into<Arc<str>>,
        device_id: impl Into<Arc<str>>,
        config: &RegistryConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.mailbox_capacity.get());
        let group_id = group_id.into();
        let device_id = device_id.into();

        let mut actor = DeviceActor {
            group_id: group_id.clone(),
            device_id: device_id.clone(),
            last_reading: None,
            command_rx: cmd_rx,
            self_ref: cmd_tx.downgrade(),
            lifecycle: None,
            ask_timeout: config.ask_timeout(),
        };

        // the actor needs its own lifecycle to hand out handles, so spawn a
        // future that waits for it before running
        let (lifecycle_tx, lifecycle_rx) = tokio::sync::oneshot::channel();
        let lifecycle = worker::spawn(async move {
            actor.lifecycle = lifecycle_rx.await.ok();
            actor.run().await;
        });
        let _ = lifecycle_tx.send(lifecycle.clone());

        Self {
            sender: cmd_tx,
            lifecycle,
            group_id,
            device_id,
            ask_timeout: config.ask_timeout(),
        }
    }

    /// A handle around a bare mailbox, for exercising callers against a device
    /// that never answers
    #[cfg(test)]
    pub(crate) fn from_parts_for_test(
        sender: mpsc::Sender<DeviceCommand>,
        group_id: &str,
        device_id: &str,
    ) -> Self {
        Self {
            sender,
            lifecycle: worker::spawn(std::future::pending()),
            group_id: group_id.into(),
            device_id: device_id.into(),
            ask_timeout: RegistryConfig::default().ask_timeout(),
        }
    }

    /// A device whose worker panics once `trigger` fires
    #[cfg(test)]
    pub(crate) fn crashing_for_test(
        group_id: &str,
        device_id: &str,
        trigger: tokio::sync::oneshot::Receiver<()>,
    ) -> Self {
        async fn crash_on(
            _mailbox: mpsc::Receiver<DeviceCommand>,
            trigger: tokio::sync::oneshot::Receiver<()>,
        ) {
            let _ = trigger.await;
            panic!("sensor on fire");
        }

        let (sender, mailbox) = mpsc::channel(1);
        Self {
            sender,
            lifecycle: worker::spawn(crash_on(mailbox, trigger)),
            group_id: group_id.into(),
            device_id: device_id.into(),
            ask_timeout: RegistryConfig::default().ask_timeout(),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn id(&self) -> WorkerId {
        self.lifecycle.id()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Whether the device can still receive messages
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Forward a track request, keeping the original reply destination
    pub(crate) async fn forward_track(
        &self,
        request: RequestTrackDevice,
        reply_to: ReplyTo,
    ) -> RegistryResult<()> {
        self.send(DeviceCommand::TrackDevice { request, reply_to })
            .await
    }

    /// Ask the device to record `value`; answered with `TemperatureRecorded`
    pub async fn record_temperature(
        &self,
        request_id: u64,
        value: f64,
        reply_to: &ReplyTo,
    ) -> RegistryResult<()> {
        self.send(DeviceCommand::RecordTemperature {
            request_id,
            value,
            reply_to: reply_to.clone(),
        })
        .await
    }

    /// Ask the device for its reading; answered with `RespondTemperature`
    pub async fn read_temperature(&self, request_id: u64, reply_to: &ReplyTo) -> RegistryResult<()> {
        self.send(DeviceCommand::ReadTemperature {
            request_id,
            reply_to: reply_to.clone(),
        })
        .await
    }

    /// Record `value` and wait for the acknowledgement
    pub async fn record(&self, request_id: u64, value: f64) -> RegistryResult<()> {
        let mut inbox = Inbox::new();
        self.record_temperature(request_id, value, &inbox.reply_to())
            .await?;

        match inbox.recv_timeout(self.ask_timeout).await? {
            Reply::TemperatureRecorded { .. } => Ok(()),
            other => Err(RegistryError::UnexpectedReply {
                expected: "TemperatureRecorded",
                got: other.kind(),
            }),
        }
    }

    /// Read the current reading and wait for the answer
    pub async fn temperature(&self, request_id: u64) -> RegistryResult<Option<f64>> {
        let mut inbox = Inbox::new();
        self.read_temperature(request_id, &inbox.reply_to()).await?;

        match inbox.recv_timeout(self.ask_timeout).await? {
            Reply::RespondTemperature { value, .. } => Ok(value),
            other => Err(RegistryError::UnexpectedReply {
                expected: "RespondTemperature",
                got: other.kind(),
            }),
        }
    }

    /// Gracefully stop the device
    pub async fn stop(&self) {
        let _ = self.sender.send(DeviceCommand::Stop).await;
    }

    /// Abort the device task, as if it crashed
    pub fn kill(&self) {
        self.lifecycle.kill();
    }

    /// Wait until the device has stopped
    pub async fn terminated(&self) -> ExitReason {
        self.lifecycle.terminated().await
    }

    async fn send(&self, cmd: DeviceCommand) -> RegistryResult<()> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| RegistryError::MailboxClosed { worker: self.id() })
    }
}

impl Worker for DeviceHandle {
    fn worker_id(&self) -> WorkerId {
        self.id()
    }
}

impl PartialEq for DeviceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for DeviceHandle {}
