//! DeviceGroupActor - Registry of the device workers of one group
//!
//! ## Message Flow
//!
//! ```text
//! TrackDevice(group, device)
//!     ├─ group != ours        ─► warn, drop (no reply)
//!     ├─ device tracked       ─► forward to device ─► DeviceRegistered ─► caller
//!     └─ device unknown       ─► spawn + watch device, then forward as above
//!
//! RequestDeviceList           ─► ReplyDeviceList ─► caller
//! RequestAllTemperatures      ─► spawn DeviceGroupQuery ─► RespondAllTemperatures ─► caller
//! Terminated(worker)          ─► untrack device (unknown worker: no-op)
//! ```
//!
//! A device that stops is never restarted. The next track request for the same
//! id simply creates a fresh worker with an empty reading.

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::registry::Registry;

use super::device::DeviceHandle;
use super::messages::{GroupCommand, Inbox, Reply, ReplyTo, RequestTrackDevice, TemperatureReading};
use super::query::DeviceGroupQuery;
use super::worker::{self, ExitReason, Lifecycle, Worker, WorkerId};

/// Actor tracking all devices of a single group
pub struct DeviceGroupActor {
    group_id: Arc<str>,

    /// Tracked devices by device id
    devices: Registry<String, DeviceHandle>,

    command_rx: mpsc::Receiver<GroupCommand>,

    /// Our own mailbox, handed to device watchers
    self_ref: mpsc::WeakSender<GroupCommand>,

    config: RegistryConfig,
}

impl DeviceGroupActor {
    /// Create a new group actor
    pub fn new(
        group_id: Arc<str>,
        command_rx: mpsc::Receiver<GroupCommand>,
        self_ref: mpsc::WeakSender<GroupCommand>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            group_id,
            devices: Registry::new(),
            command_rx,
            self_ref,
            config,
        }
    }

    /// Run the actor's main loop
    ///
    /// This runs until:
    /// - A Stop command is received
    /// - Every handle to the group has been dropped
    ///
    /// On exit, every tracked device is stopped.
    #[instrument(skip(self), fields(group = %self.group_id))]
    pub async fn run(mut self) {
        info!("device group {} started", self.group_id);

        while let Some(cmd) = self.command_rx.recv().await {
            if self.handle_command(cmd).await.is_break() {
                break;
            }
        }

        self.stop_devices().await;

        info!("device group {} stopped", self.group_id);
    }

    async fn handle_command(&mut self, cmd: GroupCommand) -> ControlFlow<()> {
        match cmd {
            GroupCommand::TrackDevice { request, reply_to } => {
                self.handle_track(request, reply_to).await;
            }

            GroupCommand::RequestDeviceList {
                request_id,
                reply_to,
            } => {
                reply_to.send(Reply::ReplyDeviceList {
                    request_id,
                    ids: self.devices.keys(),
                });
            }

            GroupCommand::RequestAllTemperatures {
                request_id,
                reply_to,
            } => {
                let snapshot = self
                    .devices
                    .iter()
                    .map(|(device_id, device)| (device_id.clone(), device.clone()))
                    .collect();

                DeviceGroupQuery::new(snapshot, request_id, reply_to, self.config.query_timeout())
                    .spawn();
            }

            GroupCommand::Terminated { worker, reason } => {
                self.handle_terminated(worker, reason);
            }

            GroupCommand::Stop => {
                debug!("received stop command");
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    async fn handle_track(&mut self, request: RequestTrackDevice, reply_to: ReplyTo) {
        if request.group_id != *self.group_id {
            warn!(
                "ignoring TrackDevice request for {}, this actor is responsible for {}",
                request.group_id, self.group_id
            );
            return;
        }

        let device = match self.devices.get(&request.device_id) {
            Some(device) if !device.is_closed() => device.clone(),

            // stopped, but its termination is still queued behind this request
            Some(stale) => {
                debug!(
                    "device {} ({}) already stopped, replacing it",
                    request.device_id,
                    stale.id()
                );
                self.devices.remove(&request.device_id);
                self.spawn_device(&request.device_id)
            }

            None => self.spawn_device(&request.device_id),
        };

        if let Err(e) = device.forward_track(request, reply_to).await {
            warn!("failed to forward TrackDevice: {e}");
        }
    }

    fn spawn_device(&mut self, device_id: &str) -> DeviceHandle {
        info!("creating device actor for {device_id}");

        let device = DeviceHandle::spawn(self.group_id.clone(), device_id, &self.config);
        self.adopt_device(device_id, device.clone());

        device
    }

    /// Watch `device` and track it under `device_id`
    fn adopt_device(&mut self, device_id: &str, device: DeviceHandle) {
        worker::watch(device.lifecycle(), self.self_ref.clone(), |worker, reason| {
            GroupCommand::Terminated { worker, reason }
        });
        self.devices.insert(device_id.to_string(), device);
    }

    fn handle_terminated(&mut self, worker: WorkerId, reason: ExitReason) {
        match self.devices.remove_worker(worker) {
            Some((device_id, _)) => {
                info!("device actor {device_id} ({worker}) terminated: {reason:?}");
            }
            None => {
                trace!("termination of untracked worker {worker}, ignoring");
            }
        }
    }

    async fn stop_devices(&mut self) {
        for (device_id, device) in self.devices.drain() {
            trace!("stopping device {device_id}");
            device.stop().await;
        }
    }
}

/// Handle for talking to a DeviceGroupActor
#[derive(Clone, Debug)]
pub struct DeviceGroupHandle {
    sender: mpsc::Sender<GroupCommand>,
    lifecycle: Lifecycle,
    group_id: Arc<str>,
    ask_timeout: Duration,
    query_timeout: Duration,
}

impl DeviceGroupHandle {
    /// Spawn a new group registry for `group_id`
    pub fn spawn(group_id: impl Into<Arc<str>>, config: &RegistryConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.mailbox_capacity.get());
        let group_id = group_id.into();

        let actor = DeviceGroupActor::new(
            group_id.clone(),
            cmd_rx,
            cmd_tx.downgrade(),
            config.clone(),
        );
        let lifecycle = worker::spawn(actor.run());

        Self {
            sender: cmd_tx,
            lifecycle,
            group_id,
            ask_timeout: config.ask_timeout(),
            query_timeout: config.query_timeout(),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn id(&self) -> WorkerId {
        self.lifecycle.id()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Send a track request; the device answers `reply_to` with `DeviceRegistered`
    pub async fn track_device(
        &self,
        request: RequestTrackDevice,
        reply_to: &ReplyTo,
    ) -> RegistryResult<()> {
        self.send(GroupCommand::TrackDevice {
            request,
            reply_to: reply_to.clone(),
        })
        .await
    }

    /// Ask for the tracked device ids; answered with `ReplyDeviceList`
    pub async fn request_device_list(
        &self,
        request_id: u64,
        reply_to: &ReplyTo,
    ) -> RegistryResult<()> {
        self.send(GroupCommand::RequestDeviceList {
            request_id,
            reply_to: reply_to.clone(),
        })
        .await
    }

    /// Ask for every device's reading; answered with `RespondAllTemperatures`
    pub async fn request_all_temperatures(
        &self,
        request_id: u64,
        reply_to: &ReplyTo,
    ) -> RegistryResult<()> {
        self.send(GroupCommand::RequestAllTemperatures {
            request_id,
            reply_to: reply_to.clone(),
        })
        .await
    }

    /// Track `device_id` in this group and wait for its handle
    pub async fn track(&self, device_id: &str) -> RegistryResult<DeviceHandle> {
        let mut inbox = Inbox::new();
        self.track_device(
            RequestTrackDevice::new(&*self.group_id, device_id),
            &inbox.reply_to(),
        )
        .await?;

        match inbox.recv_timeout(self.ask_timeout).await? {
            Reply::DeviceRegistered { device } => Ok(device),
            other => Err(RegistryError::UnexpectedReply {
                expected: "DeviceRegistered",
                got: other.kind(),
            }),
        }
    }

    /// Fetch the tracked device ids
    pub async fn device_list(&self, request_id: u64) -> RegistryResult<HashSet<String>> {
        let mut inbox = Inbox::new();
        self.request_device_list(request_id, &inbox.reply_to())
            .await?;

        match inbox.recv_timeout(self.ask_timeout).await? {
            Reply::ReplyDeviceList { ids, .. } => Ok(ids),
            other => Err(RegistryError::UnexpectedReply {
                expected: "ReplyDeviceList",
                got: other.kind(),
            }),
        }
    }

    /// Collect every device's reading
    pub async fn all_temperatures(
        &self,
        request_id: u64,
    ) -> RegistryResult<HashMap<String, TemperatureReading>> {
        let mut inbox = Inbox::new();
        self.request_all_temperatures(request_id, &inbox.reply_to())
            .await?;

        match inbox
            .recv_timeout(self.query_timeout + self.ask_timeout)
            .await?
        {
            Reply::RespondAllTemperatures { temperatures, .. } => Ok(temperatures),
            other => Err(RegistryError::UnexpectedReply {
                expected: "RespondAllTemperatures",
                got: other.kind(),
            }),
        }
    }

    /// Gracefully stop the group and its devices
    pub async fn stop(&self) {
        let _ = self.sender.send(GroupCommand::Stop).await;
    }

    /// Abort the group task, as if it crashed
    pub fn kill(&self) {
        self.lifecycle.kill();
    }

    /// Wait until the group has stopped
    pub async fn terminated(&self) -> ExitReason {
        self.lifecycle.terminated().await
    }

    async fn send(&self, cmd: GroupCommand) -> RegistryResult<()> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| RegistryError::MailboxClosed { worker: self.id() })
    }
}

impl Worker for DeviceGroupHandle {
    fn worker_id(&self) -> WorkerId {
        self.id()
    }
}

impl PartialEq for DeviceGroupHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for DeviceGroupHandle {}
