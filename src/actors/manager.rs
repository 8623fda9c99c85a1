//! DeviceManagerActor - Root registry of device groups
//!
//! Every tracking request enters the system here. The manager keeps one group
//! registry per group id, creating it the first time the id is seen, and relays
//! requests to it unmodified. Replies never pass back through the manager.
//!
//! ```text
//! TrackDevice(group, device) ─► group tracked? ──no──► spawn + watch group
//!                                     │                       │
//!                                     └───────────┬───────────┘
//!                                                 ▼
//!                                   forward to group ─► device ─► caller
//!
//! RequestDeviceList / RequestAllTemperatures(group)
//!     ├─ group tracked ─► forward to group ─► caller
//!     └─ group unknown ─► empty reply ─► caller
//!
//! Terminated(worker) ─► untrack group (unknown worker: no-op)
//! ```

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::registry::Registry;

use super::device::DeviceHandle;
use super::group::DeviceGroupHandle;
use super::messages::{Inbox, ManagerCommand, Reply, ReplyTo, RequestTrackDevice, TemperatureReading};
use super::worker::{self, ExitReason, Lifecycle, Worker, WorkerId};

/// Actor tracking all device groups
pub struct DeviceManagerActor {
    /// Tracked groups by group id
    groups: Registry<String, DeviceGroupHandle>,

    command_rx: mpsc::Receiver<ManagerCommand>,

    /// Our own mailbox, handed to group watchers
    self_ref: mpsc::WeakSender<ManagerCommand>,

    config: RegistryConfig,
}

impl DeviceManagerActor {
    /// Create a new manager actor
    pub fn new(
        command_rx: mpsc::Receiver<ManagerCommand>,
        self_ref: mpsc::WeakSender<ManagerCommand>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            groups: Registry::new(),
            command_rx,
            self_ref,
            config,
        }
    }

    /// Run the actor's main loop
    ///
    /// On exit, every tracked group (and with it every device) is stopped.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        info!("device manager started");

        while let Some(cmd) = self.command_rx.recv().await {
            if self.handle_command(cmd).await.is_break() {
                break;
            }
        }

        for (group_id, group) in self.groups.drain() {
            trace!("stopping group {group_id}");
            group.stop().await;
        }

        info!("device manager stopped");
    }

    async fn handle_command(&mut self, cmd: ManagerCommand) -> ControlFlow<()> {
        match cmd {
            ManagerCommand::TrackDevice { request, reply_to } => {
                let group = self.group_or_spawn(&request.group_id);
                if let Err(e) = group.track_device(request, &reply_to).await {
                    warn!("failed to forward TrackDevice: {e}");
                }
            }

            ManagerCommand::RequestDeviceList {
                group_id,
                request_id,
                reply_to,
            } => match self.live_group(&group_id) {
                Some(group) => {
                    if let Err(e) = group.request_device_list(request_id, &reply_to).await {
                        warn!("failed to forward RequestDeviceList: {e}");
                    }
                }
                None => reply_to.send(Reply::ReplyDeviceList {
                    request_id,
                    ids: HashSet::new(),
                }),
            },

            ManagerCommand::RequestAllTemperatures {
                group_id,
                request_id,
                reply_to,
            } => match self.live_group(&group_id) {
                Some(group) => {
                    if let Err(e) = group.request_all_temperatures(request_id, &reply_to).await {
                        warn!("failed to forward RequestAllTemperatures: {e}");
                    }
                }
                None => reply_to.send(Reply::RespondAllTemperatures {
                    request_id,
                    temperatures: HashMap::new(),
                }),
            },

            ManagerCommand::Terminated { worker, reason } => {
                self.handle_terminated(worker, reason);
            }

            ManagerCommand::Stop => {
                debug!("received stop command");
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    /// The tracked group for `group_id`, if it is still running
    fn live_group(&self, group_id: &str) -> Option<DeviceGroupHandle> {
        self.groups
            .get(group_id)
            .filter(|group| !group.is_closed())
            .cloned()
    }

    fn group_or_spawn(&mut self, group_id: &str) -> DeviceGroupHandle {
        if let Some(group) = self.live_group(group_id) {
            return group;
        }

        if self.groups.remove(group_id).is_some() {
            debug!("group {group_id} already stopped, replacing it");
        }

        info!("creating device group actor for {group_id}");

        let group = DeviceGroupHandle::spawn(group_id, &self.config);
        worker::watch(group.lifecycle(), self.self_ref.clone(), |worker, reason| {
            ManagerCommand::Terminated { worker, reason }
        });
        self.groups.insert(group_id.to_string(), group.clone());

        group
    }

    fn handle_terminated(&mut self, worker: WorkerId, reason: ExitReason) {
        match self.groups.remove_worker(worker) {
            Some((group_id, _)) => {
                info!("device group actor {group_id} ({worker}) terminated: {reason:?}");
            }
            None => {
                trace!("termination of untracked worker {worker}, ignoring");
            }
        }
    }
}

/// Handle for talking to the DeviceManagerActor
///
/// This is the entry point of the whole registry tree.
#[derive(Clone, Debug)]
pub struct DeviceManagerHandle {
    sender: mpsc::Sender<ManagerCommand>,
    lifecycle: Lifecycle,
    ask_timeout: Duration,
    query_timeout: Duration,
}

impl DeviceManagerHandle {
    /// Spawn a new device manager
    pub fn spawn(config: &RegistryConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.mailbox_capacity.get());

        let actor = DeviceManagerActor::new(cmd_rx, cmd_tx.downgrade(), config.clone());
        let lifecycle = worker::spawn(actor.run());

        Self {
            sender: cmd_tx,
            lifecycle,
            ask_timeout: config.ask_timeout(),
            query_timeout: config.query_timeout(),
        }
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
        self.send(ManagerCommand::TrackDevice {
            request,
            reply_to: reply_to.clone(),
        })
        .await
    }

    /// Ask a group for its device ids; answered with `ReplyDeviceList`
    pub async fn request_device_list(
        &self,
        group_id: &str,
        request_id: u64,
        reply_to: &ReplyTo,
    ) -> RegistryResult<()> {
        self.send(ManagerCommand::RequestDeviceList {
            group_id: group_id.to_string(),
            request_id,
            reply_to: reply_to.clone(),
        })
        .await
    }

    /// Ask a group for every device's reading; answered with `RespondAllTemperatures`
    pub async fn request_all_temperatures(
        &self,
        group_id: &str,
        request_id: u64,
        reply_to: &ReplyTo,
    ) -> RegistryResult<()> {
        self.send(ManagerCommand::RequestAllTemperatures {
            group_id: group_id.to_string(),
            request_id,
            reply_to: reply_to.clone(),
        })
        .await
    }

    /// Track `(group_id, device_id)` and wait for the device handle
    pub async fn track(&self, group_id: &str, device_id: &str) -> RegistryResult<DeviceHandle> {
        let mut inbox = Inbox::new();
        self.track_device(RequestTrackDevice::new(group_id, device_id), &inbox.reply_to())
            .await?;

        match inbox.recv_timeout(self.ask_timeout).await? {
            Reply::DeviceRegistered { device } => Ok(device),
            other => Err(RegistryError::UnexpectedReply {
                expected: "DeviceRegistered",
                got: other.kind(),
            }),
        }
    }

    /// Fetch the device ids tracked in `group_id`
    pub async fn device_list(
        &self,
        group_id: &str,
        request_id: u64,
    ) -> RegistryResult<HashSet<String>> {
        let mut inbox = Inbox::new();
        self.request_device_list(group_id, request_id, &inbox.reply_to())
            .await?;

        match inbox.recv_timeout(self.ask_timeout).await? {
            Reply::ReplyDeviceList { ids, .. } => Ok(ids),
            other => Err(RegistryError::UnexpectedReply {
                expected: "ReplyDeviceList",
                got: other.kind(),
            }),
        }
    }

    /// Collect every device's reading in `group_id`
    pub async fn all_temperatures(
        &self,
        group_id: &str,
        request_id: u64,
    ) -> RegistryResult<HashMap<String, TemperatureReading>> {
        let mut inbox = Inbox::new();
        self.request_all_temperatures(group_id, request_id, &inbox.reply_to())
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

    /// Gracefully stop the manager, its groups and their devices
    pub async fn stop(&self) {
        let _ = self.sender.send(ManagerCommand::Stop).await;
    }

    /// Abort the manager task, as if it crashed
    pub fn kill(&self) {
        self.lifecycle.kill();
    }

    /// Wait until the manager has stopped
    pub async fn terminated(&self) -> ExitReason {
        self.lifecycle.terminated().await
    }

    async fn send(&self, cmd: ManagerCommand) -> RegistryResult<()> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| RegistryError::MailboxClosed { worker: self.id() })
    }
}

impl Worker for DeviceManagerHandle {
    fn worker_id(&self) -> WorkerId {
        self.id()
    }
}
