//! DeviceGroupQuery - Collects one reading from every device of a group
//!
//! Spawned by a group for each `RequestAllTemperatures`. The query works on a
//! snapshot of the group's devices taken when the request was dequeued and lives
//! only until it has answered:
//!
//! ```text
//! ReadTemperature ─► every device
//!
//! until every device is settled or the deadline passes:
//!   RespondTemperature(Some) ─► Temperature(v)
//!   RespondTemperature(None) ─► TemperatureNotAvailable
//!   device terminated        ─► DeviceNotAvailable
//!   deadline                 ─► DeviceTimedOut (for all remaining)
//!
//! RespondAllTemperatures ─► original caller
//! ```

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use futures::future;
use futures::stream::FuturesUnordered;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

use super::device::DeviceHandle;
use super::messages::{Inbox, Reply, ReplyTo, TemperatureReading};
use super::worker::{self, Lifecycle};

pub struct DeviceGroupQuery {
    /// Devices to ask, by device id
    devices: Vec<(String, DeviceHandle)>,

    /// Correlation token of the original request
    request_id: u64,

    /// Where the collected result goes
    reply_to: ReplyTo,

    timeout: Duration,
}

impl DeviceGroupQuery {
    pub fn new(
        devices: Vec<(String, DeviceHandle)>,
        request_id: u64,
        reply_to: ReplyTo,
        timeout: Duration,
    ) -> Self {
        Self {
            devices,
            request_id,
            reply_to,
            timeout,
        }
    }

    /// Run the query as its own worker
    pub fn spawn(self) -> Lifecycle {
        worker::spawn(self.run())
    }

    #[instrument(skip(self), fields(request_id = self.request_id, devices = self.devices.len()))]
    pub async fn run(self) {
        debug!("starting temperature query");

        let mut inbox = Inbox::new();
        let reply_to = inbox.reply_to();

        let device_count = self.devices.len();
        let mut temperatures = HashMap::with_capacity(device_count);

        // the deadline covers the sends too: a device with a full mailbox must not
        // hold up the whole query
        let deadline = Instant::now() + self.timeout;

        // our own correlation ids: index into the snapshot
        let sends = (0u64..).zip(self.devices).map(|(query_id, (device_id, device))| {
            let reply_to = reply_to.clone();
            async move {
                let sent =
                    tokio::time::timeout_at(deadline, device.read_temperature(query_id, &reply_to))
                        .await;
                (query_id, device_id, device, sent)
            }
        });

        let mut pending = HashMap::with_capacity(device_count);
        let mut terminations = FuturesUnordered::new();

        for (query_id, device_id, device, sent) in future::join_all(sends).await {
            match sent {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    trace!("{device_id} is already gone");
                    temperatures.insert(device_id, TemperatureReading::DeviceNotAvailable);
                    continue;
                }
                Err(_) => {
                    trace!("{device_id} did not accept the request in time");
                    temperatures.insert(device_id, TemperatureReading::DeviceTimedOut);
                    continue;
                }
            }

            pending.insert(query_id, device_id);

            let lifecycle = device.lifecycle().clone();
            terminations.push(async move {
                lifecycle.terminated().await;
                query_id
            });
        }

        let deadline = tokio::time::sleep_until(deadline);
        tokio::pin!(deadline);

        while !pending.is_empty() {
            tokio::select! {
                // a device answers before it stops, so answers win over terminations
                biased;

                Some(reply) = inbox.recv() => {
                    let kind = reply.kind();
                    let Reply::RespondTemperature { request_id, value } = reply else {
                        trace!("ignoring unexpected {kind}");
                        continue;
                    };

                    if let Some(device_id) = pending.remove(&request_id) {
                        let reading = match value {
                            Some(value) => TemperatureReading::Temperature(value),
                            None => TemperatureReading::TemperatureNotAvailable,
                        };
                        temperatures.insert(device_id, reading);
                    }
                }

                Some(query_id) = terminations.next() => {
                    if let Some(device_id) = pending.remove(&query_id) {
                        trace!("{device_id} stopped before answering");
                        temperatures.insert(device_id, TemperatureReading::DeviceNotAvailable);
                    }
                }

                _ = &mut deadline => {
                    debug!("{} device(s) did not answer in time", pending.len());
                    for (_, device_id) in pending.drain() {
                        temperatures.insert(device_id, TemperatureReading::DeviceTimedOut);
                    }
                }
            }
        }

        self.reply_to.send(Reply::RespondAllTemperatures {
            request_id: self.request_id,
            temperatures,
        });

        debug!("temperature query finished");
    }
}
