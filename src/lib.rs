pub mod actors;
pub mod config;
pub mod error;
pub mod registry;

pub use actors::device::DeviceHandle;
pub use actors::group::DeviceGroupHandle;
pub use actors::manager::DeviceManagerHandle;
pub use actors::messages::{Inbox, Reply, ReplyTo, RequestTrackDevice, TemperatureReading};
pub use actors::worker::{ExitReason, WorkerId};
pub use config::RegistryConfig;
pub use error::{RegistryError, RegistryResult};
