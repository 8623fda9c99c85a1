//! Actor-based device registry
//!
//! Every component runs as an independent tokio task that owns its state and
//! talks to the rest of the system through its mailbox only.
//!
//! ## Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────┐
//!                  │  DeviceManagerActor  │  one per registry
//!                  └──────────┬───────────┘
//!                             │ spawns + watches
//!              ┌──────────────┴──────────────┐
//!              │                             │
//!    ┌─────────▼─────────┐         ┌─────────▼─────────┐
//!    │ DeviceGroupActor  │   ...   │ DeviceGroupActor  │  one per group id
//!    └─────────┬─────────┘         └───────────────────┘
//!              │ spawns + watches
//!      ┌───────┴────────┬──────────────────┐
//!      │                │                  │
//! ┌────▼────┐     ┌─────▼─────┐    ┌───────▼──────────┐
//! │ Device  │ ... │  Device   │    │ DeviceGroupQuery │  one per
//! │  Actor  │     │   Actor   │    │   (short-lived)  │  RequestAllTemperatures
//! └─────────┘     └───────────┘    └──────────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **DeviceManagerActor**: maps group ids to group registries
//! - **DeviceGroupActor**: maps device ids to device workers of one group
//! - **DeviceActor**: holds the latest reading of one device
//! - **DeviceGroupQuery**: collects one reading from every device of a group
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel
//! 2. **Replies**: requests carry a [`messages::ReplyTo`]; the handling worker
//!    answers the original caller directly
//! 3. **Lifecycle**: parents watch their children and receive a `Terminated`
//!    command when one stops, see [`worker::watch`]

pub mod device;
pub mod group;
pub mod manager;
pub mod messages;
pub mod query;
pub mod worker;
