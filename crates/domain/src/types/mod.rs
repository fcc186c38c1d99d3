//! Domain types and models

pub mod command;
pub mod credential;
pub mod device;
pub mod group;

pub use command::{CommandKind, DeviceCommand, RefillCartridge};
pub use credential::{Credential, LoginGrant};
pub use device::{DeviceInfo, DeviceParams, DeviceState, DeviceStatus};
pub use group::{CreatedGroup, DeviceGroup, GroupList, GroupRequest, GroupUpdate, NodeList};
