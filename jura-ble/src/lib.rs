//! BLE session layer for Jura machines.
//!
//! Jura machines keep no standing connection: the app connects while the
//! user interacts, reads a heartbeat characteristic every few seconds to
//! keep the link alive and to learn the current cipher key, and drops the
//! link once the user goes idle. [`Session`] owns that loop; [`Link`] is
//! the seam between the loop and the actual GATT transport, implemented for
//! btleplug peripherals by [`BleLink`].

mod ble;
mod session;

pub use ble::{BleLink, DiscoveredMachine, find_machine, scan};
pub use session::{
    ACTIVE_WINDOW, COMMAND_WINDOW, HEARTBEAT_INTERVAL, Link, LinkError, RETRY_BACKOFF, Session,
};
