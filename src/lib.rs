//! NetSIO Hub - bridges the Atari SIO bus between an emulator and
//! emulated peripherals.
//!
//! The emulator speaks a TCP-framed custom-device protocol on localhost;
//! peripherals speak NetSIO, one UDP datagram per message. The hub
//! translates between the two, reconstructs SIO command frames for
//! logging, coalesces stray serial bytes into blocks, runs per-peripheral
//! flow control, and correlates the synchronous calls that pause the
//! emulator with their responses.
//!
//! ```text
//!  emulator (Atari800/Altirra)          FujiNet & friends
//!        │ TCP :9996                        │ UDP :9997
//!        ▼                                  ▼
//!  ┌───────────────┐    ┌─────┐    ┌────────────────────┐
//!  │ HostEndpoint  │◄──►│ Hub │◄──►│ PeripheralEndpoint │
//!  └───────────────┘    └─────┘    └────────────────────┘
//! ```

pub mod config;
pub mod host;
pub mod hub;
pub mod peripheral;
pub mod protocol;
pub mod queue;

pub use config::HubConfig;
pub use host::HostEndpoint;
pub use hub::{Hub, PeripheralLink};
pub use peripheral::PeripheralEndpoint;
pub use protocol::NetSioMsg;
