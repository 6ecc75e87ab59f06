//! Peripheral-side (UDP) endpoint: client lifecycle, flow control, and
//! inbound byte coalescing.

pub mod clients;
pub mod coalesce;
pub mod endpoint;

pub use clients::{ClientTable, PeripheralClient};
pub use coalesce::InboundBuffer;
pub use endpoint::PeripheralEndpoint;
