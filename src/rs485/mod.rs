//! RS485 protocol engine: frame codec, bus arbitration, serial transport,
//! outbound command queue and the session loop that ties them together.

pub mod arbitration;
pub mod commands;
pub mod frame;
pub mod serial;
pub mod serial_mock;
pub mod session;

pub use arbitration::{ArbitrationAction, BusAddress, BusArbitration};
pub use commands::{CommandEncoder, FilterCycleRequest, PendingCommand};
pub use frame::{compute_fcs, is_valid, pack_frame, parse_frame, SpaFrame};
pub use serial::{SerialConfig, SpaDeviceHandle};
pub use session::Rs485Session;
