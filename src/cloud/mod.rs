//! Cloud side of the gateway: protobuf envelope codec, the uplink
//! dispatcher with its retry cache, and the downlink subscriber.

pub mod downlink;
pub mod proto;
pub mod uplink;

pub use downlink::{DownlinkHandler, DownlinkSubscriber};
pub use proto::{
    decode_downlink, encode_uplink, DownlinkPayload, EnvelopeHeader, FaultLogsMessage,
    RegistrationMessage, Request, RequestType, SpaStateMessage, UplinkCommandType,
};
pub use uplink::{QueuedUplink, UplinkDispatcher};
