pub mod ack_nack;
pub mod data;
pub mod gap;
pub mod heartbeat;
pub mod info_destination;
pub mod info_timestamp;
pub mod submessage_flag;
pub mod submessage_header;
pub mod submessage_kind;
#[allow(clippy::module_inception)]
pub mod submessages;
