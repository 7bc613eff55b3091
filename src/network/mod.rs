pub mod constant;
pub mod transport;
pub(crate) mod udp_listener;
pub mod udp_sender;
pub(crate) mod util;
