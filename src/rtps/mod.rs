pub mod constant;
pub(crate) mod dp_event_loop;
pub mod message;
pub(crate) mod message_receiver;
pub(crate) mod reader;
pub(crate) mod rtps_reader_proxy;
pub(crate) mod rtps_writer_proxy;
pub mod submessage;
pub(crate) mod writer;
