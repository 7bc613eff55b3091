pub mod header;
pub mod parameter_list;
pub mod serialized_payload;
pub mod submessages;
pub mod vendor_id;
