pub mod builtin_endpoint;
#[allow(clippy::module_inception)]
pub(crate) mod discovery;
pub(crate) mod discovery_db;
pub mod matching;
pub mod pl_cdr;
pub mod sedp_messages;
pub mod spdp_participant_data;
