pub mod cache_change;
pub mod duration;
pub mod guid;
pub mod history_cache;
pub mod instance_handle;
pub mod locator;
pub mod sequence_number;
pub mod time;
