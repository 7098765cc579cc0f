pub mod compactor;
pub mod config;
pub mod engine;
pub mod format;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod slug;
pub mod sql;
pub mod wal;
pub mod wire;
