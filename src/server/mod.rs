//! Reference store server: TTL key store, request dispatch, access control,
//! backing store file and admin API

pub mod acl;
pub mod admin;
pub mod handler;
pub mod memfile;
pub mod server;
pub mod store;

pub use acl::{Acl, AclRule};
pub use admin::AdminState;
pub use handler::dispatch;
pub use server::{KvServer, ListenAddr};
pub use store::{
    spawn_expiry_sweeper, Clock, KeyStore, ManualClock, MonotonicClock, StoreStats,
};
