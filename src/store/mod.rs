//! Persistent state: the key-value store and the role bindings on top of it

mod kv;
mod roles;

pub use kv::{FileStore, KvStore, MemoryStore};
pub use roles::{Role, RoleAddrs, RoleStore};
