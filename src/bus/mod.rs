//! Bus adapters: the pub/sub + key-value substrate behind all
//! inter-component communication.

pub mod adapter;
pub mod memory;
pub mod redis;

pub use adapter::{Backoff, Bus, Subscription};
pub use memory::MemoryBus;
pub use self::redis::RedisBus;
