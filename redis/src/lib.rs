//! Redis hold store for boxoffice.
//!
//! Every pool is a small set of keys updated by Lua scripts, so claiming
//! units is a single atomic step on the Redis server no matter how many
//! application instances race for the same pool.
//!
//! # Example
//!
//! ```no_run
//! use boxoffice_redis::RedisHoldStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisHoldStore::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod hold_store;
mod scripts;

pub use hold_store::RedisHoldStore;
