#[cfg(feature = "sources-redis")]
pub mod redis;
