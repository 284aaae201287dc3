// Database connectivity: Postgres pool and Redis connection manager

pub mod pool;
pub mod redis;

pub use pool::DbPool;
pub use redis::RedisPool;
