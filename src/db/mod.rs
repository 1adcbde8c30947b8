pub mod cache;
pub mod sqlite;

pub use cache::{create_redis_client, CacheKey, MemoryCache, Memoizer, RedisCache};
pub use sqlite::AggregateStore;
