use deadpool_redis::redis;
use rand::distr::{Alphanumeric, SampleString};

pub fn random_string() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 16)
}

pub fn redis_url() -> String {
    dotenvy::from_filename(".env.test").ok();
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

pub fn redis_pool() -> deadpool_redis::Pool {
    deadpool_redis::Config::from_url(redis_url())
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("Failed to create Redis pool")
}

pub fn redis_client() -> redis::Client {
    redis::Client::open(redis_url()).expect("Failed to create Redis client")
}
