pub mod jwt;
pub mod kv_store;
pub mod plan_limits;
pub mod rate_limit;
