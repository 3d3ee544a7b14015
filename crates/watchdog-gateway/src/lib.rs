mod gateway;
mod rate_limit;
mod ssrf;

pub use gateway::Gateway;
pub use ssrf::is_blocked_address;
