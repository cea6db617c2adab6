mod or_log;
pub use or_log::OrLog;

/// Current time as seconds since the UNIX epoch
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
