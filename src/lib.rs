pub mod call;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod media;
pub mod netmonitor;
pub mod ringtone;
pub mod utils;
pub mod version;

pub type Sample = i16;

// get timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    let now = std::time::SystemTime::now();
    now.duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
