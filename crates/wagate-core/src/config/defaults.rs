//! Serde default functions for config fields.

pub(super) fn default_true() -> bool {
    true
}
pub(super) fn default_name() -> String {
    "wagate".to_string()
}
pub(super) fn default_data_dir() -> String {
    "~/.wagate".to_string()
}
pub(super) fn default_log_level() -> String {
    "info".to_string()
}
pub(super) fn default_db_path() -> String {
    "~/.wagate/data/wagate.db".to_string()
}
pub(super) fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
pub(super) fn default_api_port() -> u16 {
    3700
}
pub(super) fn default_max_body_mb() -> usize {
    32
}
pub(super) fn default_device_name() -> String {
    "wagate".to_string()
}
pub(super) fn default_qr_timeout() -> u64 {
    30
}
pub(super) fn default_pair_timeout() -> u64 {
    60
}
pub(super) fn default_max_message_len() -> usize {
    4096
}
pub(super) fn default_upload_dir() -> String {
    "~/.wagate/uploads".to_string()
}
pub(super) fn default_max_file_mb() -> usize {
    16
}
pub(super) fn default_bulk_delay() -> u64 {
    1000
}
pub(super) fn default_max_recipients() -> usize {
    500
}
