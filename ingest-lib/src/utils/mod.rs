mod datetime;
mod filesystem;
mod string;

pub use datetime::{get_local_datetime_with_format, get_utc_iso_datetime, system_time_to_utc};
pub use filesystem::{append_log_entry, write_error_to_log};
pub use string::{
    MAX_COLUMN_NAME_LEN, is_safe_file_name, normalize_token, sanitize_column_name, truncate_chars,
};
