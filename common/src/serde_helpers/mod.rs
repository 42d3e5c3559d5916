/// serde_with helper for hex-encoded bytes types.
pub mod hexstr_or_bytes;
/// `hexstr_or_bytes` but for [`Option`] bytes types.
pub mod hexstr_or_bytes_opt;
