/// Suffix of timestamped backup artifacts and rotated logs.
pub const FILE_STAMP: &str = "%Y%m%d_%H%M%S";

/// Prefix of every line written to the monitor's text files.
pub const LINE_STAMP: &str = "%Y-%m-%d %H:%M:%S";
