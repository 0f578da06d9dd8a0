//! Process exit codes. Part of the operator contract.

pub const SUCCESS: i32 = 0;
pub const RUN_FAILED: i32 = 1; // Pipeline run ended in the failed stage
pub const CONFIG_ERROR: i32 = 2; // Configuration missing, unparsable or invalid
pub const STORE_ERROR: i32 = 3; // Run store could not be opened, read or written
