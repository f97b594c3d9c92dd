//! Exit codes for the `gridav` binary.
//!
//! These follow common Unix conventions so service managers and scripts
//! can tell a bad invocation from a bad configuration file.

/// Successful execution
pub const SUCCESS: u8 = 0;

/// General/unspecified error
pub const GENERAL_ERROR: u8 = 1;

/// Command-line usage error (bad arguments)
pub const USAGE_ERROR: u8 = 2;

/// Configuration file missing, unreadable or invalid
pub const CONFIG_ERROR: u8 = 3;
