//! This module contains various utility modules.

pub mod log;
pub mod shutdown;
