//! Utility modules.
//!
//! Contains `QName` / Clark-notation handling.

pub mod qname;
