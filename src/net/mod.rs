//! Network-level building blocks shared by listeners.

pub mod tls;
