//! Test support: in-memory doubles for the broker seam, reachability and
//! user notification. Compiled into the library so integration tests and
//! downstream crates can drive the manager deterministically.

pub mod mocks;
