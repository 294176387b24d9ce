//! Testing infrastructure for sitetrack.
//!
//! # Architecture
//!
//! - **Mocks**: a manual [`Clock`](crate::clock::Clock) for deterministic
//!   backoff and throttle tests. Remote services are doubled by
//!   [`InMemoryBackend`](crate::remote::InMemoryBackend).
//! - **Fixtures**: entity builders and a seeded demo project
//! - **Assertions**: engine-level assertions with descriptive failures
//!
//! # Example
//!
//! ```rust,ignore
//! use sitetrack::testing::{depot_fixture, ManualClock};
//! use sitetrack::InMemoryBackend;
//!
//! let backend = InMemoryBackend::from_fixture(depot_fixture());
//! let clock = ManualClock::new();
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mocks;

// Re-export commonly used types
pub use assertions::*;
pub use fixtures::*;
pub use mocks::*;
