//! End-to-end support for the Tobira UI test harness.
//!
//! The crate ships `tobira-stub`, a stand-in for the Tobira backend that
//! accepts the command-line surface the harness drives, and the integration
//! suites that run whole worker lifecycles against it. Nothing here is a
//! dependency of the harness itself.
//!
//! - [`store`]: the stub's on-disk state, kept next to its configuration.
//! - [`protocol`]: the line protocol the stub serves and a client for it.

pub mod protocol;
pub mod store;

pub use protocol::{request, serve};
pub use store::{Store, StoreError, StubState};
