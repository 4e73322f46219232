//! Nullable infrastructure for deterministic testing.
//!
//! The pool's collaborators (clock, chain, mempool, dialer) are abstracted
//! behind traits. This crate provides test-friendly implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically
//! - Never touch the network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod chain;
pub mod clock;
pub mod dialer;
pub mod mempool;

pub use chain::NullChain;
pub use clock::NullClock;
pub use dialer::NullDialer;
pub use mempool::NullMempool;
