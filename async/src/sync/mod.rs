//! Synchronization primitives with platform-appropriate implementations.
//!
//! # Submodules
//!
//! - [`spin`] - Spinlock-based primitives for O(1) operations on hot paths
//!
//! # Choosing the Right Primitive
//!
//! | Use Case | Primitive |
//! |----------|-----------|
//! | O(1) ops, hot path, no blocking | [`spin::Mutex`] |
//! | One-time global initialization | [`spin::Once`] |
//! | O(n) iteration, may block | `std::sync::Mutex` |

pub mod spin;
