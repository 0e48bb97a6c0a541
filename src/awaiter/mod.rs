/*!
 * Awaiter Module
 * Uniform suspension contract and its bridge to Rust futures
 */

mod future;
mod traits;

pub use future::AwaiterFuture;
pub use traits::Awaitable;

pub use crate::core::types::zero_completed;
