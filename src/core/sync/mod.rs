/*!
 * Synchronization Primitives
 *
 * One-shot building blocks for bridging native notifications into
 * cooperative code:
 * - `Completion<T>`: single-fire latch with a result and one continuation
 * - `Handoff<T>`: single-assignment cell with blocking take
 *
 * # Use Cases
 *
 * - **Awaiters**: fire a continuation exactly once under racing signals
 * - **Registration handshakes**: hand a token from the registering thread to
 *   a callback that may already be running
 */

mod completion;
mod handoff;

pub use completion::{Completion, CompletionState};
pub use handoff::Handoff;
