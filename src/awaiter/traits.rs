/*!
 * Awaiter Traits
 *
 * The three-operation contract a cooperative scheduler suspends on:
 * check completion, register a continuation, read the result.
 *
 * # Protocol
 *
 * 1. `is_complete()` - if true, skip straight to step 3
 * 2. `on_completed(continuation)` - suspend; the continuation may run
 *    synchronously inside this call, re-entrantly, or later on an arbitrary
 *    thread
 * 3. `get_result()` - called once after resumption
 */

use crate::core::errors::AwaitResult;
use crate::core::types::Continuation;

/// Object a cooperative scheduler can suspend on
pub trait Awaitable: Send + Sync {
    /// Final value produced on completion
    type Output;

    /// The awaiter is its own suspension token
    #[inline(always)]
    fn as_awaiter(&self) -> &Self
    where
        Self: Sized,
    {
        self
    }

    /// Non-blocking completion check
    fn is_complete(&self) -> bool;

    /// Register the single continuation for this instance
    ///
    /// Errors if the native registration fails or a continuation was
    /// already registered.
    fn on_completed(&self, continuation: Continuation) -> AwaitResult<()>;

    /// Result, or an error if called out of protocol
    fn try_get_result(&self) -> AwaitResult<Self::Output>;

    /// Result after completion
    ///
    /// # Panics
    ///
    /// Panics when called before completion.
    fn get_result(&self) -> Self::Output {
        match self.try_get_result() {
            Ok(value) => value,
            Err(e) => panic!("awaiter result unavailable: {}", e),
        }
    }
}
