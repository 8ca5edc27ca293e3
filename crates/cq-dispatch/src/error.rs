// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Registry errors.

use thiserror::Error;

use crate::handle::Handle;

/// Errors returned by registry operations.
///
/// A lookup that finds nothing is not an error; it comes back as `None`
/// (or `Dispatch::Idle`) because "nobody is listening" is a normal state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The action named at registration is not one of the six known kinds.
    /// Carries the offending value as written by the caller.
    #[error("unrecognized action kind `{0}`")]
    UnrecognizedAction(String),

    /// The handle belongs to an occupant that `Registry::claim` has since
    /// replaced. Nothing was stored.
    #[error("handle {handle} is stale, current generation is {current}")]
    StaleHandle { handle: Handle, current: u32 },
}
