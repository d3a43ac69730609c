//! User-facing refresh cache handles.
//!
//! [`RefreshCache`] is the blocking handle, [`AsyncRefreshCache`] the async
//! one. Both are cheap to clone; clones share the same slot.

pub(crate) mod futures;
pub(crate) mod sync;

pub use futures::AsyncRefreshCache;
pub use sync::RefreshCache;
