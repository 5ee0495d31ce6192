//! Marker traits that keep collaborator bounds uniform.
//!
//! Every collaborator is driven from dedicated OS threads (reader, decode
//! workers, refresh loop), so implementations must be movable across threads
//! and, when shared through `Arc`, safe to call concurrently.

/// Marker trait for collaborators shared between threads.
pub trait PlatformSendSync: Send + Sync {}

impl<T> PlatformSendSync for T where T: Send + Sync {}

/// Marker trait for collaborators owned by a single worker thread at a time.
pub trait PlatformSend: Send {}

impl<T> PlatformSend for T where T: Send {}
