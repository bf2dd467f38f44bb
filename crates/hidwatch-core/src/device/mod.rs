//! Device identifiers, handles and the two-phase creation payload.
//!
//! A [`DeviceId`] names one attachment of a physical device. Turning it into
//! something usable is the job of a [`DeviceHandle`], created in two phases:
//! the backend first tries to build and validate the handle, then the caller
//! hands it back for completion along with a [`CreationState`].

mod creation;
mod id;

pub use creation::CreationState;
pub use id::DeviceId;

/// A device constructed from an identifier.
///
/// Construction itself never fails; whether the device is usable is decided
/// by [`load_info`](DeviceHandle::load_info).
pub trait DeviceHandle: Send + Sync {
    /// The identifier this handle was constructed from.
    fn id(&self) -> &DeviceId;

    /// Load descriptive info from the device.
    ///
    /// Returns `false` when the device vanished or cannot be read right now.
    fn load_info(&mut self) -> bool;
}
