//! State threaded between the two creation phases.

use std::any::Any;
use std::fmt;

/// Opaque payload passed from `try_create_device` to `complete_device`.
///
/// Backends that finish device setup in a second step stash whatever they
/// need here, e.g. a partially opened native handle. Backends that don't
/// pass [`CreationState::empty`].
#[derive(Default)]
pub struct CreationState(Option<Box<dyn Any + Send>>);

impl CreationState {
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn with<T: Any + Send>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Take the payload out if it has type `T`.
    ///
    /// A payload of a different type is left in place.
    pub fn take<T: Any + Send>(&mut self) -> Option<T> {
        match self.0.take() {
            Some(boxed) => match boxed.downcast::<T>() {
                Ok(value) => Some(*value),
                Err(other) => {
                    self.0 = Some(other);
                    None
                }
            },
            None => None,
        }
    }
}

impl fmt::Debug for CreationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_some() {
            f.write_str("CreationState(..)")
        } else {
            f.write_str("CreationState(empty)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let mut state = CreationState::empty();
        assert!(state.is_empty());
        assert_eq!(state.take::<u32>(), None);
    }

    #[test]
    fn test_take_matching_type() {
        let mut state = CreationState::with(42u32);
        assert!(!state.is_empty());
        assert_eq!(state.take::<u32>(), Some(42));
        assert!(state.is_empty());
    }

    #[test]
    fn test_take_wrong_type_keeps_payload() {
        let mut state = CreationState::with(String::from("fd"));
        assert_eq!(state.take::<u32>(), None);
        assert_eq!(state.take::<String>(), Some(String::from("fd")));
    }
}
