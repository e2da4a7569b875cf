//! Generated-style wrappers over engine classes.
//!
//! Each wrapper is `#[repr(transparent)]` over an optional pointer
//! record, so upcasts along the engine inheritance chain are pointer
//! casts; the vacant case is the class's nil value. Method bodies
//! follow one shape: fill a call frame, dispatch through the cached
//! bind, read the declared return slot.

mod node;
mod object;
mod ref_counted;
mod stream_peer;

pub use node::{Node, ProcessMode};
pub use object::Object;
pub use ref_counted::RefCounted;
pub use stream_peer::StreamPeer;

/// Derives the upcast accessors a subclass wrapper exposes. Sound
/// because every wrapper is `#[repr(transparent)]` over
/// `Option<Arc<ObjRef>>`.
macro_rules! impl_upcast {
    ($class:ty => $parent:ty) => {
        impl $class {
            pub fn upcast(&self) -> &$parent {
                unsafe { &*(self as *const $class as *const $parent) }
            }
        }

        impl std::ops::Deref for $class {
            type Target = $parent;

            fn deref(&self) -> &$parent {
                self.upcast()
            }
        }
    };
}

pub(crate) use impl_upcast;
