//! Lumen host binding: write engine extension libraries in Rust.
//!
//! The crate layers over [`lumen_core`] and ships generated-style
//! wrappers for a small set of engine classes plus the
//! [`extension_entry!`] entry-point macro. A minimal extension:
//!
//! ```ignore
//! use lumen::prelude::*;
//!
//! struct MyExtension;
//!
//! impl ExtensionLibrary for MyExtension {
//!     fn on_init() -> EngineResult<()> {
//!         registry::register_class::<MyNode>()
//!     }
//! }
//!
//! lumen::extension_entry!(MyExtension);
//! ```

pub mod classes;
pub mod init;

pub use lumen_core::{
    EngineError, EngineResult, EngineStatus, VariantError, dispatch, error, frame, interface,
    math, object, packed, registry, signals, string_name, variant,
};

pub mod prelude {
    pub use crate::classes::{Node, Object, RefCounted, StreamPeer};
    pub use crate::init::ExtensionLibrary;
    pub use lumen_core::prelude::*;
    pub use lumen_core::registry;
}
