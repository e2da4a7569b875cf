//! Extension entry points.
//!
//! The engine loads the extension as a dynamic library and calls the
//! exported init symbol with its interface table. [`extension_entry!`]
//! emits the exported pair for a type implementing
//! [`ExtensionLibrary`].

use lumen_core::EngineResult;

/// Lifecycle hooks of one extension library.
pub trait ExtensionLibrary {
    /// Runs after the interface is installed; register classes here.
    fn on_init() -> EngineResult<()> {
        Ok(())
    }

    /// Runs before host classes are unregistered.
    fn on_teardown() {}
}

/// Installs the engine interface and runs `L::on_init`. Returns false
/// when the interface is missing, version-incompatible, or init fails;
/// the engine then abandons the load.
pub fn initialize<L: ExtensionLibrary>(
    interface: *const lumen_sys::EngineInterface,
) -> bool {
    if let Err(err) = unsafe { lumen_core::interface::install(interface) } {
        log::error!("interface install failed: {err}");
        return false;
    }
    if let Err(err) = L::on_init() {
        log::error!("extension init failed: {err}");
        return false;
    }
    true
}

/// Runs `L::on_teardown` and unregisters every host class.
pub fn teardown<L: ExtensionLibrary>() {
    L::on_teardown();
    lumen_core::registry::unregister_all();
}

/// Emits the exported entry and teardown symbols for an
/// [`ExtensionLibrary`] implementor.
#[macro_export]
macro_rules! extension_entry {
    ($library:ty) => {
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn lumen_extension_init(
            interface: *const $crate::init::__sys::EngineInterface,
        ) -> u8 {
            $crate::init::initialize::<$library>(interface) as u8
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn lumen_extension_teardown() {
            $crate::init::teardown::<$library>();
        }
    };
}

/// Macro plumbing; not part of the public surface.
#[doc(hidden)]
pub mod __sys {
    pub use lumen_sys::EngineInterface;
}
