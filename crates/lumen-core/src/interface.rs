//! Installation and lookup of the engine interface table.
//!
//! The table is installed exactly once per process, either from the
//! pointer the engine passes to the extension's init entry point, or by
//! opening the engine shared library ourselves and fetching its
//! interface symbol. After publication every read is lock-free.

use crate::error::{EngineError, EngineResult};
use lumen_sys::{ENGINE_PATH_ENV, EngineInterface, INTERFACE_SYMBOL, INTERFACE_VERSION_MAJOR};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static INTERFACE: OnceLock<EngineInterface> = OnceLock::new();

/// Installs the interface table from the pointer the engine supplied.
///
/// Idempotent for repeated installs within one process; the first table
/// wins. Fails when the pointer is null or the table's major version is
/// incompatible.
///
/// # Safety
/// `table` must point to a valid `EngineInterface` whose function
/// pointers remain callable for the life of the process.
pub unsafe fn install(table: *const EngineInterface) -> EngineResult<()> {
    if table.is_null() {
        return Err(EngineError::NullHandle);
    }
    let table = unsafe { *table };
    if table.version_major != INTERFACE_VERSION_MAJOR {
        return Err(EngineError::IncompatibleInterface {
            expected: INTERFACE_VERSION_MAJOR,
            found: table.version_major,
        });
    }
    let installed = INTERFACE.get_or_init(|| table);
    log::debug!(
        "engine interface installed (version {}.{})",
        installed.version_major,
        installed.version_minor
    );
    Ok(())
}

/// True once a table has been installed.
pub fn installed() -> bool {
    INTERFACE.get().is_some()
}

/// The installed table, or an error before installation.
pub fn try_get() -> EngineResult<&'static EngineInterface> {
    INTERFACE.get().ok_or(EngineError::InterfaceNotInstalled)
}

/// The installed table. Calling into the engine before initialization
/// is a binding bug, so this panics rather than returning a value.
pub(crate) fn iface() -> &'static EngineInterface {
    INTERFACE
        .get()
        .expect("engine interface used before installation")
}

/// Resolves the engine shared library path: the `LUMEN_ENGINE_PATH`
/// environment variable when set, otherwise the platform-default name
/// resolved by the system loader.
pub fn engine_library_path() -> PathBuf {
    if let Some(hint) = env::var_os(ENGINE_PATH_ENV) {
        return PathBuf::from(hint);
    }
    PathBuf::from(default_library_name())
}

fn default_library_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "lumen.dll"
    } else if cfg!(target_os = "macos") {
        "liblumen.dylib"
    } else {
        "liblumen.so"
    }
}

/// Opens the engine library, fetches its interface symbol, and installs
/// the table. Used when the host embeds the engine rather than being
/// loaded by it. The library handle is leaked deliberately; the table's
/// function pointers must outlive every later call.
pub fn load_engine(path: Option<&Path>) -> EngineResult<()> {
    let resolved = path
        .map(Path::to_path_buf)
        .unwrap_or_else(engine_library_path);
    let library = unsafe { libloading::Library::new(&resolved) }
        .map_err(|e| EngineError::EngineLibrary(format!("{}: {e}", resolved.display())))?;
    let table = unsafe {
        let get_interface: libloading::Symbol<unsafe extern "C" fn() -> *const EngineInterface> =
            library
                .get(INTERFACE_SYMBOL)
                .map_err(|e| EngineError::EngineLibrary(e.to_string()))?;
        get_interface()
    };
    std::mem::forget(library);
    unsafe { install(table) }
}
