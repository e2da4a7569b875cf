//! Pointer records: ownership discipline over raw object handles.
//!
//! Every object handle that crosses the ABI is wrapped in an [`ObjRef`]
//! carrying a disposition and a generation tag. The disposition decides
//! the single end-of-life action taken on drop:
//!
//! - `Owned` frees the engine object exactly once.
//! - `Shared` participates in the engine's intrusive refcount.
//! - `Borrowed` takes no lifetime action; validity is bounded by the
//!   enclosing scope.
//! - `ParentBound` takes no action itself but keeps a shared
//!   back-reference to the owning parent alive for its own scope.
//!
//! Generations are assigned monotonically per wrapped handle and let
//! weak upgrades (and debug builds) distinguish a live handle from a
//! recycled one. Double-release and use-after-release abort in debug
//! builds; in release they are undefined behavior.

use crate::error::{EngineError, EngineResult};
use crate::interface::iface;
use lumen_sys::RawObject;
use rustc_hash::FxHashMap;
use std::ffi::CStr;
use std::sync::{Arc, Mutex, OnceLock};

pub type Generation = u64;

/// Ownership classification of a pointer record.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Disposition {
    Owned,
    Borrowed,
    Shared,
    ParentBound,
}

struct HandleTable {
    generations: FxHashMap<usize, Generation>,
    next: Generation,
}

static HANDLES: OnceLock<Mutex<HandleTable>> = OnceLock::new();

fn table() -> &'static Mutex<HandleTable> {
    HANDLES.get_or_init(|| {
        Mutex::new(HandleTable {
            generations: FxHashMap::default(),
            next: 1,
        })
    })
}

/// Returns the live generation for `handle`, assigning the next
/// monotonic generation on first sight (or on re-sight of a recycled
/// handle value after [`forget_handle`]).
pub(crate) fn note_handle(handle: RawObject) -> Generation {
    let mut table = table().lock().expect("handle table poisoned");
    if let Some(generation) = table.generations.get(&handle.to_word()) {
        return *generation;
    }
    let generation = table.next;
    table.next += 1;
    table.generations.insert(handle.to_word(), generation);
    generation
}

/// Drops the live mapping for a destroyed handle. A later re-sight of
/// the same handle value gets a fresh generation.
pub(crate) fn forget_handle(handle: RawObject) {
    let mut table = table().lock().expect("handle table poisoned");
    table.generations.remove(&handle.to_word());
}

/// The generation currently mapped for `handle`, if it is live.
pub fn generation_of(handle: RawObject) -> Option<Generation> {
    let table = table().lock().expect("handle table poisoned");
    table.generations.get(&handle.to_word()).copied()
}

/// True when `handle` is still mapped to `generation`.
pub(crate) fn handle_is_live(handle: RawObject, generation: Generation) -> bool {
    generation_of(handle) == Some(generation)
}

/// True when `handle` is mapped to `generation` and the engine still
/// reports the object valid. The table only sees host-initiated
/// release, so engine-initiated destruction (a parent freeing its
/// children, a scene unload) is caught by the validity query.
pub(crate) fn handle_is_usable(handle: RawObject, generation: Generation) -> bool {
    handle_is_live(handle, generation) && unsafe { (iface().object_is_valid)(handle) } != 0
}

/// The in-process wrapper around one engine object handle.
#[derive(Debug)]
pub struct ObjRef {
    handle: RawObject,
    generation: Generation,
    disposition: Disposition,
    parent: Option<Arc<ObjRef>>,
}

impl ObjRef {
    fn wrap(handle: RawObject, disposition: Disposition) -> EngineResult<ObjRef> {
        if handle.is_null() {
            return Err(EngineError::NullHandle);
        }
        Ok(ObjRef {
            handle,
            generation: note_handle(handle),
            disposition,
            parent: None,
        })
    }

    /// Wraps a handle the host is now responsible for freeing.
    pub fn wrap_owned(handle: RawObject) -> EngineResult<ObjRef> {
        ObjRef::wrap(handle, Disposition::Owned)
    }

    /// Wraps a handle valid only for the enclosing scope. No lifetime
    /// action is ever taken.
    pub fn wrap_borrowed(handle: RawObject) -> EngineResult<ObjRef> {
        ObjRef::wrap(handle, Disposition::Borrowed)
    }

    /// Wraps a refcounted handle, incrementing the engine's counter.
    pub fn acquire_shared(handle: RawObject) -> EngineResult<ObjRef> {
        let record = ObjRef::wrap(handle, Disposition::Shared)?;
        unsafe { (iface().object_reference)(handle) };
        Ok(record)
    }

    /// Wraps a refcounted handle the engine already incremented on
    /// return; the record inherits that reference instead of adding one.
    pub fn wrap_shared_preincremented(handle: RawObject) -> EngineResult<ObjRef> {
        ObjRef::wrap(handle, Disposition::Shared)
    }

    /// Wraps an unreferenced handle whose engine-side lifetime is tied
    /// to `parent`; the record keeps the parent alive for its scope.
    pub fn wrap_parent_bound(handle: RawObject, parent: Arc<ObjRef>) -> EngineResult<ObjRef> {
        let mut record = ObjRef::wrap(handle, Disposition::ParentBound)?;
        record.parent = Some(parent);
        Ok(record)
    }

    pub fn handle(&self) -> RawObject {
        self.handle
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    /// The parent back-reference of a parent-bound record.
    pub fn parent(&self) -> Option<&Arc<ObjRef>> {
        self.parent.as_ref()
    }

    /// Debug-asserts the record has not outlived its handle. Release
    /// builds compile this to nothing; stale use is undefined behavior.
    #[inline]
    pub fn assert_live(&self) {
        debug_assert!(
            handle_is_live(self.handle, self.generation),
            "object record used after its handle was released (handle {:#x})",
            self.handle.to_word()
        );
    }

    /// Clones a shared record, adding one engine reference. Cloning any
    /// other disposition is a binding bug.
    pub fn clone_shared(&self) -> ObjRef {
        assert_eq!(
            self.disposition,
            Disposition::Shared,
            "only shared records can be cloned"
        );
        self.assert_live();
        unsafe { (iface().object_reference)(self.handle) };
        ObjRef {
            handle: self.handle,
            generation: self.generation,
            disposition: Disposition::Shared,
            parent: None,
        }
    }

    /// Captures a weak record observing the current generation.
    pub fn downgrade(&self) -> WeakRef {
        WeakRef {
            handle: self.handle,
            generation: self.generation,
            shared: self.disposition == Disposition::Shared,
        }
    }

    /// Transfers ownership of the handle to the engine: the record is
    /// consumed without its release action. Used for methods classified
    /// transfer-from-host.
    pub fn into_handle_transfer(self) -> RawObject {
        let handle = self.handle;
        std::mem::forget(self);
        handle
    }
}

impl Drop for ObjRef {
    fn drop(&mut self) {
        match self.disposition {
            Disposition::Owned => {
                self.assert_live();
                unsafe { (iface().object_free)(self.handle) };
                forget_handle(self.handle);
            }
            Disposition::Shared => {
                self.assert_live();
                let remaining = unsafe { (iface().object_unreference)(self.handle) };
                if remaining == 0 {
                    forget_handle(self.handle);
                }
            }
            Disposition::Borrowed | Disposition::ParentBound => {}
        }
    }
}

/// A non-owning record that can be checked for liveness before use.
#[derive(Copy, Clone, Debug)]
pub struct WeakRef {
    handle: RawObject,
    generation: Generation,
    shared: bool,
}

impl WeakRef {
    pub fn handle(&self) -> RawObject {
        self.handle
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Upgrades when the handle still exists with the captured
    /// generation. Weak records taken from shared records re-acquire a
    /// shared reference; all others upgrade to a borrow.
    pub fn upgrade(&self) -> Option<ObjRef> {
        if !handle_is_usable(self.handle, self.generation) {
            return None;
        }
        let record = if self.shared {
            ObjRef::acquire_shared(self.handle)
        } else {
            ObjRef::wrap_borrowed(self.handle)
        };
        record.ok()
    }
}

/// Asks the engine to construct a fresh instance of `class_name` and
/// wraps the result as owned. The engine resolves host-registered
/// classes through their construction thunks, so this works for both
/// engine and host classes.
pub fn construct(class_name: &CStr) -> EngineResult<ObjRef> {
    let handle = unsafe { (iface().construct_object)(class_name.as_ptr()) };
    ObjRef::wrap_owned(handle)
}

/// Same as [`construct`] for engine-refcounted classes: the fresh
/// instance arrives with its refcount already at one, which the shared
/// wrapper assumes ownership of.
pub fn construct_refcounted(class_name: &CStr) -> EngineResult<ObjRef> {
    let handle = unsafe { (iface().construct_object)(class_name.as_ptr()) };
    ObjRef::wrap_shared_preincremented(handle)
}

/// The self record handed to a host-implemented class instance: the
/// engine owns the object, the host merely mirrors it. Host code may
/// call through it but must never release it; the engine's destructor
/// call retires the mirror.
#[derive(Debug)]
pub struct Base {
    record: ObjRef,
}

impl Base {
    pub(crate) fn engine_owned(handle: RawObject) -> EngineResult<Base> {
        Ok(Base {
            record: ObjRef::wrap_borrowed(handle)?,
        })
    }

    pub fn record(&self) -> &ObjRef {
        &self.record
    }

    pub fn handle(&self) -> RawObject {
        self.record.handle()
    }
}
