//! Class registration and virtual dispatch into host code.
//!
//! Host types implement [`HostClass`] and are registered with the engine
//! under a class name and parent. The engine instantiates them through a
//! construction thunk, destroys them through a destruction thunk, and
//! dispatches virtual methods through one C trampoline shared by every
//! registered class. Virtual lookup is by interned method name with
//! parent-chain fallthrough; a top-level miss is a no-op against the
//! engine's default-initialized return slot.
//!
//! Per instance, dispatch is guarded by a small state machine
//! (unborn, alive, dying, freed) realized as a live-instance table:
//! entering the destructor unpublishes the instance and blocks new
//! virtual dispatches, and destruction waits for in-flight dispatches
//! on other threads to drain before the allocation is freed.

use crate::error::{EngineError, EngineResult, EngineStatus};
use crate::interface::iface;
use crate::object::Base;
use crate::string_name::StringName;
use crate::variant::VariantTag;
use bitflags::bitflags;
use lumen_sys::{
    CallVirtualFn, ClassCreationInfo, MethodCreationInfo, PropertyCreationInfo, PtrArg, PtrRet,
    RawObject, RawStringName,
};
use rustc_hash::FxHashMap;
use std::ffi::{CStr, CString, c_char, c_void};
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

bitflags! {
    /// Flags of a scripting-visible method registration.
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct MethodFlags: u32 {
        const NORMAL = 1;
        const CONST = 1 << 1;
        const VIRTUAL = 1 << 2;
        const STATIC = 1 << 3;
    }
}

bitflags! {
    /// Usage flags of a scripting-visible property registration.
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct PropertyUsage: u32 {
        const STORAGE = 1;
        const EDITOR = 1 << 1;
        const INTERNAL = 1 << 2;
        const DEFAULT = Self::STORAGE.bits() | Self::EDITOR.bits();
    }
}

/// A virtual-method callback. `instance` is the host instance the
/// constructor produced; arguments and return cross at the documented
/// offsets for the method's engine signature.
pub type VirtualFn = unsafe fn(instance: *mut c_void, args: *const PtrArg, ret: PtrRet);

/// A host type implementing an engine-visible class.
pub trait HostClass: Sized + Send + 'static {
    const CLASS_NAME: &'static CStr;
    const PARENT_NAME: &'static CStr;
    /// Whether instances carry the engine's intrusive refcount.
    const IS_REFCOUNTED: bool;

    /// Builds the host side of a fresh instance around its self record.
    fn construct(base: Base) -> Self;

    /// The virtual methods this class overrides.
    fn virtual_methods() -> VirtualTable {
        VirtualTable::new()
    }
}

/// Builder for a class's name → callback virtual table.
#[derive(Default)]
pub struct VirtualTable {
    entries: Vec<(&'static str, VirtualFn)>,
}

impl VirtualTable {
    pub fn new() -> VirtualTable {
        VirtualTable::default()
    }

    pub fn insert(&mut self, name: &'static str, callback: VirtualFn) -> &mut Self {
        self.entries.push((name, callback));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One registered host class.
pub struct ClassInfo {
    name: &'static CStr,
    parent_name: &'static CStr,
    is_refcounted: bool,
    /// Host-registered ancestor, when the parent is itself a host class.
    parent: Option<Arc<ClassInfo>>,
    /// Interned-name-handle → callback, for the dispatch hot path.
    vtable: FxHashMap<usize, VirtualFn>,
    /// Text → callback, for the engine's get-virtual-by-name query.
    vtable_by_text: FxHashMap<&'static str, VirtualFn>,
    create: unsafe fn(RawObject) -> *mut c_void,
    destroy: unsafe fn(*mut c_void),
}

impl ClassInfo {
    /// Resolves a callback by interned name, walking the parent chain.
    pub fn lookup_virtual(&self, name: RawStringName) -> Option<VirtualFn> {
        let mut class = Some(self);
        while let Some(info) = class {
            if let Some(callback) = info.vtable.get(&name.to_word()) {
                return Some(*callback);
            }
            class = info.parent.as_deref();
        }
        None
    }

    /// Same chain walk keyed by text, used at registration time.
    pub fn lookup_virtual_text(&self, name: &str) -> Option<VirtualFn> {
        let mut class = Some(self);
        while let Some(info) = class {
            if let Some(callback) = info.vtable_by_text.get(name) {
                return Some(*callback);
            }
            class = info.parent.as_deref();
        }
        None
    }

    pub fn name(&self) -> &'static CStr {
        self.name
    }

    pub fn is_refcounted(&self) -> bool {
        self.is_refcounted
    }
}

const STATE_ALIVE: u8 = 1;
const STATE_DYING: u8 = 2;

/// Dispatch guard of one live instance. Guards live outside the
/// instance allocation, in [`INSTANCES`], so a dispatch racing the
/// destructor holds its own `Arc` and never reads freed memory.
struct InstanceGuard {
    state: AtomicU8,
    inflight: AtomicU32,
}

/// Live-instance table keyed by instance pointer. An instance is born
/// when its entry appears and dying once the entry is removed; the
/// removal and the in-flight increment take the same lock, so the
/// destructor's drain sees every dispatch that found the entry.
static INSTANCES: OnceLock<Mutex<FxHashMap<usize, Arc<InstanceGuard>>>> = OnceLock::new();

fn instances() -> &'static Mutex<FxHashMap<usize, Arc<InstanceGuard>>> {
    INSTANCES.get_or_init(|| Mutex::new(FxHashMap::default()))
}

/// Common prefix of every host instance allocation. `#[repr(C)]` keeps
/// it at offset zero of the erased instance pointer so the shared
/// trampolines can read it without knowing the concrete type.
#[repr(C)]
struct InstanceHeader {
    class: Arc<ClassInfo>,
    /// Points at the `user` field of the enclosing slot; fixed up right
    /// after boxing.
    user: *mut c_void,
}

#[repr(C)]
struct InstanceSlot<T> {
    header: InstanceHeader,
    user: T,
}

unsafe fn create_thunk<T: HostClass>(object: RawObject) -> *mut c_void {
    let class = lookup_class(T::CLASS_NAME)
        .expect("engine constructed a class that is not registered");
    let base = match Base::engine_owned(object) {
        Ok(base) => base,
        Err(_) => return std::ptr::null_mut(),
    };
    let mut slot = Box::new(InstanceSlot {
        header: InstanceHeader {
            class,
            user: std::ptr::null_mut(),
        },
        user: T::construct(base),
    });
    slot.header.user = &mut slot.user as *mut T as *mut c_void;
    let instance = Box::into_raw(slot) as *mut c_void;
    // Publishing the guard is what makes the instance dispatchable.
    instances()
        .lock()
        .expect("instance table poisoned")
        .insert(
            instance as usize,
            Arc::new(InstanceGuard {
                state: AtomicU8::new(STATE_ALIVE),
                inflight: AtomicU32::new(0),
            }),
        );
    instance
}

unsafe fn destroy_thunk<T: HostClass>(instance: *mut c_void) {
    drop(unsafe { Box::from_raw(instance as *mut InstanceSlot<T>) });
}

unsafe extern "C" fn create_instance_tramp(
    class_userdata: *mut c_void,
    object: RawObject,
) -> *mut c_void {
    let info = unsafe { &*(class_userdata as *const ClassInfo) };
    unsafe { (info.create)(object) }
}

unsafe extern "C" fn free_instance_tramp(_class_userdata: *mut c_void, instance: *mut c_void) {
    // Removing the guard blocks new dispatches; in-flight ones were
    // counted under the same lock, so draining the counter leaves the
    // allocation unreachable before it goes away.
    let Some(guard) = instances()
        .lock()
        .expect("instance table poisoned")
        .remove(&(instance as usize))
    else {
        return;
    };
    let previous = guard.state.swap(STATE_DYING, Ordering::AcqRel);
    debug_assert_eq!(previous, STATE_ALIVE);
    while guard.inflight.load(Ordering::Acquire) != 0 {
        std::thread::yield_now();
    }
    let header = unsafe { &*(instance as *const InstanceHeader) };
    let destroy = header.class.destroy;
    unsafe { destroy(instance) };
}

/// The single trampoline the engine calls for every virtual method of
/// every registered class. A stale instance pointer misses the guard
/// table and the call degrades to a no-op.
unsafe extern "C" fn call_virtual_tramp(
    instance: *mut c_void,
    name: RawStringName,
    args: *const PtrArg,
    ret: PtrRet,
) {
    let guard = {
        let table = instances().lock().expect("instance table poisoned");
        match table.get(&(instance as usize)) {
            Some(guard) => {
                guard.inflight.fetch_add(1, Ordering::AcqRel);
                Arc::clone(guard)
            }
            None => return,
        }
    };
    // A destructor arriving now sees the count and waits; the guard
    // state may already read dying, but the allocation stays put until
    // the count returns to zero.
    let header = unsafe { &*(instance as *const InstanceHeader) };
    if let Some(callback) = header.class.lookup_virtual(name) {
        unsafe { callback(header.user, args, ret) };
    }
    guard.inflight.fetch_sub(1, Ordering::AcqRel);
}

unsafe extern "C" fn get_virtual_tramp(
    class_userdata: *mut c_void,
    name: *const c_char,
) -> Option<CallVirtualFn> {
    let info = unsafe { &*(class_userdata as *const ClassInfo) };
    let name = unsafe { CStr::from_ptr(name) };
    match name.to_str().ok().and_then(|n| info.lookup_virtual_text(n)) {
        Some(_) => Some(call_virtual_tramp),
        None => None,
    }
}

static CLASSES: OnceLock<RwLock<FxHashMap<&'static CStr, Arc<ClassInfo>>>> = OnceLock::new();

fn classes() -> &'static RwLock<FxHashMap<&'static CStr, Arc<ClassInfo>>> {
    CLASSES.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// The registered class named `name`, if any.
pub fn lookup_class(name: &CStr) -> Option<Arc<ClassInfo>> {
    classes().read().expect("class registry poisoned").get(name).cloned()
}

pub fn is_registered(name: &CStr) -> bool {
    lookup_class(name).is_some()
}

/// Registers `T` with the engine. Fails `already-exists` for a name
/// this process already registered and `does-not-exist` when the engine
/// rejects the parent class.
pub fn register_class<T: HostClass>() -> EngineResult<()> {
    let mut registry = classes().write().expect("class registry poisoned");
    if registry.contains_key(T::CLASS_NAME) {
        return Err(EngineError::Status(EngineStatus::AlreadyExists));
    }
    let parent = registry.get(T::PARENT_NAME).cloned();

    let mut vtable = FxHashMap::default();
    let mut vtable_by_text = FxHashMap::default();
    for (name, callback) in T::virtual_methods().entries {
        // The intern cache pins the handle for process lifetime, so the
        // keyed handle stays valid after this StringName drops.
        let interned = StringName::new(name);
        vtable.insert(interned.raw().to_word(), callback);
        vtable_by_text.insert(name, callback);
    }

    let info = Arc::new(ClassInfo {
        name: T::CLASS_NAME,
        parent_name: T::PARENT_NAME,
        is_refcounted: T::IS_REFCOUNTED,
        parent,
        vtable,
        vtable_by_text,
        create: create_thunk::<T>,
        destroy: destroy_thunk::<T>,
    });

    // The engine holds one leaked Arc clone as class userdata until
    // unregistration reclaims it.
    let userdata = Arc::into_raw(info.clone()) as *mut c_void;
    let creation = ClassCreationInfo {
        class_name: info.name.as_ptr(),
        parent_name: info.parent_name.as_ptr(),
        is_refcounted: info.is_refcounted as u8,
        class_userdata: userdata,
        create_instance: create_instance_tramp,
        free_instance: free_instance_tramp,
        call_virtual: call_virtual_tramp,
        get_virtual: get_virtual_tramp,
    };
    let code = unsafe { (iface().classdb_register_class)(&creation) };
    if let Err(err) = EngineStatus::from_code(code) {
        unsafe { drop(Arc::from_raw(userdata as *const ClassInfo)) };
        return Err(err);
    }

    log::debug!(
        "registered class {} (parent {})",
        info.name.to_string_lossy(),
        info.parent_name.to_string_lossy()
    );
    registry.insert(T::CLASS_NAME, info);
    Ok(())
}

/// Registers a scripting-visible method of an already-registered class.
pub fn register_method(
    class_name: &CStr,
    method_name: &str,
    argument_count: u32,
    flags: MethodFlags,
) -> EngineResult<()> {
    let method_name = CString::new(method_name)?;
    let info = MethodCreationInfo {
        method_name: method_name.as_ptr(),
        argument_count,
        flags: flags.bits(),
    };
    EngineStatus::from_code(unsafe {
        (iface().classdb_register_method)(class_name.as_ptr(), &info)
    })
}

/// Registers a scripting-visible property backed by a getter/setter
/// pair.
pub fn register_property(
    class_name: &CStr,
    property_name: &str,
    tag: VariantTag,
    getter: &str,
    setter: &str,
    usage: PropertyUsage,
) -> EngineResult<()> {
    let property_name = CString::new(property_name)?;
    let getter = CString::new(getter)?;
    let setter = CString::new(setter)?;
    let info = PropertyCreationInfo {
        property_name: property_name.as_ptr(),
        variant_tag: tag.into(),
        getter_name: getter.as_ptr(),
        setter_name: setter.as_ptr(),
        usage: usage.bits(),
    };
    EngineStatus::from_code(unsafe {
        (iface().classdb_register_property)(class_name.as_ptr(), &info)
    })
}

pub fn register_signal(class_name: &CStr, signal_name: &str, argument_count: u32) -> EngineResult<()> {
    let signal_name = CString::new(signal_name)?;
    EngineStatus::from_code(unsafe {
        (iface().classdb_register_signal)(class_name.as_ptr(), signal_name.as_ptr(), argument_count)
    })
}

pub fn register_enum_value(
    class_name: &CStr,
    enum_name: &str,
    value_name: &str,
    value: i64,
) -> EngineResult<()> {
    let enum_name = CString::new(enum_name)?;
    let value_name = CString::new(value_name)?;
    EngineStatus::from_code(unsafe {
        (iface().classdb_register_enum_value)(
            class_name.as_ptr(),
            enum_name.as_ptr(),
            value_name.as_ptr(),
            value,
        )
    })
}

/// Unregisters every host class. Called at extension teardown.
pub fn unregister_all() {
    let mut registry = classes().write().expect("class registry poisoned");
    for (name, info) in registry.drain() {
        let code = unsafe { (iface().classdb_unregister_class)(name.as_ptr()) };
        if let Err(err) = EngineStatus::from_code(code) {
            log::warn!("failed to unregister {}: {err}", name.to_string_lossy());
        }
        // Reclaim the Arc clone leaked to the engine as class userdata.
        unsafe { drop(Arc::from_raw(Arc::as_ptr(&info))) };
    }
}
