//! Method dispatch: bind resolution, invocation, and return policy.
//!
//! Every engine-exposed method the generator emits carries a static
//! [`MethodSpec`]. Dispatch resolves the method bind lazily through a
//! process-wide cache keyed by (class id, method id), fills a
//! [`CallFrame`], invokes, and applies the method's return-ownership
//! policy to any handle coming back. The cache insert is double-checked
//! so concurrent first calls perform exactly one engine lookup.

use crate::error::{EngineError, EngineResult, EngineStatus};
use crate::frame::{CallFrame, SlotKind};
use crate::interface::iface;
use crate::object::ObjRef;
use crate::variant::Variant;
use lumen_sys::RawMethodBind;
use rustc_hash::FxHashMap;
use std::ffi::CStr;
use std::sync::{Arc, OnceLock, RwLock};

/// Generator-assigned identifier of an engine class.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ClassId(pub u32);

/// Generator-assigned identifier of a method within its class.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodId(pub u32);

/// How a returned object handle is wrapped, curated per method by the
/// generator from engine metadata.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ReturnOwnership {
    /// Refcounted class; the engine incremented before returning.
    SharedPreincremented,
    /// Refcounted class; the host must add its own reference.
    SharedAcquire,
    /// Unreferenced class; the host becomes the releaser.
    TransferOwned,
    /// Unreferenced class whose lifetime the engine ties to the call
    /// target; the record keeps the target alive.
    ParentBound,
}

/// Static description of one engine-exposed method.
pub struct MethodSpec {
    pub class_id: ClassId,
    pub method_id: MethodId,
    pub class_name: &'static CStr,
    pub method_name: &'static CStr,
}

static BIND_CACHE: OnceLock<RwLock<FxHashMap<(ClassId, MethodId), RawMethodBind>>> =
    OnceLock::new();

fn cache() -> &'static RwLock<FxHashMap<(ClassId, MethodId), RawMethodBind>> {
    BIND_CACHE.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// Resolves the method bind for `spec`, hitting the engine at most once
/// per (class id, method id) for the life of the process.
pub fn resolve_bind(spec: &MethodSpec) -> EngineResult<RawMethodBind> {
    let key = (spec.class_id, spec.method_id);
    {
        let cache = cache().read().expect("bind cache poisoned");
        if let Some(bind) = cache.get(&key) {
            return Ok(*bind);
        }
    }
    let mut cache = cache().write().expect("bind cache poisoned");
    // Double-checked: another thread may have won the write race.
    if let Some(bind) = cache.get(&key) {
        return Ok(*bind);
    }
    let bind = unsafe {
        (iface().method_bind_lookup)(spec.class_name.as_ptr(), spec.method_name.as_ptr())
    };
    if bind.is_null() {
        return Err(EngineError::Status(EngineStatus::MethodNotFound));
    }
    log::debug!(
        "resolved bind for {}::{}",
        spec.class_name.to_string_lossy(),
        spec.method_name.to_string_lossy()
    );
    cache.insert(key, bind);
    Ok(bind)
}

/// Invokes `spec` against `target` with an already-filled frame. The
/// frame's return slot must have been declared before the call.
pub fn call_raw(spec: &MethodSpec, target: &ObjRef, frame: &mut CallFrame) -> EngineResult<()> {
    target.assert_live();
    let bind = resolve_bind(spec)?;
    // Safety: the bind is live for process lifetime and the generator
    // guarantees the frame matches the method signature.
    unsafe { frame.invoke(bind, target.handle()) };
    Ok(())
}

/// A void method.
pub fn call_unit(spec: &MethodSpec, target: &ObjRef, frame: &mut CallFrame) -> EngineResult<()> {
    call_raw(spec, target, frame)
}

/// A method returning an engine status code, lifted into a result.
pub fn call_status(spec: &MethodSpec, target: &ObjRef, frame: &mut CallFrame) -> EngineResult<()> {
    frame.set_return_kind(SlotKind::Int);
    call_raw(spec, target, frame)?;
    EngineStatus::from_code(frame.return_int() as i32)
}

pub fn call_i64(spec: &MethodSpec, target: &ObjRef, frame: &mut CallFrame) -> EngineResult<i64> {
    frame.set_return_kind(SlotKind::Int);
    call_raw(spec, target, frame)?;
    Ok(frame.return_int())
}

pub fn call_bool(spec: &MethodSpec, target: &ObjRef, frame: &mut CallFrame) -> EngineResult<bool> {
    frame.set_return_kind(SlotKind::Uint);
    call_raw(spec, target, frame)?;
    Ok(frame.return_bool())
}

pub fn call_f64(spec: &MethodSpec, target: &ObjRef, frame: &mut CallFrame) -> EngineResult<f64> {
    frame.set_return_kind(SlotKind::Real);
    call_raw(spec, target, frame)?;
    Ok(frame.return_real())
}

pub fn call_variant(
    spec: &MethodSpec,
    target: &ObjRef,
    frame: &mut CallFrame,
) -> EngineResult<Variant> {
    frame.set_return_kind(SlotKind::Variant);
    call_raw(spec, target, frame)?;
    Ok(frame.take_return_variant())
}

/// A method returning an object handle. `policy` decides the wrap;
/// `parent` supplies the back-reference for [`ReturnOwnership::ParentBound`].
pub fn call_object(
    spec: &MethodSpec,
    target: &ObjRef,
    frame: &mut CallFrame,
    policy: ReturnOwnership,
    parent: Option<&Arc<ObjRef>>,
) -> EngineResult<Option<ObjRef>> {
    frame.set_return_kind(SlotKind::Word);
    call_raw(spec, target, frame)?;
    let handle = frame.return_object();
    if handle.is_null() {
        return Ok(None);
    }
    let record = match policy {
        ReturnOwnership::SharedPreincremented => ObjRef::wrap_shared_preincremented(handle)?,
        ReturnOwnership::SharedAcquire => ObjRef::acquire_shared(handle)?,
        ReturnOwnership::TransferOwned => ObjRef::wrap_owned(handle)?,
        ReturnOwnership::ParentBound => {
            let parent = parent
                .expect("parent-bound return policy requires the call target's record")
                .clone();
            ObjRef::wrap_parent_bound(handle, parent)?
        }
    };
    Ok(Some(record))
}
