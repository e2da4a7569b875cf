//! Signal subscription.
//!
//! A subscription hands the engine a boxed closure plus two C
//! trampolines: one that replays an emission's arguments into the
//! closure, one that drops the box when the engine severs the
//! connection from its side.

use crate::error::{EngineResult, EngineStatus};
use crate::interface::iface;
use crate::object::ObjRef;
use crate::string_name::StringName;
use crate::variant::Variant;
use lumen_sys::RawVariant;
use std::ffi::c_void;
use std::sync::Arc;

type SignalClosure = Box<dyn FnMut(&[Variant]) + Send + 'static>;

/// A live connection to an engine signal. Dropping it does nothing;
/// call [`Subscription::disconnect`] to sever it from the host side.
#[derive(Debug)]
pub struct Subscription {
    target: Arc<ObjRef>,
    id: u64,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Severs the connection. The engine invokes the free trampoline,
    /// which drops the closure.
    pub fn disconnect(self) -> EngineResult<()> {
        self.target.assert_live();
        EngineStatus::from_code(unsafe {
            (iface().object_disconnect)(self.target.handle(), self.id)
        })
    }
}

unsafe extern "C" fn signal_call_tramp(
    userdata: *mut c_void,
    args: *const RawVariant,
    arg_count: usize,
) {
    let closure = unsafe { &mut *(userdata as *mut SignalClosure) };
    // The emitter keeps ownership of the argument variants; copy them
    // so the closure sees values it can hold past the call.
    let mut owned = Vec::with_capacity(arg_count);
    for i in 0..arg_count {
        let raw = unsafe { *args.add(i) };
        owned.push(unsafe { Variant::from_raw_copied(&raw) });
    }
    closure(&owned);
}

unsafe extern "C" fn signal_free_tramp(userdata: *mut c_void) {
    drop(unsafe { Box::from_raw(userdata as *mut SignalClosure) });
}

/// Connects `callback` to `signal` on `target`. The closure stays
/// alive until the connection is severed from either side.
pub fn connect<F>(target: &Arc<ObjRef>, signal: &StringName, callback: F) -> EngineResult<Subscription>
where
    F: FnMut(&[Variant]) + Send + 'static,
{
    target.assert_live();
    let boxed: SignalClosure = Box::new(callback);
    // Double-box so the trampolines see a thin pointer.
    let userdata = Box::into_raw(Box::new(boxed)) as *mut c_void;
    let id = unsafe {
        (iface().object_connect)(
            target.handle(),
            signal.raw(),
            userdata,
            signal_call_tramp,
            signal_free_tramp,
        )
    };
    if id == 0 {
        unsafe { signal_free_tramp(userdata) };
        return Err(crate::error::EngineError::Status(EngineStatus::DoesNotExist));
    }
    log::debug!("connected signal {} on {:?} (id {id})", signal.to_text(), target.handle());
    Ok(Subscription {
        target: target.clone(),
        id,
    })
}
