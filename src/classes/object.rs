//! `Object`, the root of the engine class hierarchy.

use lumen_core::dispatch::{self, ClassId, MethodId, MethodSpec};
use lumen_core::error::EngineResult;
use lumen_core::frame::CallFrame;
use lumen_core::object::{self, ObjRef, WeakRef};
use lumen_core::signals::{self, Subscription};
use lumen_core::string_name::StringName;
use lumen_core::variant::Variant;
use std::sync::Arc;

pub(crate) const CLASS_ID: ClassId = ClassId(1);

static GET_CLASS: MethodSpec = MethodSpec {
    class_id: CLASS_ID,
    method_id: MethodId(1),
    class_name: c"Object",
    method_name: c"get_class",
};

static SET_NAME: MethodSpec = MethodSpec {
    class_id: CLASS_ID,
    method_id: MethodId(2),
    class_name: c"Object",
    method_name: c"set_name",
};

static GET_NAME: MethodSpec = MethodSpec {
    class_id: CLASS_ID,
    method_id: MethodId(3),
    class_name: c"Object",
    method_name: c"get_name",
};

/// Root engine class. Instances are unreferenced; dropping the last
/// owned wrapper frees the engine object.
#[repr(transparent)]
pub struct Object {
    record: Option<Arc<ObjRef>>,
}

impl Object {
    pub fn new() -> EngineResult<Object> {
        Ok(Object::from_record(Arc::new(object::construct(c"Object")?)))
    }

    /// The null-handle value of this class.
    pub const fn nil() -> Object {
        Object { record: None }
    }

    pub fn is_nil(&self) -> bool {
        self.record.is_none()
    }

    pub fn from_record(record: Arc<ObjRef>) -> Object {
        Object {
            record: Some(record),
        }
    }

    pub fn from_objref(record: ObjRef) -> Object {
        Object::from_record(Arc::new(record))
    }

    /// The live record. Dispatching through a nil instance is a
    /// binding-user bug and aborts.
    pub fn record(&self) -> &Arc<ObjRef> {
        match &self.record {
            Some(record) => record,
            None => panic!("method dispatched on a nil Object"),
        }
    }

    pub fn downgrade(&self) -> WeakRef {
        self.record().downgrade()
    }

    pub fn get_class(&self) -> EngineResult<String> {
        let mut frame = CallFrame::with_args(0);
        Ok(dispatch::call_variant(&GET_CLASS, self.record(), &mut frame)?.to_host_string()?)
    }

    pub fn set_name(&self, name: &str) -> EngineResult<()> {
        let mut frame = CallFrame::with_args(1);
        frame.set_variant(0, Variant::from_str(name));
        dispatch::call_unit(&SET_NAME, self.record(), &mut frame)
    }

    pub fn get_name(&self) -> EngineResult<String> {
        let mut frame = CallFrame::with_args(0);
        Ok(dispatch::call_variant(&GET_NAME, self.record(), &mut frame)?.to_host_string()?)
    }

    /// Subscribes `callback` to `signal` on this object.
    pub fn connect<F>(&self, signal: &str, callback: F) -> EngineResult<Subscription>
    where
        F: FnMut(&[Variant]) + Send + 'static,
    {
        signals::connect(self.record(), &StringName::new(signal), callback)
    }
}
