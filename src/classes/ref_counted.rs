//! `RefCounted`, base of the engine's intrusively refcounted classes.

use crate::classes::{Object, impl_upcast};
use lumen_core::dispatch::{self, ClassId, MethodId, MethodSpec};
use lumen_core::error::EngineResult;
use lumen_core::frame::CallFrame;
use lumen_core::object::{self, ObjRef};
use std::sync::Arc;

pub(crate) const CLASS_ID: ClassId = ClassId(2);

static GET_REFERENCE_COUNT: MethodSpec = MethodSpec {
    class_id: CLASS_ID,
    method_id: MethodId(1),
    class_name: c"RefCounted",
    method_name: c"get_reference_count",
};

/// Wrappers share ownership through the engine's intrusive refcount;
/// dropping the last shared wrapper destroys the instance.
#[repr(transparent)]
pub struct RefCounted {
    record: Option<Arc<ObjRef>>,
}

impl_upcast!(RefCounted => Object);

impl RefCounted {
    pub fn new() -> EngineResult<RefCounted> {
        Ok(RefCounted::from_record(Arc::new(object::construct_refcounted(
            c"RefCounted",
        )?)))
    }

    /// The null-handle value of this class.
    pub const fn nil() -> RefCounted {
        RefCounted { record: None }
    }

    pub fn is_nil(&self) -> bool {
        self.record.is_none()
    }

    pub fn from_record(record: Arc<ObjRef>) -> RefCounted {
        RefCounted {
            record: Some(record),
        }
    }

    /// The live record. Dispatching through a nil instance is a
    /// binding-user bug and aborts.
    pub fn record(&self) -> &Arc<ObjRef> {
        match &self.record {
            Some(record) => record,
            None => panic!("method dispatched on a nil RefCounted"),
        }
    }

    pub fn get_reference_count(&self) -> EngineResult<i64> {
        let mut frame = CallFrame::with_args(0);
        dispatch::call_i64(&GET_REFERENCE_COUNT, self.record(), &mut frame)
    }
}

impl Clone for RefCounted {
    fn clone(&self) -> RefCounted {
        RefCounted {
            record: self
                .record
                .as_ref()
                .map(|record| Arc::new(record.clone_shared())),
        }
    }
}
