//! `StreamPeer`, a refcounted byte-stream endpoint. Its fallible
//! operations return engine status codes, lifted into results.

use crate::classes::{RefCounted, impl_upcast};
use lumen_core::dispatch::{self, ClassId, MethodId, MethodSpec};
use lumen_core::error::EngineResult;
use lumen_core::frame::CallFrame;
use lumen_core::object::{self, ObjRef};
use lumen_core::packed::Packed;
use lumen_core::variant::{FromVariant, ToVariant, Variant};
use std::sync::Arc;

pub(crate) const CLASS_ID: ClassId = ClassId(4);

static CONNECT_TO_HOST: MethodSpec = MethodSpec {
    class_id: CLASS_ID,
    method_id: MethodId(1),
    class_name: c"StreamPeer",
    method_name: c"connect_to_host",
};

static GET_AVAILABLE_BYTES: MethodSpec = MethodSpec {
    class_id: CLASS_ID,
    method_id: MethodId(2),
    class_name: c"StreamPeer",
    method_name: c"get_available_bytes",
};

static PUT_DATA: MethodSpec = MethodSpec {
    class_id: CLASS_ID,
    method_id: MethodId(3),
    class_name: c"StreamPeer",
    method_name: c"put_data",
};

static GET_DATA: MethodSpec = MethodSpec {
    class_id: CLASS_ID,
    method_id: MethodId(4),
    class_name: c"StreamPeer",
    method_name: c"get_data",
};

#[repr(transparent)]
pub struct StreamPeer {
    record: Option<Arc<ObjRef>>,
}

impl_upcast!(StreamPeer => RefCounted);

impl StreamPeer {
    pub fn new() -> EngineResult<StreamPeer> {
        Ok(StreamPeer::from_record(Arc::new(object::construct_refcounted(
            c"StreamPeer",
        )?)))
    }

    /// The null-handle value of this class.
    pub const fn nil() -> StreamPeer {
        StreamPeer { record: None }
    }

    pub fn is_nil(&self) -> bool {
        self.record.is_none()
    }

    pub fn from_record(record: Arc<ObjRef>) -> StreamPeer {
        StreamPeer {
            record: Some(record),
        }
    }

    /// The live record. Dispatching through a nil instance is a
    /// binding-user bug and aborts.
    pub fn record(&self) -> &Arc<ObjRef> {
        match &self.record {
            Some(record) => record,
            None => panic!("method dispatched on a nil StreamPeer"),
        }
    }

    /// Fails with the engine's status when the host is unreachable,
    /// e.g. `cant-connect` or `cant-resolve`.
    pub fn connect_to_host(&self, host: &str, port: u16) -> EngineResult<()> {
        let mut frame = CallFrame::with_args(2);
        frame.set_variant(0, Variant::from_str(host));
        frame.set_int(1, i64::from(port));
        dispatch::call_status(&CONNECT_TO_HOST, self.record(), &mut frame)
    }

    pub fn get_available_bytes(&self) -> EngineResult<i64> {
        let mut frame = CallFrame::with_args(0);
        dispatch::call_i64(&GET_AVAILABLE_BYTES, self.record(), &mut frame)
    }

    pub fn put_data(&self, data: &Packed<u8>) -> EngineResult<()> {
        let mut frame = CallFrame::with_args(1);
        frame.set_variant(0, data.to_variant());
        dispatch::call_status(&PUT_DATA, self.record(), &mut frame)
    }

    pub fn get_data(&self, length: i64) -> EngineResult<Packed<u8>> {
        let mut frame = CallFrame::with_args(1);
        frame.set_int(0, length);
        let out = dispatch::call_variant(&GET_DATA, self.record(), &mut frame)?;
        Ok(Packed::<u8>::from_variant(&out)?)
    }
}

impl Clone for StreamPeer {
    fn clone(&self) -> StreamPeer {
        StreamPeer {
            record: self
                .record
                .as_ref()
                .map(|record| Arc::new(record.clone_shared())),
        }
    }
}
