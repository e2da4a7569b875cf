//! `Node`, the scene-tree workhorse.
//!
//! Nodes are unreferenced; a node added to a parent belongs to that
//! parent, and child accessors return parent-bound records so a child
//! wrapper keeps its owner alive.

use crate::classes::{Object, impl_upcast};
use lumen_core::dispatch::{self, ClassId, MethodId, MethodSpec, ReturnOwnership};
use lumen_core::error::{EngineError, EngineResult};
use lumen_core::frame::CallFrame;
use lumen_core::object::{self, ObjRef};
use std::sync::Arc;

pub(crate) const CLASS_ID: ClassId = ClassId(3);

static ADD_CHILD: MethodSpec = MethodSpec {
    class_id: CLASS_ID,
    method_id: MethodId(1),
    class_name: c"Node",
    method_name: c"add_child",
};

static GET_CHILD_COUNT: MethodSpec = MethodSpec {
    class_id: CLASS_ID,
    method_id: MethodId(2),
    class_name: c"Node",
    method_name: c"get_child_count",
};

static GET_CHILD: MethodSpec = MethodSpec {
    class_id: CLASS_ID,
    method_id: MethodId(3),
    class_name: c"Node",
    method_name: c"get_child",
};

static SET_PROCESS_MODE: MethodSpec = MethodSpec {
    class_id: CLASS_ID,
    method_id: MethodId(4),
    class_name: c"Node",
    method_name: c"set_process_mode",
};

static GET_PROCESS_MODE: MethodSpec = MethodSpec {
    class_id: CLASS_ID,
    method_id: MethodId(5),
    class_name: c"Node",
    method_name: c"get_process_mode",
};

/// When a node runs its per-frame processing relative to the tree's
/// pause state.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(i64)]
pub enum ProcessMode {
    Inherit = 0,
    Pausable = 1,
    WhenPaused = 2,
    Always = 3,
}

#[repr(transparent)]
pub struct Node {
    record: Option<Arc<ObjRef>>,
}

impl_upcast!(Node => Object);

impl Node {
    pub fn new() -> EngineResult<Node> {
        Ok(Node::from_record(Arc::new(object::construct(c"Node")?)))
    }

    /// The null-handle value of this class.
    pub const fn nil() -> Node {
        Node { record: None }
    }

    pub fn is_nil(&self) -> bool {
        self.record.is_none()
    }

    pub fn from_record(record: Arc<ObjRef>) -> Node {
        Node {
            record: Some(record),
        }
    }

    /// The live record. Dispatching through a nil instance is a
    /// binding-user bug and aborts.
    pub fn record(&self) -> &Arc<ObjRef> {
        match &self.record {
            Some(record) => record,
            None => panic!("method dispatched on a nil Node"),
        }
    }

    /// Hands `child` to this node. The engine becomes responsible for
    /// the child's lifetime, so the child wrapper must be the only
    /// record of its handle; fails `AliasedTransfer` otherwise, before
    /// the engine sees the child.
    pub fn add_child(&self, child: Node) -> EngineResult<()> {
        let record = match child.record {
            Some(record) => record,
            None => panic!("add_child with a nil child"),
        };
        let record =
            Arc::try_unwrap(record).map_err(|_| EngineError::AliasedTransfer)?;
        let mut frame = CallFrame::with_args(1);
        frame.set_object(0, record.handle());
        dispatch::call_unit(&ADD_CHILD, self.record(), &mut frame)?;
        // The engine owns it now; the transfer skips the owned-drop free.
        record.into_handle_transfer();
        Ok(())
    }

    pub fn get_child_count(&self) -> EngineResult<i64> {
        let mut frame = CallFrame::with_args(0);
        dispatch::call_i64(&GET_CHILD_COUNT, self.record(), &mut frame)
    }

    /// The child at `index`, bound to this node's lifetime.
    pub fn get_child(&self, index: i64) -> EngineResult<Option<Node>> {
        let mut frame = CallFrame::with_args(1);
        frame.set_int(0, index);
        let record = dispatch::call_object(
            &GET_CHILD,
            self.record(),
            &mut frame,
            ReturnOwnership::ParentBound,
            Some(self.record()),
        )?;
        Ok(record.map(Node::from_objref))
    }

    fn from_objref(record: ObjRef) -> Node {
        Node::from_record(Arc::new(record))
    }

    pub fn set_process_mode(&self, mode: ProcessMode) -> EngineResult<()> {
        let mut frame = CallFrame::with_args(1);
        frame.set_int(0, mode as i64);
        dispatch::call_unit(&SET_PROCESS_MODE, self.record(), &mut frame)
    }

    pub fn get_process_mode(&self) -> EngineResult<ProcessMode> {
        let mut frame = CallFrame::with_args(0);
        let raw = dispatch::call_i64(&GET_PROCESS_MODE, self.record(), &mut frame)?;
        Ok(match raw {
            1 => ProcessMode::Pausable,
            2 => ProcessMode::WhenPaused,
            3 => ProcessMode::Always,
            _ => ProcessMode::Inherit,
        })
    }
}
