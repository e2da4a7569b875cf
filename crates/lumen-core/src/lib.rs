//! Core runtime of the Lumen host binding: the opaque handle layer,
//! pointer-ownership records, variant and packed-container bridges,
//! method dispatch, class registration, and signal subscription, all
//! built over the raw ABI in `lumen-sys`.

pub mod dispatch;
pub mod error;
pub mod frame;
pub mod interface;
pub mod math;
pub mod object;
pub mod packed;
pub mod registry;
pub mod signals;
pub mod string_name;
pub mod variant;

pub use error::{EngineError, EngineResult, EngineStatus, VariantError};

pub mod prelude {
    pub use crate::dispatch::{ClassId, MethodId, MethodSpec, ReturnOwnership};
    pub use crate::error::{EngineError, EngineResult, EngineStatus, VariantError};
    pub use crate::frame::CallFrame;
    pub use crate::math::{Color, Vector2, Vector3, Vector4};
    pub use crate::object::{Base, Disposition, ObjRef, WeakRef};
    pub use crate::packed::{Packed, PackedElement, PackedKind, PackedStringArray};
    pub use crate::registry::{HostClass, MethodFlags, PropertyUsage, VirtualTable};
    pub use crate::signals::Subscription;
    pub use crate::string_name::StringName;
    pub use crate::variant::{
        Dictionary, FromVariant, NodePath, ToVariant, VarArray, Variant, VariantTag,
    };
}
