//! The variant bridge: host values in and out of the engine's tagged
//! union.
//!
//! A variant is a tag plus three payload words. Scalars live inline;
//! strings, names, containers, and packed arrays store an engine handle
//! in the first payload word and are refcounted engine-side. Object
//! payloads are non-owning: they carry the handle and the generation
//! observed at capture, and reading one fails with
//! [`VariantError::Dangling`] once the handle dies.
//!
//! Construction writes tag + payload; reading inspects the tag and is
//! fallible. Copies are defensive clones (handle payloads gain a
//! reference); moves into a call frame transfer ownership to the frame.

use crate::error::{EngineResult, VariantError};
use crate::interface::iface;
use crate::math::{Color, Vector2, Vector3, Vector4};
use crate::object::{self, ObjRef};
use crate::string_name::StringName;
use lumen_sys::{RawArray, RawDict, RawObject, RawString, RawStringName, RawVariant};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Tags of the engine's tagged-union value type.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
pub enum VariantTag {
    Nil = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    StringName = 5,
    NodePath = 6,
    Object = 7,
    Vector2 = 8,
    Vector3 = 9,
    Vector4 = 10,
    Color = 11,
    Array = 12,
    Dictionary = 13,
    PackedByteArray = 14,
    PackedInt32Array = 15,
    PackedInt64Array = 16,
    PackedFloat32Array = 17,
    PackedFloat64Array = 18,
    PackedVector2Array = 19,
    PackedVector3Array = 20,
    PackedVector4Array = 21,
    PackedColorArray = 22,
    PackedStringArray = 23,
}

impl VariantTag {
    pub fn name(self) -> &'static str {
        match self {
            VariantTag::Nil => "Nil",
            VariantTag::Bool => "Bool",
            VariantTag::Int => "Int",
            VariantTag::Float => "Float",
            VariantTag::String => "String",
            VariantTag::StringName => "StringName",
            VariantTag::NodePath => "NodePath",
            VariantTag::Object => "Object",
            VariantTag::Vector2 => "Vector2",
            VariantTag::Vector3 => "Vector3",
            VariantTag::Vector4 => "Vector4",
            VariantTag::Color => "Color",
            VariantTag::Array => "Array",
            VariantTag::Dictionary => "Dictionary",
            VariantTag::PackedByteArray => "PackedByteArray",
            VariantTag::PackedInt32Array => "PackedInt32Array",
            VariantTag::PackedInt64Array => "PackedInt64Array",
            VariantTag::PackedFloat32Array => "PackedFloat32Array",
            VariantTag::PackedFloat64Array => "PackedFloat64Array",
            VariantTag::PackedVector2Array => "PackedVector2Array",
            VariantTag::PackedVector3Array => "PackedVector3Array",
            VariantTag::PackedVector4Array => "PackedVector4Array",
            VariantTag::PackedColorArray => "PackedColorArray",
            VariantTag::PackedStringArray => "PackedStringArray",
        }
    }

    pub fn is_packed(self) -> bool {
        matches!(
            self,
            VariantTag::PackedByteArray
                | VariantTag::PackedInt32Array
                | VariantTag::PackedInt64Array
                | VariantTag::PackedFloat32Array
                | VariantTag::PackedFloat64Array
                | VariantTag::PackedVector2Array
                | VariantTag::PackedVector3Array
                | VariantTag::PackedVector4Array
                | VariantTag::PackedColorArray
                | VariantTag::PackedStringArray
        )
    }
}

/// Copies a host string into engine-owned storage.
pub(crate) fn new_engine_string(text: &str) -> RawString {
    unsafe { (iface().string_new_utf8)(text.as_ptr(), text.len()) }
}

/// Copies an engine string back into host memory.
pub(crate) fn read_engine_string(string: RawString) -> String {
    let len = unsafe { (iface().string_utf8_len)(string) };
    let mut buf = vec![0u8; len];
    let copied = unsafe { (iface().string_copy_utf8)(string, buf.as_mut_ptr(), len) };
    buf.truncate(copied);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Releases whatever handle a raw variant's payload carries.
pub(crate) fn raw_drop(raw: &RawVariant) {
    let Ok(tag) = VariantTag::try_from(raw.tag) else {
        return;
    };
    let word = raw.payload[0] as usize;
    if word == 0 {
        return;
    }
    unsafe {
        match tag {
            VariantTag::String | VariantTag::NodePath => {
                (iface().string_release)(RawString::from_word(word))
            }
            VariantTag::StringName => {
                (iface().string_name_release)(RawStringName::from_word(word))
            }
            VariantTag::Array => (iface().array_release)(RawArray::from_word(word)),
            VariantTag::Dictionary => (iface().dict_release)(RawDict::from_word(word)),
            tag if tag.is_packed() => {
                (iface().packed_release)(lumen_sys::RawPacked::from_word(word))
            }
            _ => {}
        }
    }
}

/// Adds a reference to whatever handle a raw variant's payload carries
/// and returns the copied value.
pub(crate) fn raw_clone(raw: &RawVariant) -> RawVariant {
    if let Ok(tag) = VariantTag::try_from(raw.tag) {
        let word = raw.payload[0] as usize;
        if word != 0 {
            unsafe {
                match tag {
                    VariantTag::String | VariantTag::NodePath => {
                        (iface().string_reference)(RawString::from_word(word))
                    }
                    VariantTag::StringName => {
                        (iface().string_name_reference)(RawStringName::from_word(word))
                    }
                    VariantTag::Array => (iface().array_reference)(RawArray::from_word(word)),
                    VariantTag::Dictionary => (iface().dict_reference)(RawDict::from_word(word)),
                    tag if tag.is_packed() => {
                        (iface().packed_reference)(lumen_sys::RawPacked::from_word(word))
                    }
                    _ => {}
                }
            }
        }
    }
    *raw
}

/// A path naming a node in the engine's scene tree. Crosses the ABI as
/// an engine string under its own tag.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct NodePath(pub String);

/// An owned host-side variant.
#[derive(Debug)]
pub struct Variant {
    raw: RawVariant,
}

impl Variant {
    pub fn nil() -> Variant {
        Variant {
            raw: RawVariant::NIL,
        }
    }

    fn with_tag(tag: VariantTag, payload: [u64; 3]) -> Variant {
        Variant {
            raw: RawVariant {
                tag: tag.into(),
                flags: 0,
                payload,
            },
        }
    }

    pub fn from_bool(value: bool) -> Variant {
        Variant::with_tag(VariantTag::Bool, [value as u64, 0, 0])
    }

    pub fn from_i64(value: i64) -> Variant {
        Variant::with_tag(VariantTag::Int, [value as u64, 0, 0])
    }

    pub fn from_f64(value: f64) -> Variant {
        Variant::with_tag(VariantTag::Float, [value.to_bits(), 0, 0])
    }

    /// Copies `text` into engine-owned storage; the host retains no
    /// pointer into engine memory.
    pub fn from_str(text: &str) -> Variant {
        let string = new_engine_string(text);
        Variant::with_tag(VariantTag::String, [string.to_word() as u64, 0, 0])
    }

    pub fn from_string_name(name: &StringName) -> Variant {
        let owned = name.clone();
        let raw = owned.raw();
        std::mem::forget(owned);
        Variant::with_tag(VariantTag::StringName, [raw.to_word() as u64, 0, 0])
    }

    pub fn from_node_path(path: &NodePath) -> Variant {
        let string = new_engine_string(&path.0);
        Variant::with_tag(VariantTag::NodePath, [string.to_word() as u64, 0, 0])
    }

    /// Captures an object handle without taking ownership. The record's
    /// generation travels with the payload so later reads can detect a
    /// dead handle.
    pub fn from_object(record: &ObjRef) -> Variant {
        record.assert_live();
        Variant::with_tag(
            VariantTag::Object,
            [record.handle().to_word() as u64, record.generation(), 0],
        )
    }

    pub fn from_vector2(value: Vector2) -> Variant {
        Variant::with_tag(
            VariantTag::Vector2,
            [pack_f32_pair(value.x, value.y), 0, 0],
        )
    }

    pub fn from_vector3(value: Vector3) -> Variant {
        Variant::with_tag(
            VariantTag::Vector3,
            [pack_f32_pair(value.x, value.y), value.z.to_bits() as u64, 0],
        )
    }

    pub fn from_vector4(value: Vector4) -> Variant {
        Variant::with_tag(
            VariantTag::Vector4,
            [
                pack_f32_pair(value.x, value.y),
                pack_f32_pair(value.z, value.w),
                0,
            ],
        )
    }

    pub fn from_color(value: Color) -> Variant {
        Variant::with_tag(
            VariantTag::Color,
            [
                pack_f32_pair(value.r, value.g),
                pack_f32_pair(value.b, value.a),
                0,
            ],
        )
    }

    pub fn from_array(array: &VarArray) -> Variant {
        unsafe { (iface().array_reference)(array.raw()) };
        Variant::with_tag(VariantTag::Array, [array.raw().to_word() as u64, 0, 0])
    }

    pub fn from_dictionary(dict: &Dictionary) -> Variant {
        unsafe { (iface().dict_reference)(dict.raw()) };
        Variant::with_tag(VariantTag::Dictionary, [dict.raw().to_word() as u64, 0, 0])
    }

    /// Wraps an already-retained packed handle under its variant tag.
    pub(crate) fn from_packed_retained(tag: VariantTag, packed: lumen_sys::RawPacked) -> Variant {
        debug_assert!(tag.is_packed());
        Variant::with_tag(tag, [packed.to_word() as u64, 0, 0])
    }

    /// Adopts an engine-written raw variant, taking ownership of any
    /// handle payload.
    ///
    /// # Safety
    /// The payload's reference, if any, must be owned by the caller.
    pub unsafe fn from_raw(raw: RawVariant) -> Variant {
        Variant { raw }
    }

    /// Clones an engine-held raw variant defensively.
    pub fn from_raw_copied(raw: &RawVariant) -> Variant {
        Variant {
            raw: raw_clone(raw),
        }
    }

    /// Releases the variant's ownership to the caller.
    pub fn into_raw(self) -> RawVariant {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }

    pub fn as_raw(&self) -> &RawVariant {
        &self.raw
    }

    pub fn tag(&self) -> VariantTag {
        VariantTag::try_from(self.raw.tag).unwrap_or(VariantTag::Nil)
    }

    pub fn is_nil(&self) -> bool {
        self.tag() == VariantTag::Nil
    }

    fn expect_tag(&self, expected: VariantTag) -> Result<(), VariantError> {
        let found = self.tag();
        if found != expected {
            return Err(VariantError::TypeMismatch {
                expected: expected.name(),
                found: found.name(),
            });
        }
        Ok(())
    }

    pub fn to_bool(&self) -> Result<bool, VariantError> {
        self.expect_tag(VariantTag::Bool)?;
        Ok(self.raw.payload[0] != 0)
    }

    pub fn to_i64(&self) -> Result<i64, VariantError> {
        self.expect_tag(VariantTag::Int)?;
        Ok(self.raw.payload[0] as i64)
    }

    pub fn to_i32(&self) -> Result<i32, VariantError> {
        let value = self.to_i64()?;
        i32::try_from(value).map_err(|_| VariantError::Range {
            value,
            target: "i32",
        })
    }

    pub fn to_u8(&self) -> Result<u8, VariantError> {
        let value = self.to_i64()?;
        u8::try_from(value).map_err(|_| VariantError::Range { value, target: "u8" })
    }

    pub fn to_f64(&self) -> Result<f64, VariantError> {
        self.expect_tag(VariantTag::Float)?;
        Ok(f64::from_bits(self.raw.payload[0]))
    }

    pub fn to_host_string(&self) -> Result<String, VariantError> {
        self.expect_tag(VariantTag::String)?;
        Ok(read_engine_string(RawString::from_word(
            self.raw.payload[0] as usize,
        )))
    }

    pub fn to_string_name(&self) -> Result<StringName, VariantError> {
        self.expect_tag(VariantTag::StringName)?;
        let raw = RawStringName::from_word(self.raw.payload[0] as usize);
        unsafe { (iface().string_name_reference)(raw) };
        Ok(StringName::from_raw_retained(raw))
    }

    pub fn to_node_path(&self) -> Result<NodePath, VariantError> {
        self.expect_tag(VariantTag::NodePath)?;
        Ok(NodePath(read_engine_string(RawString::from_word(
            self.raw.payload[0] as usize,
        ))))
    }

    /// Reads an object payload as a borrow. Fails `Dangling` when the
    /// handle no longer carries the generation captured at creation, or
    /// when the engine has destroyed the object behind the host's back.
    pub fn to_object(&self) -> Result<ObjRef, VariantError> {
        self.expect_tag(VariantTag::Object)?;
        let handle = RawObject::from_word(self.raw.payload[0] as usize);
        let generation = self.raw.payload[1];
        if !object::handle_is_usable(handle, generation) {
            return Err(VariantError::Dangling);
        }
        ObjRef::wrap_borrowed(handle).map_err(|_| VariantError::Dangling)
    }

    pub fn to_vector2(&self) -> Result<Vector2, VariantError> {
        self.expect_tag(VariantTag::Vector2)?;
        let (x, y) = unpack_f32_pair(self.raw.payload[0]);
        Ok(Vector2::new(x, y))
    }

    pub fn to_vector3(&self) -> Result<Vector3, VariantError> {
        self.expect_tag(VariantTag::Vector3)?;
        let (x, y) = unpack_f32_pair(self.raw.payload[0]);
        let z = f32::from_bits(self.raw.payload[1] as u32);
        Ok(Vector3::new(x, y, z))
    }

    pub fn to_vector4(&self) -> Result<Vector4, VariantError> {
        self.expect_tag(VariantTag::Vector4)?;
        let (x, y) = unpack_f32_pair(self.raw.payload[0]);
        let (z, w) = unpack_f32_pair(self.raw.payload[1]);
        Ok(Vector4::new(x, y, z, w))
    }

    pub fn to_color(&self) -> Result<Color, VariantError> {
        self.expect_tag(VariantTag::Color)?;
        let (r, g) = unpack_f32_pair(self.raw.payload[0]);
        let (b, a) = unpack_f32_pair(self.raw.payload[1]);
        Ok(Color::new(r, g, b, a))
    }

    pub fn to_array(&self) -> Result<VarArray, VariantError> {
        self.expect_tag(VariantTag::Array)?;
        let raw = RawArray::from_word(self.raw.payload[0] as usize);
        unsafe { (iface().array_reference)(raw) };
        Ok(VarArray::from_raw_retained(raw))
    }

    pub fn to_dictionary(&self) -> Result<Dictionary, VariantError> {
        self.expect_tag(VariantTag::Dictionary)?;
        let raw = RawDict::from_word(self.raw.payload[0] as usize);
        unsafe { (iface().dict_reference)(raw) };
        Ok(Dictionary::from_raw_retained(raw))
    }

    /// The packed handle under `tag`, with a fresh reference.
    pub(crate) fn to_packed_retained(
        &self,
        tag: VariantTag,
    ) -> Result<lumen_sys::RawPacked, VariantError> {
        self.expect_tag(tag)?;
        let raw = lumen_sys::RawPacked::from_word(self.raw.payload[0] as usize);
        unsafe { (iface().packed_reference)(raw) };
        Ok(raw)
    }
}

impl Clone for Variant {
    fn clone(&self) -> Self {
        Variant {
            raw: raw_clone(&self.raw),
        }
    }
}

impl Drop for Variant {
    fn drop(&mut self) {
        raw_drop(&self.raw);
    }
}

impl Default for Variant {
    fn default() -> Self {
        Variant::nil()
    }
}

fn pack_f32_pair(a: f32, b: f32) -> u64 {
    (a.to_bits() as u64) | ((b.to_bits() as u64) << 32)
}

fn unpack_f32_pair(word: u64) -> (f32, f32) {
    (
        f32::from_bits(word as u32),
        f32::from_bits((word >> 32) as u32),
    )
}

/// Host conversion into a variant.
pub trait ToVariant {
    fn to_variant(&self) -> Variant;
}

/// Fallible host conversion out of a variant.
pub trait FromVariant: Sized {
    fn from_variant(variant: &Variant) -> Result<Self, VariantError>;
}

macro_rules! scalar_variant_impls {
    ($($ty:ty => $to:ident, $from:ident;)*) => {
        $(
            impl ToVariant for $ty {
                fn to_variant(&self) -> Variant {
                    Variant::$to(*self)
                }
            }

            impl FromVariant for $ty {
                fn from_variant(variant: &Variant) -> Result<Self, VariantError> {
                    variant.$from()
                }
            }
        )*
    };
}

scalar_variant_impls! {
    bool => from_bool, to_bool;
    i64 => from_i64, to_i64;
    f64 => from_f64, to_f64;
}

impl ToVariant for i32 {
    fn to_variant(&self) -> Variant {
        Variant::from_i64(*self as i64)
    }
}

impl FromVariant for i32 {
    fn from_variant(variant: &Variant) -> Result<Self, VariantError> {
        variant.to_i32()
    }
}

impl ToVariant for &str {
    fn to_variant(&self) -> Variant {
        Variant::from_str(self)
    }
}

impl ToVariant for String {
    fn to_variant(&self) -> Variant {
        Variant::from_str(self)
    }
}

impl FromVariant for String {
    fn from_variant(variant: &Variant) -> Result<Self, VariantError> {
        variant.to_host_string()
    }
}

impl ToVariant for StringName {
    fn to_variant(&self) -> Variant {
        Variant::from_string_name(self)
    }
}

impl FromVariant for StringName {
    fn from_variant(variant: &Variant) -> Result<Self, VariantError> {
        variant.to_string_name()
    }
}

impl ToVariant for NodePath {
    fn to_variant(&self) -> Variant {
        Variant::from_node_path(self)
    }
}

impl FromVariant for NodePath {
    fn from_variant(variant: &Variant) -> Result<Self, VariantError> {
        variant.to_node_path()
    }
}

/// A handle-indirected, engine-refcounted array of variants.
#[derive(Debug)]
pub struct VarArray {
    raw: RawArray,
}

impl VarArray {
    pub fn new() -> VarArray {
        VarArray {
            raw: unsafe { (iface().array_new)() },
        }
    }

    pub(crate) fn from_raw_retained(raw: RawArray) -> VarArray {
        VarArray { raw }
    }

    pub fn raw(&self) -> RawArray {
        self.raw
    }

    pub fn len(&self) -> usize {
        unsafe { (iface().array_len)(self.raw) }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a copy of `value`; the array retains the payload itself.
    pub fn push(&self, value: &Variant) {
        unsafe { (iface().array_push)(self.raw, value.as_raw()) };
    }

    pub fn get(&self, index: usize) -> Option<Variant> {
        let mut out = RawVariant::NIL;
        let ok = unsafe { (iface().array_get)(self.raw, index, &mut out) };
        // The engine writes an owned copy into `out`.
        (ok != 0).then(|| unsafe { Variant::from_raw(out) })
    }

    pub fn to_vec(&self) -> Vec<Variant> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }
}

impl Default for VarArray {
    fn default() -> Self {
        VarArray::new()
    }
}

impl Clone for VarArray {
    fn clone(&self) -> Self {
        unsafe { (iface().array_reference)(self.raw) };
        VarArray { raw: self.raw }
    }
}

impl Drop for VarArray {
    fn drop(&mut self) {
        unsafe { (iface().array_release)(self.raw) };
    }
}

impl FromIterator<Variant> for VarArray {
    fn from_iter<I: IntoIterator<Item = Variant>>(iter: I) -> Self {
        let array = VarArray::new();
        for value in iter {
            array.push(&value);
        }
        array
    }
}

/// A handle-indirected, engine-refcounted variant-keyed dictionary.
#[derive(Debug)]
pub struct Dictionary {
    raw: RawDict,
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary {
            raw: unsafe { (iface().dict_new)() },
        }
    }

    pub(crate) fn from_raw_retained(raw: RawDict) -> Dictionary {
        Dictionary { raw }
    }

    pub fn raw(&self) -> RawDict {
        self.raw
    }

    pub fn len(&self) -> usize {
        unsafe { (iface().dict_len)(self.raw) }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&self, key: &Variant, value: &Variant) {
        unsafe { (iface().dict_set)(self.raw, key.as_raw(), value.as_raw()) };
    }

    pub fn get(&self, key: &Variant) -> Option<Variant> {
        let mut out = RawVariant::NIL;
        let found = unsafe { (iface().dict_get)(self.raw, key.as_raw(), &mut out) };
        (found != 0).then(|| unsafe { Variant::from_raw(out) })
    }

    pub fn key_at(&self, index: usize) -> Option<Variant> {
        let mut out = RawVariant::NIL;
        let found = unsafe { (iface().dict_key_at)(self.raw, index, &mut out) };
        (found != 0).then(|| unsafe { Variant::from_raw(out) })
    }

    pub fn keys(&self) -> Vec<Variant> {
        (0..self.len()).filter_map(|i| self.key_at(i)).collect()
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Dictionary::new()
    }
}

impl Clone for Dictionary {
    fn clone(&self) -> Self {
        unsafe { (iface().dict_reference)(self.raw) };
        Dictionary { raw: self.raw }
    }
}

impl Drop for Dictionary {
    fn drop(&mut self) {
        unsafe { (iface().dict_release)(self.raw) };
    }
}
