//! Typed packed arrays held by copy-on-write engine handle.
//!
//! The host never mirrors packed storage: mutation goes through the
//! engine, and element access copies a slice into host memory on read.
//! A cloned handle shares storage until either side mutates.

use crate::error::{EngineResult, EngineStatus, VariantError};
use crate::interface::iface;
use crate::math::{Color, Vector2, Vector3, Vector4};
use crate::variant::{
    FromVariant, ToVariant, Variant, VariantTag, new_engine_string, read_engine_string,
};
use lumen_sys::{RawPacked, RawString};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::ffi::c_void;
use std::marker::PhantomData;

/// Element kinds the engine's packed arrays support.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
pub enum PackedKind {
    Byte = 0,
    Int32 = 1,
    Int64 = 2,
    Float32 = 3,
    Float64 = 4,
    Vector2 = 5,
    Vector3 = 6,
    Vector4 = 7,
    Color = 8,
    String = 9,
}

/// A plain element type storable in a packed array.
///
/// # Safety
/// Implementors must be plain-old-data with exactly the layout the
/// engine stores for `KIND`.
pub unsafe trait PackedElement: Copy {
    const KIND: PackedKind;
    const TAG: VariantTag;
}

macro_rules! packed_element {
    ($($ty:ty => $kind:ident, $tag:ident;)*) => {
        $(
            unsafe impl PackedElement for $ty {
                const KIND: PackedKind = PackedKind::$kind;
                const TAG: VariantTag = VariantTag::$tag;
            }
        )*
    };
}

packed_element! {
    u8 => Byte, PackedByteArray;
    i32 => Int32, PackedInt32Array;
    i64 => Int64, PackedInt64Array;
    f32 => Float32, PackedFloat32Array;
    f64 => Float64, PackedFloat64Array;
    Vector2 => Vector2, PackedVector2Array;
    Vector3 => Vector3, PackedVector3Array;
    Vector4 => Vector4, PackedVector4Array;
    Color => Color, PackedColorArray;
}

/// A typed packed array of plain elements.
#[derive(Debug)]
pub struct Packed<T: PackedElement> {
    raw: RawPacked,
    _marker: PhantomData<T>,
}

impl<T: PackedElement> Packed<T> {
    pub fn new() -> Packed<T> {
        Packed {
            raw: unsafe { (iface().packed_new)(T::KIND.into()) },
            _marker: PhantomData,
        }
    }

    pub fn from_slice(elements: &[T]) -> EngineResult<Packed<T>> {
        let packed = Packed::new();
        packed.resize(elements.len())?;
        packed.write(0, elements);
        Ok(packed)
    }

    pub(crate) fn from_raw_retained(raw: RawPacked) -> Packed<T> {
        Packed {
            raw,
            _marker: PhantomData,
        }
    }

    pub fn raw(&self) -> RawPacked {
        self.raw
    }

    pub fn len(&self) -> usize {
        unsafe { (iface().packed_len)(self.raw) }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resize(&self, len: usize) -> EngineResult<()> {
        EngineStatus::from_code(unsafe { (iface().packed_resize)(self.raw, len) })
    }

    /// Copies `count` elements starting at `start` into host memory.
    pub fn read(&self, start: usize, count: usize) -> Vec<T> {
        let mut out: Vec<T> = Vec::with_capacity(count);
        let copied = unsafe {
            (iface().packed_read)(self.raw, start, count, out.as_mut_ptr() as *mut c_void)
        };
        // Safety: the engine wrote `copied` elements of T's layout.
        unsafe { out.set_len(copied) };
        out
    }

    /// Writes `elements` starting at `start`; returns how many were
    /// stored. Mutation unshares copy-on-write storage engine-side.
    pub fn write(&self, start: usize, elements: &[T]) -> usize {
        unsafe {
            (iface().packed_write)(
                self.raw,
                start,
                elements.len(),
                elements.as_ptr() as *const c_void,
            )
        }
    }

    pub fn push(&self, element: T) -> EngineResult<()> {
        let len = self.len();
        self.resize(len + 1)?;
        self.write(len, std::slice::from_ref(&element));
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.read(0, self.len())
    }
}

impl<T: PackedElement> Default for Packed<T> {
    fn default() -> Self {
        Packed::new()
    }
}

impl<T: PackedElement> Clone for Packed<T> {
    fn clone(&self) -> Self {
        unsafe { (iface().packed_reference)(self.raw) };
        Packed::from_raw_retained(self.raw)
    }
}

impl<T: PackedElement> Drop for Packed<T> {
    fn drop(&mut self) {
        unsafe { (iface().packed_release)(self.raw) };
    }
}

impl<T: PackedElement> ToVariant for Packed<T> {
    fn to_variant(&self) -> Variant {
        unsafe { (iface().packed_reference)(self.raw) };
        Variant::from_packed_retained(T::TAG, self.raw)
    }
}

impl<T: PackedElement> FromVariant for Packed<T> {
    fn from_variant(variant: &Variant) -> Result<Self, VariantError> {
        variant
            .to_packed_retained(T::TAG)
            .map(Packed::from_raw_retained)
    }
}

/// A packed array of engine strings.
///
/// The element slots hold string handles, so element access goes through
/// the string lifecycle primitives rather than a byte copy: writes hand
/// the engine a reference, reads receive a fresh one.
#[derive(Debug)]
pub struct PackedStringArray {
    raw: RawPacked,
}

impl PackedStringArray {
    pub fn new() -> PackedStringArray {
        PackedStringArray {
            raw: unsafe { (iface().packed_new)(PackedKind::String.into()) },
        }
    }

    pub fn from_strs(elements: &[&str]) -> EngineResult<PackedStringArray> {
        let packed = PackedStringArray::new();
        for text in elements {
            packed.push(text)?;
        }
        Ok(packed)
    }

    pub fn raw(&self) -> RawPacked {
        self.raw
    }

    pub fn len(&self) -> usize {
        unsafe { (iface().packed_len)(self.raw) }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, text: &str) -> EngineResult<()> {
        let len = self.len();
        EngineStatus::from_code(unsafe { (iface().packed_resize)(self.raw, len + 1) })?;
        let string = new_engine_string(text);
        unsafe {
            // packed_write retains the handle; drop our reference after.
            (iface().packed_write)(self.raw, len, 1, &string as *const RawString as *const c_void);
            (iface().string_release)(string);
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<String> {
        if index >= self.len() {
            return None;
        }
        let mut slot = RawString::NULL;
        let copied = unsafe {
            (iface().packed_read)(self.raw, index, 1, &mut slot as *mut RawString as *mut c_void)
        };
        if copied != 1 || slot.is_null() {
            return None;
        }
        let text = read_engine_string(slot);
        unsafe { (iface().string_release)(slot) };
        Some(text)
    }

    pub fn to_vec(&self) -> Vec<String> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }
}

impl Default for PackedStringArray {
    fn default() -> Self {
        PackedStringArray::new()
    }
}

impl Clone for PackedStringArray {
    fn clone(&self) -> Self {
        unsafe { (iface().packed_reference)(self.raw) };
        PackedStringArray { raw: self.raw }
    }
}

impl Drop for PackedStringArray {
    fn drop(&mut self) {
        unsafe { (iface().packed_release)(self.raw) };
    }
}

impl ToVariant for PackedStringArray {
    fn to_variant(&self) -> Variant {
        unsafe { (iface().packed_reference)(self.raw) };
        Variant::from_packed_retained(VariantTag::PackedStringArray, self.raw)
    }
}

impl FromVariant for PackedStringArray {
    fn from_variant(variant: &Variant) -> Result<Self, VariantError> {
        variant
            .to_packed_retained(VariantTag::PackedStringArray)
            .map(|raw| PackedStringArray { raw })
    }
}
