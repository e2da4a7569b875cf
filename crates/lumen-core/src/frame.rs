//! Stack-resident argument and return marshalling for ptrcalls.
//!
//! Every native call crossing the ABI goes through a [`CallFrame`]: a
//! fixed-capacity buffer of ABI-width slots plus a side buffer for
//! variant-typed arguments (variants are wider than a slot and cross by
//! pointer). The frame is released as a whole; handle-bearing variant
//! payloads moved into it are released on every exit path by `Drop`.
//!
//! Slot-type confusion between write and read is a programming error:
//! debug builds abort with a diagnostic, release builds read undefined
//! bits.

use crate::variant::{self, Variant};
use lumen_sys::{PtrArg, PtrRet, RawMethodBind, RawObject, RawVariant};
use std::ffi::c_void;

/// Maximum arguments of any engine method signature.
pub const MAX_ARGS: usize = 16;

/// One ABI argument or return slot. Wide and aligned enough for every
/// primitive ABI type: integers, floats, handles, small vectors.
#[repr(C, align(16))]
#[derive(Copy, Clone)]
pub union Slot {
    pub int: i64,
    pub uint: u64,
    pub real: f64,
    pub word: usize,
    pub vec4: [f32; 4],
}

impl Slot {
    pub const ZERO: Slot = Slot { uint: 0 };
}

/// The ABI type last written into a slot. Kept in release builds too:
/// it selects whether the argument pointer targets the slot buffer or
/// the variant side buffer.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SlotKind {
    Empty,
    Int,
    Uint,
    Real,
    Word,
    Vec4,
    Variant,
}

/// A typed argument/return buffer for one native call.
pub struct CallFrame {
    slots: [Slot; MAX_ARGS],
    variants: [RawVariant; MAX_ARGS],
    kinds: [SlotKind; MAX_ARGS],
    len: usize,
    ret: Slot,
    ret_variant: RawVariant,
    ret_kind: SlotKind,
}

impl CallFrame {
    /// Allocates a frame for `len` arguments and no return slot.
    pub fn with_args(len: usize) -> CallFrame {
        assert!(len <= MAX_ARGS, "method signature exceeds {MAX_ARGS} arguments");
        CallFrame {
            slots: [Slot::ZERO; MAX_ARGS],
            variants: [RawVariant::NIL; MAX_ARGS],
            kinds: [SlotKind::Empty; MAX_ARGS],
            len,
            ret: Slot::ZERO,
            ret_variant: RawVariant::NIL,
            ret_kind: SlotKind::Empty,
        }
    }

    pub fn arg_count(&self) -> usize {
        self.len
    }

    #[inline]
    fn slot_mut(&mut self, index: usize, kind: SlotKind) -> &mut Slot {
        assert!(index < self.len, "argument index {index} out of range");
        self.kinds[index] = kind;
        &mut self.slots[index]
    }

    pub fn set_int(&mut self, index: usize, value: i64) {
        self.slot_mut(index, SlotKind::Int).int = value;
    }

    pub fn set_uint(&mut self, index: usize, value: u64) {
        self.slot_mut(index, SlotKind::Uint).uint = value;
    }

    pub fn set_bool(&mut self, index: usize, value: bool) {
        self.slot_mut(index, SlotKind::Uint).uint = value as u64;
    }

    pub fn set_real(&mut self, index: usize, value: f64) {
        self.slot_mut(index, SlotKind::Real).real = value;
    }

    pub fn set_word(&mut self, index: usize, value: usize) {
        self.slot_mut(index, SlotKind::Word).word = value;
    }

    pub fn set_object(&mut self, index: usize, handle: RawObject) {
        self.set_word(index, handle.to_word());
    }

    pub fn set_vec4(&mut self, index: usize, value: [f32; 4]) {
        self.slot_mut(index, SlotKind::Vec4).vec4 = value;
    }

    /// Moves a variant into the frame. Ownership of any handle payload
    /// transfers to the frame and is released when the frame drops.
    pub fn set_variant(&mut self, index: usize, value: Variant) {
        assert!(index < self.len, "argument index {index} out of range");
        let previous = std::mem::replace(&mut self.variants[index], value.into_raw());
        if self.kinds[index] == SlotKind::Variant {
            variant::raw_drop(&previous);
        }
        self.kinds[index] = SlotKind::Variant;
    }

    /// Declares the ABI type of the return slot. `SlotKind::Empty`
    /// (the default) means the method returns nothing.
    pub fn set_return_kind(&mut self, kind: SlotKind) {
        if self.ret_kind == SlotKind::Variant {
            variant::raw_drop(&self.ret_variant);
            self.ret_variant = RawVariant::NIL;
        }
        self.ret_kind = kind;
        self.ret = Slot::ZERO;
    }

    /// Invokes a resolved method bind against `target` with this frame.
    ///
    /// # Safety
    /// `bind` must be live for `target`'s class and the slot types must
    /// match the method's signature; the dispatch layer guarantees both.
    pub unsafe fn invoke(&mut self, bind: RawMethodBind, target: RawObject) {
        let mut args: [PtrArg; MAX_ARGS] = [std::ptr::null(); MAX_ARGS];
        for i in 0..self.len {
            debug_assert_ne!(
                self.kinds[i],
                SlotKind::Empty,
                "argument slot {i} was never written"
            );
            args[i] = if self.kinds[i] == SlotKind::Variant {
                &self.variants[i] as *const RawVariant as PtrArg
            } else {
                &self.slots[i] as *const Slot as PtrArg
            };
        }
        let ret: PtrRet = match self.ret_kind {
            SlotKind::Empty => std::ptr::null_mut(),
            SlotKind::Variant => &mut self.ret_variant as *mut RawVariant as PtrRet,
            _ => &mut self.ret as *mut Slot as PtrRet,
        };
        unsafe {
            (crate::interface::iface().method_bind_ptrcall)(bind, target, args.as_ptr(), ret);
        }
    }

    #[inline]
    fn check_ret(&self, kind: SlotKind) {
        debug_assert_eq!(
            self.ret_kind, kind,
            "return slot read as {kind:?} but declared {:?}",
            self.ret_kind
        );
    }

    pub fn return_int(&self) -> i64 {
        self.check_ret(SlotKind::Int);
        unsafe { self.ret.int }
    }

    pub fn return_uint(&self) -> u64 {
        self.check_ret(SlotKind::Uint);
        unsafe { self.ret.uint }
    }

    pub fn return_bool(&self) -> bool {
        self.check_ret(SlotKind::Uint);
        unsafe { self.ret.uint != 0 }
    }

    pub fn return_real(&self) -> f64 {
        self.check_ret(SlotKind::Real);
        unsafe { self.ret.real }
    }

    pub fn return_word(&self) -> usize {
        self.check_ret(SlotKind::Word);
        unsafe { self.ret.word }
    }

    pub fn return_object(&self) -> RawObject {
        RawObject::from_word(self.return_word())
    }

    pub fn return_vec4(&self) -> [f32; 4] {
        self.check_ret(SlotKind::Vec4);
        unsafe { self.ret.vec4 }
    }

    /// Moves the variant return out of the frame. Subsequent reads see
    /// an empty return slot.
    pub fn take_return_variant(&mut self) -> Variant {
        self.check_ret(SlotKind::Variant);
        self.ret_kind = SlotKind::Empty;
        let raw = std::mem::replace(&mut self.ret_variant, RawVariant::NIL);
        // Safety: the engine wrote an owned variant into the return slot.
        unsafe { Variant::from_raw(raw) }
    }
}

impl Drop for CallFrame {
    fn drop(&mut self) {
        for i in 0..self.len {
            if self.kinds[i] == SlotKind::Variant {
                variant::raw_drop(&self.variants[i]);
            }
        }
        if self.ret_kind == SlotKind::Variant {
            variant::raw_drop(&self.ret_variant);
        }
    }
}
