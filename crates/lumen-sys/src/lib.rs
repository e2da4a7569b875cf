//! Raw ABI definitions for the Lumen extension interface.
//!
//! Everything in this crate is layout-compatible with the engine's C
//! headers: machine-word handle aliases, the `EngineInterface` function
//! pointer table the engine hands to the extension at load time, the
//! creation-info structs used to register host classes, and the callback
//! typedefs the engine invokes for construction, destruction, virtual
//! dispatch, and signal delivery.
//!
//! Nothing here carries semantics. Handles are never dereferenced on the
//! host side; they are opaque names for engine-owned resources. The safe
//! layer lives in `lumen-core`.

use std::ffi::{c_char, c_void};

/// Declares a `#[repr(transparent)]` machine-word handle type.
///
/// Zero is the null handle for every kind. Handles are constructed from
/// and extracted to a plain word; the core never inspects the bits.
macro_rules! raw_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[repr(transparent)]
        #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
        pub struct $name(pub usize);

        impl $name {
            pub const NULL: $name = $name(0);

            #[inline]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }

            #[inline]
            pub const fn from_word(word: usize) -> Self {
                $name(word)
            }

            #[inline]
            pub const fn to_word(self) -> usize {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::NULL
            }
        }
    };
}

raw_handle! {
    /// An engine object. Either refcounted (intrusive counter) or
    /// unreferenced (parent-owned / explicitly freed); the kind is a
    /// static property of the class.
    RawObject
}
raw_handle! {
    /// A resolved (class, method) bind token. Stable for process
    /// lifetime once returned by `method_bind_lookup`.
    RawMethodBind
}
raw_handle! {
    /// An engine-owned string. Refcounted engine-side.
    RawString
}
raw_handle! {
    /// An interned identifier. Refcounted engine-side; interning
    /// guarantees handle equality for equal text.
    RawStringName
}
raw_handle! {
    /// A typed packed array. Copy-on-write refcounted engine-side.
    RawPacked
}
raw_handle! {
    /// An array of variants. Refcounted engine-side.
    RawArray
}
raw_handle! {
    /// A variant-keyed dictionary. Refcounted engine-side.
    RawDict
}

/// Number of payload words in a variant.
pub const VARIANT_PAYLOAD_WORDS: usize = 3;

/// The engine's tagged-union value as it crosses the ABI.
///
/// `tag` selects the interpretation of `payload`; large payloads
/// (strings, containers) store a handle in `payload[0]`. Object payloads
/// store the handle in `payload[0]` and the host-observed generation in
/// `payload[1]`.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct RawVariant {
    pub tag: u32,
    pub flags: u32,
    pub payload: [u64; VARIANT_PAYLOAD_WORDS],
}

impl RawVariant {
    pub const NIL: RawVariant = RawVariant {
        tag: 0,
        flags: 0,
        payload: [0; VARIANT_PAYLOAD_WORDS],
    };
}

impl Default for RawVariant {
    fn default() -> Self {
        RawVariant::NIL
    }
}

/// Pointer to one argument slot in a ptrcall.
pub type PtrArg = *const c_void;
/// Pointer to the return slot in a ptrcall, null when the method is void.
pub type PtrRet = *mut c_void;

/// Constructs a host instance for an engine-instantiated registered
/// class. Receives the per-class userdata and the freshly constructed
/// engine object; returns the opaque instance pointer the engine will
/// pass back on later calls.
pub type CreateInstanceFn =
    unsafe extern "C" fn(class_userdata: *mut c_void, object: RawObject) -> *mut c_void;

/// Destroys a host instance previously produced by [`CreateInstanceFn`].
pub type FreeInstanceFn = unsafe extern "C" fn(class_userdata: *mut c_void, instance: *mut c_void);

/// The virtual-dispatch trampoline. The engine calls this with the
/// instance pointer, the interned name of the virtual method, the
/// argument slot addresses, and the return slot address (null for void).
pub type CallVirtualFn =
    unsafe extern "C" fn(instance: *mut c_void, name: RawStringName, args: *const PtrArg, ret: PtrRet);

/// Queried once per virtual method name at registration so the engine
/// learns which methods the class overrides. Returns null when the
/// class (including its ancestors) does not override the name.
pub type GetVirtualFn =
    unsafe extern "C" fn(class_userdata: *mut c_void, name: *const c_char) -> Option<CallVirtualFn>;

/// Delivers one signal emission to a host subscription.
pub type SignalCallFn =
    unsafe extern "C" fn(userdata: *mut c_void, args: *const RawVariant, count: usize);

/// Releases a host subscription after disconnection.
pub type SignalFreeFn = unsafe extern "C" fn(userdata: *mut c_void);

/// Everything the engine needs to instantiate and dispatch a
/// host-registered class.
#[repr(C)]
pub struct ClassCreationInfo {
    pub class_name: *const c_char,
    pub parent_name: *const c_char,
    /// Non-zero when instances carry the engine's intrusive refcount.
    pub is_refcounted: u8,
    pub class_userdata: *mut c_void,
    pub create_instance: CreateInstanceFn,
    pub free_instance: FreeInstanceFn,
    pub call_virtual: CallVirtualFn,
    pub get_virtual: GetVirtualFn,
}

/// Registration record for one scripting-visible method of a host class.
#[repr(C)]
pub struct MethodCreationInfo {
    pub method_name: *const c_char,
    pub argument_count: u32,
    /// Raw method flag bits, see `lumen-core`.
    pub flags: u32,
}

/// Registration record for one scripting-visible property.
#[repr(C)]
pub struct PropertyCreationInfo {
    pub property_name: *const c_char,
    pub variant_tag: u32,
    pub getter_name: *const c_char,
    pub setter_name: *const c_char,
    /// Raw usage flag bits, see `lumen-core`.
    pub usage: u32,
}

/// The function table the engine supplies at extension initialization.
///
/// All pointers stay valid for process lifetime. Status-returning
/// entries use the engine's status codes: zero is success, everything
/// else is an error (lifted in `lumen-core`).
#[repr(C)]
#[derive(Copy, Clone)]
pub struct EngineInterface {
    pub version_major: u32,
    pub version_minor: u32,

    // Object lifecycle.
    pub construct_object: unsafe extern "C" fn(class_name: *const c_char) -> RawObject,
    pub object_free: unsafe extern "C" fn(object: RawObject),
    /// Increments the intrusive refcount; returns the new count.
    pub object_reference: unsafe extern "C" fn(object: RawObject) -> u32,
    /// Decrements the intrusive refcount; returns the remaining count.
    /// The engine destroys the object when the count reaches zero.
    pub object_unreference: unsafe extern "C" fn(object: RawObject) -> u32,
    pub object_is_valid: unsafe extern "C" fn(object: RawObject) -> u8,
    pub object_set_instance:
        unsafe extern "C" fn(object: RawObject, class_name: *const c_char, instance: *mut c_void),
    pub object_get_instance: unsafe extern "C" fn(object: RawObject) -> *mut c_void,

    // Method dispatch.
    pub method_bind_lookup:
        unsafe extern "C" fn(class_name: *const c_char, method_name: *const c_char) -> RawMethodBind,
    pub method_bind_ptrcall:
        unsafe extern "C" fn(bind: RawMethodBind, object: RawObject, args: *const PtrArg, ret: PtrRet),

    // Strings. UTF-8 crosses by copy; the engine owns the storage.
    pub string_new_utf8: unsafe extern "C" fn(data: *const u8, len: usize) -> RawString,
    pub string_utf8_len: unsafe extern "C" fn(string: RawString) -> usize,
    pub string_copy_utf8:
        unsafe extern "C" fn(string: RawString, buf: *mut u8, cap: usize) -> usize,
    pub string_reference: unsafe extern "C" fn(string: RawString),
    pub string_release: unsafe extern "C" fn(string: RawString),

    // String-names. Interned: equal text yields equal handles.
    pub string_name_intern: unsafe extern "C" fn(data: *const u8, len: usize) -> RawStringName,
    pub string_name_utf8_len: unsafe extern "C" fn(name: RawStringName) -> usize,
    pub string_name_copy_utf8:
        unsafe extern "C" fn(name: RawStringName, buf: *mut u8, cap: usize) -> usize,
    pub string_name_reference: unsafe extern "C" fn(name: RawStringName),
    pub string_name_release: unsafe extern "C" fn(name: RawStringName),

    // Packed arrays. `kind` is a packed element kind, see `lumen-core`.
    // For the String element kind the slots hold `RawString` handles:
    // `packed_write` retains each handle written in, `packed_read`
    // returns fresh references the caller must release.
    pub packed_new: unsafe extern "C" fn(kind: u32) -> RawPacked,
    pub packed_reference: unsafe extern "C" fn(packed: RawPacked),
    pub packed_release: unsafe extern "C" fn(packed: RawPacked),
    pub packed_len: unsafe extern "C" fn(packed: RawPacked) -> usize,
    pub packed_resize: unsafe extern "C" fn(packed: RawPacked, len: usize) -> i32,
    pub packed_read:
        unsafe extern "C" fn(packed: RawPacked, start: usize, count: usize, dst: *mut c_void) -> usize,
    pub packed_write: unsafe extern "C" fn(
        packed: RawPacked,
        start: usize,
        count: usize,
        src: *const c_void,
    ) -> usize,

    // Variant arrays. Elements are copied variants; the array retains
    // handle payloads itself.
    pub array_new: unsafe extern "C" fn() -> RawArray,
    pub array_reference: unsafe extern "C" fn(array: RawArray),
    pub array_release: unsafe extern "C" fn(array: RawArray),
    pub array_len: unsafe extern "C" fn(array: RawArray) -> usize,
    pub array_push: unsafe extern "C" fn(array: RawArray, value: *const RawVariant),
    pub array_get:
        unsafe extern "C" fn(array: RawArray, index: usize, out: *mut RawVariant) -> u8,

    // Dictionaries.
    pub dict_new: unsafe extern "C" fn() -> RawDict,
    pub dict_reference: unsafe extern "C" fn(dict: RawDict),
    pub dict_release: unsafe extern "C" fn(dict: RawDict),
    pub dict_len: unsafe extern "C" fn(dict: RawDict) -> usize,
    pub dict_set:
        unsafe extern "C" fn(dict: RawDict, key: *const RawVariant, value: *const RawVariant),
    pub dict_get:
        unsafe extern "C" fn(dict: RawDict, key: *const RawVariant, out: *mut RawVariant) -> u8,
    pub dict_key_at:
        unsafe extern "C" fn(dict: RawDict, index: usize, out: *mut RawVariant) -> u8,

    // Class registration.
    pub classdb_register_class: unsafe extern "C" fn(info: *const ClassCreationInfo) -> i32,
    pub classdb_unregister_class: unsafe extern "C" fn(class_name: *const c_char) -> i32,
    pub classdb_register_method:
        unsafe extern "C" fn(class_name: *const c_char, info: *const MethodCreationInfo) -> i32,
    pub classdb_register_property:
        unsafe extern "C" fn(class_name: *const c_char, info: *const PropertyCreationInfo) -> i32,
    pub classdb_register_signal: unsafe extern "C" fn(
        class_name: *const c_char,
        signal_name: *const c_char,
        argument_count: u32,
    ) -> i32,
    pub classdb_register_enum_value: unsafe extern "C" fn(
        class_name: *const c_char,
        enum_name: *const c_char,
        value_name: *const c_char,
        value: i64,
    ) -> i32,

    // Signals. `object_connect` returns a connection id (zero on
    // failure); the engine calls `free` after disconnection.
    pub object_connect: unsafe extern "C" fn(
        object: RawObject,
        signal: RawStringName,
        userdata: *mut c_void,
        call: SignalCallFn,
        free: SignalFreeFn,
    ) -> u64,
    pub object_disconnect: unsafe extern "C" fn(object: RawObject, connection: u64) -> i32,
}

/// Signature of the extension's init entry point. Returns non-zero on
/// success.
pub type ExtensionEntryFn = unsafe extern "C" fn(interface: *const EngineInterface) -> u8;

/// Signature of the extension's teardown entry point.
pub type ExtensionTeardownFn = unsafe extern "C" fn();

/// Symbol the engine resolves on the extension library for init.
pub const ENTRY_SYMBOL: &str = "lumen_extension_init";

/// Symbol the engine resolves on the extension library for teardown.
pub const TEARDOWN_SYMBOL: &str = "lumen_extension_teardown";

/// Symbol exported by the engine library yielding the interface table,
/// used when the host loads the engine instead of the other way around.
pub const INTERFACE_SYMBOL: &[u8] = b"lumen_get_engine_interface";

/// Environment variable consulted as a path hint for the engine shared
/// library; platform-default lookup applies when absent.
pub const ENGINE_PATH_ENV: &str = "LUMEN_ENGINE_PATH";

/// Interface major version this crate was written against.
pub const INTERFACE_VERSION_MAJOR: u32 = 1;
