//! In-process stand-in for the engine side of the extension interface.
//!
//! Implements every entry of the interface table over a mutex-guarded
//! store of objects, strings, containers, binds, registered classes,
//! and signal connections, plus hooks the tests use to drive the engine
//! side (emit a signal, invoke a virtual, inspect refcounts and
//! destruction).

#![allow(dead_code)]

use lumen_sys::{
    CallVirtualFn, ClassCreationInfo, CreateInstanceFn, EngineInterface, FreeInstanceFn,
    MethodCreationInfo, PropertyCreationInfo, PtrArg, PtrRet, RawArray, RawDict, RawMethodBind,
    RawObject, RawPacked, RawString, RawStringName, RawVariant, SignalCallFn, SignalFreeFn,
};
use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_void};
use std::sync::{Mutex, MutexGuard, Once, OnceLock};

const OK: i32 = 0;
const ERR_CANT_RESOLVE: i32 = 22;
const ERR_ALREADY_EXISTS: i32 = 27;
const ERR_INVALID_PARAMETER: i32 = 32;
const ERR_DOES_NOT_EXIST: i32 = 34;

const TAG_INT: u32 = 2;
const TAG_STRING: u32 = 4;
const TAG_STRING_NAME: u32 = 5;
const TAG_NODE_PATH: u32 = 6;
const TAG_ARRAY: u32 = 12;
const TAG_DICTIONARY: u32 = 13;
const TAG_PACKED_FIRST: u32 = 14;
const TAG_PACKED_BYTE: u32 = 14;
const TAG_PACKED_LAST: u32 = 23;

const KIND_STRING: u32 = 9;

struct Connection {
    id: u64,
    signal: String,
    userdata: usize,
    call: SignalCallFn,
    free: SignalFreeFn,
}

struct MockObject {
    class: String,
    refcounted: bool,
    refcount: u32,
    alive: bool,
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    process_mode: i64,
    stream: Vec<u8>,
    connected: bool,
    instance: usize,
    connections: Vec<Connection>,
}

impl MockObject {
    fn new(class: &str, refcounted: bool) -> MockObject {
        MockObject {
            class: class.to_owned(),
            refcounted,
            refcount: if refcounted { 1 } else { 0 },
            alive: true,
            name: String::new(),
            parent: None,
            children: Vec::new(),
            process_mode: 0,
            stream: Vec::new(),
            connected: false,
            instance: 0,
            connections: Vec::new(),
        }
    }
}

struct RegisteredClass {
    parent: String,
    is_refcounted: bool,
    userdata: usize,
    create: CreateInstanceFn,
    free: FreeInstanceFn,
    call_virtual: CallVirtualFn,
}

struct PackedStore {
    kind: u32,
    rc: u32,
    data: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    next: usize,
    objects: HashMap<usize, MockObject>,
    destroyed: Vec<usize>,
    strings: HashMap<usize, (String, u32)>,
    names: HashMap<usize, (String, u32)>,
    interned: HashMap<String, usize>,
    packed: HashMap<usize, PackedStore>,
    arrays: HashMap<usize, (Vec<RawVariant>, u32)>,
    dicts: HashMap<usize, (Vec<(RawVariant, RawVariant)>, u32)>,
    binds: HashMap<(String, String), usize>,
    bind_meta: HashMap<usize, (String, String)>,
    lookups: HashMap<(String, String), u32>,
    classes: HashMap<String, RegisteredClass>,
    next_connection: u64,
}

impl MockState {
    fn handle(&mut self) -> usize {
        self.next += 1;
        self.next
    }

    fn new_string(&mut self, text: &str) -> usize {
        let handle = self.handle();
        self.strings.insert(handle, (text.to_owned(), 1));
        handle
    }

    fn string_text(&self, word: usize) -> String {
        self.strings
            .get(&word)
            .map(|(text, _)| text.clone())
            .unwrap_or_default()
    }

    fn name_text(&self, word: usize) -> String {
        self.names
            .get(&word)
            .map(|(text, _)| text.clone())
            .unwrap_or_default()
    }

    fn string_variant(&mut self, text: &str) -> RawVariant {
        RawVariant {
            tag: TAG_STRING,
            flags: 0,
            payload: [self.new_string(text) as u64, 0, 0],
        }
    }

    fn variant_text(&self, raw: &RawVariant) -> Option<String> {
        match raw.tag {
            TAG_STRING | TAG_NODE_PATH => Some(self.string_text(raw.payload[0] as usize)),
            TAG_STRING_NAME => Some(self.name_text(raw.payload[0] as usize)),
            _ => None,
        }
    }

    fn retain_variant(&mut self, raw: &RawVariant) {
        let word = raw.payload[0] as usize;
        if word == 0 {
            return;
        }
        match raw.tag {
            TAG_STRING | TAG_NODE_PATH => {
                if let Some(entry) = self.strings.get_mut(&word) {
                    entry.1 += 1;
                }
            }
            TAG_STRING_NAME => {
                if let Some(entry) = self.names.get_mut(&word) {
                    entry.1 += 1;
                }
            }
            TAG_ARRAY => {
                if let Some(entry) = self.arrays.get_mut(&word) {
                    entry.1 += 1;
                }
            }
            TAG_DICTIONARY => {
                if let Some(entry) = self.dicts.get_mut(&word) {
                    entry.1 += 1;
                }
            }
            TAG_PACKED_FIRST..=TAG_PACKED_LAST => {
                if let Some(entry) = self.packed.get_mut(&word) {
                    entry.rc += 1;
                }
            }
            _ => {}
        }
    }

    fn release_variant(&mut self, raw: &RawVariant) {
        let word = raw.payload[0] as usize;
        if word == 0 {
            return;
        }
        match raw.tag {
            TAG_STRING | TAG_NODE_PATH => self.release_string(word),
            TAG_STRING_NAME => self.release_name(word),
            TAG_ARRAY => self.release_array(word),
            TAG_DICTIONARY => self.release_dict(word),
            TAG_PACKED_FIRST..=TAG_PACKED_LAST => self.release_packed(word),
            _ => {}
        }
    }

    fn release_string(&mut self, word: usize) {
        if let Some(entry) = self.strings.get_mut(&word) {
            entry.1 -= 1;
            if entry.1 == 0 {
                self.strings.remove(&word);
            }
        }
    }

    fn release_name(&mut self, word: usize) {
        if let Some(entry) = self.names.get_mut(&word) {
            entry.1 -= 1;
            if entry.1 == 0 {
                let text = entry.0.clone();
                self.names.remove(&word);
                self.interned.remove(&text);
            }
        }
    }

    fn release_array(&mut self, word: usize) {
        let drained = match self.arrays.get_mut(&word) {
            Some(entry) => {
                entry.1 -= 1;
                if entry.1 == 0 {
                    let elements = std::mem::take(&mut entry.0);
                    self.arrays.remove(&word);
                    Some(elements)
                } else {
                    None
                }
            }
            None => None,
        };
        if let Some(elements) = drained {
            for element in &elements {
                self.release_variant(element);
            }
        }
    }

    fn release_dict(&mut self, word: usize) {
        let drained = match self.dicts.get_mut(&word) {
            Some(entry) => {
                entry.1 -= 1;
                if entry.1 == 0 {
                    let pairs = std::mem::take(&mut entry.0);
                    self.dicts.remove(&word);
                    Some(pairs)
                } else {
                    None
                }
            }
            None => None,
        };
        if let Some(pairs) = drained {
            for (key, value) in &pairs {
                self.release_variant(key);
                self.release_variant(value);
            }
        }
    }

    fn release_packed(&mut self, word: usize) {
        let strings = match self.packed.get_mut(&word) {
            Some(store) => {
                store.rc -= 1;
                if store.rc == 0 {
                    let store = self.packed.remove(&word).unwrap();
                    if store.kind == KIND_STRING {
                        Some(store.data)
                    } else {
                        None
                    }
                } else {
                    None
                }
            }
            None => None,
        };
        if let Some(data) = strings {
            for chunk in data.chunks_exact(size_of::<usize>()) {
                let mut word_bytes = [0u8; size_of::<usize>()];
                word_bytes.copy_from_slice(chunk);
                let handle = usize::from_ne_bytes(word_bytes);
                if handle != 0 {
                    self.release_string(handle);
                }
            }
        }
    }

    fn variant_eq(&self, a: &RawVariant, b: &RawVariant) -> bool {
        if a.tag != b.tag {
            return false;
        }
        match self.variant_text(a) {
            Some(text) => self.variant_text(b).as_deref() == Some(&text),
            None => a.payload == b.payload,
        }
    }
}

static STATE: OnceLock<Mutex<MockState>> = OnceLock::new();

fn state() -> MutexGuard<'static, MockState> {
    STATE
        .get_or_init(|| Mutex::new(MockState::default()))
        .lock()
        .unwrap()
}

fn cstr(text: *const c_char) -> String {
    unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
}

fn elem_size(kind: u32) -> usize {
    match kind {
        0 => 1,
        1 | 3 => 4,
        2 | 4 | 5 => 8,
        6 => 12,
        7 | 8 => 16,
        9 => size_of::<usize>(),
        _ => panic!("unknown packed kind {kind}"),
    }
}

/// Frees an object engine-side: children first become unreachable,
/// host instances are destroyed through the registered destructor.
fn destroy_object(word: usize) {
    let (children, host) = {
        let mut guard = state();
        let s = &mut *guard;
        let Some(object) = s.objects.get_mut(&word) else {
            return;
        };
        if !object.alive {
            return;
        }
        object.alive = false;
        let children = std::mem::take(&mut object.children);
        let instance = std::mem::replace(&mut object.instance, 0);
        let class = object.class.clone();
        s.destroyed.push(word);
        let host = if instance != 0 {
            s.classes
                .get(&class)
                .map(|class| (class.userdata, class.free, instance))
        } else {
            None
        };
        (children, host)
    };
    if let Some((userdata, free, instance)) = host {
        unsafe { free(userdata as *mut c_void, instance as *mut c_void) };
    }
    for child in children {
        destroy_object(child);
    }
}

fn builtin_refcounted(class: &str) -> bool {
    matches!(class, "RefCounted" | "StreamPeer")
}

fn builtin_class(class: &str) -> bool {
    matches!(class, "Object" | "Node" | "RefCounted" | "StreamPeer")
}

unsafe extern "C" fn construct_object(class_name: *const c_char) -> RawObject {
    let class = cstr(class_name);
    let registered = {
        let s = state();
        s.classes
            .get(&class)
            .map(|c| (c.userdata, c.create, c.is_refcounted))
    };
    let refcounted = match &registered {
        Some((_, _, refcounted)) => *refcounted,
        None if builtin_class(&class) => builtin_refcounted(&class),
        None => return RawObject::NULL,
    };
    let word = {
        let mut s = state();
        let word = s.handle();
        s.objects.insert(word, MockObject::new(&class, refcounted));
        word
    };
    if let Some((userdata, create, _)) = registered {
        let instance =
            unsafe { create(userdata as *mut c_void, RawObject::from_word(word)) };
        state().objects.get_mut(&word).unwrap().instance = instance as usize;
    }
    RawObject::from_word(word)
}

unsafe extern "C" fn object_free(object: RawObject) {
    destroy_object(object.to_word());
}

unsafe extern "C" fn object_reference(object: RawObject) -> u32 {
    let mut s = state();
    let entry = s.objects.get_mut(&object.to_word()).unwrap();
    entry.refcount += 1;
    entry.refcount
}

unsafe extern "C" fn object_unreference(object: RawObject) -> u32 {
    let remaining = {
        let mut s = state();
        let entry = s.objects.get_mut(&object.to_word()).unwrap();
        entry.refcount -= 1;
        entry.refcount
    };
    if remaining == 0 {
        destroy_object(object.to_word());
    }
    remaining
}

unsafe extern "C" fn object_is_valid(object: RawObject) -> u8 {
    state()
        .objects
        .get(&object.to_word())
        .map(|o| o.alive as u8)
        .unwrap_or(0)
}

unsafe extern "C" fn object_set_instance(
    object: RawObject,
    _class_name: *const c_char,
    instance: *mut c_void,
) {
    if let Some(entry) = state().objects.get_mut(&object.to_word()) {
        entry.instance = instance as usize;
    }
}

unsafe extern "C" fn object_get_instance(object: RawObject) -> *mut c_void {
    state()
        .objects
        .get(&object.to_word())
        .map(|o| o.instance as *mut c_void)
        .unwrap_or(std::ptr::null_mut())
}

fn known_method(class: &str, method: &str) -> bool {
    matches!(
        (class, method),
        ("Object", "get_class" | "set_name" | "get_name")
            | ("RefCounted", "get_reference_count")
            | (
                "Node",
                "add_child"
                    | "get_child_count"
                    | "get_child"
                    | "set_process_mode"
                    | "get_process_mode"
            )
            | (
                "StreamPeer",
                "connect_to_host" | "get_available_bytes" | "put_data" | "get_data" | "poll"
            )
    )
}

unsafe extern "C" fn method_bind_lookup(
    class_name: *const c_char,
    method_name: *const c_char,
) -> RawMethodBind {
    let key = (cstr(class_name), cstr(method_name));
    let mut s = state();
    *s.lookups.entry(key.clone()).or_insert(0) += 1;
    if !known_method(&key.0, &key.1) {
        return RawMethodBind::NULL;
    }
    if let Some(bind) = s.binds.get(&key) {
        return RawMethodBind::from_word(*bind);
    }
    let bind = s.handle();
    s.binds.insert(key.clone(), bind);
    s.bind_meta.insert(bind, key);
    RawMethodBind::from_word(bind)
}

unsafe fn read_int(args: *const PtrArg, index: usize) -> i64 {
    unsafe { *(*args.add(index) as *const i64) }
}

unsafe fn read_word(args: *const PtrArg, index: usize) -> usize {
    unsafe { *(*args.add(index) as *const usize) }
}

unsafe fn read_variant(args: *const PtrArg, index: usize) -> RawVariant {
    unsafe { *(*args.add(index) as *const RawVariant) }
}

unsafe fn write_int(ret: PtrRet, value: i64) {
    unsafe { *(ret as *mut i64) = value };
}

unsafe fn write_word(ret: PtrRet, value: usize) {
    unsafe { *(ret as *mut usize) = value };
}

unsafe fn write_variant(ret: PtrRet, value: RawVariant) {
    unsafe { *(ret as *mut RawVariant) = value };
}

unsafe extern "C" fn method_bind_ptrcall(
    bind: RawMethodBind,
    object: RawObject,
    args: *const PtrArg,
    ret: PtrRet,
) {
    let (class, method) = state().bind_meta.get(&bind.to_word()).unwrap().clone();
    let word = object.to_word();
    unsafe {
        match (class.as_str(), method.as_str()) {
            ("Object", "get_class") => {
                let mut s = state();
                let class = s.objects.get(&word).unwrap().class.clone();
                let out = s.string_variant(&class);
                write_variant(ret, out);
            }
            ("Object", "set_name") => {
                let raw = read_variant(args, 0);
                let mut s = state();
                let name = s.variant_text(&raw).unwrap_or_default();
                s.objects.get_mut(&word).unwrap().name = name;
            }
            ("Object", "get_name") => {
                let mut s = state();
                let name = s.objects.get(&word).unwrap().name.clone();
                let out = s.string_variant(&name);
                write_variant(ret, out);
            }
            ("RefCounted", "get_reference_count") => {
                let count = state().objects.get(&word).unwrap().refcount;
                write_int(ret, i64::from(count));
            }
            ("Node", "add_child") => {
                let child = read_word(args, 0);
                let mut s = state();
                s.objects.get_mut(&child).unwrap().parent = Some(word);
                s.objects.get_mut(&word).unwrap().children.push(child);
            }
            ("Node", "get_child_count") => {
                let count = state().objects.get(&word).unwrap().children.len();
                write_int(ret, count as i64);
            }
            ("Node", "get_child") => {
                let index = read_int(args, 0);
                let child = state()
                    .objects
                    .get(&word)
                    .unwrap()
                    .children
                    .get(index as usize)
                    .copied()
                    .unwrap_or(0);
                write_word(ret, child);
            }
            ("Node", "set_process_mode") => {
                let mode = read_int(args, 0);
                state().objects.get_mut(&word).unwrap().process_mode = mode;
            }
            ("Node", "get_process_mode") => {
                let mode = state().objects.get(&word).unwrap().process_mode;
                write_int(ret, mode);
            }
            ("StreamPeer", "connect_to_host") => {
                let raw = read_variant(args, 0);
                let _port = read_int(args, 1);
                let mut s = state();
                let host = s.variant_text(&raw).unwrap_or_default();
                let status = if host.is_empty() {
                    ERR_INVALID_PARAMETER
                } else if host == "localhost" || host.parse::<std::net::IpAddr>().is_ok() {
                    s.objects.get_mut(&word).unwrap().connected = true;
                    OK
                } else {
                    ERR_CANT_RESOLVE
                };
                write_int(ret, i64::from(status));
            }
            ("StreamPeer", "get_available_bytes") => {
                let len = state().objects.get(&word).unwrap().stream.len();
                write_int(ret, len as i64);
            }
            ("StreamPeer", "put_data") => {
                let raw = read_variant(args, 0);
                let mut s = state();
                let bytes = s
                    .packed
                    .get(&(raw.payload[0] as usize))
                    .map(|store| store.data.clone())
                    .unwrap_or_default();
                s.objects.get_mut(&word).unwrap().stream.extend_from_slice(&bytes);
                write_int(ret, i64::from(OK));
            }
            ("StreamPeer", "get_data") => {
                let requested = read_int(args, 0) as usize;
                let mut s = state();
                let stream = &mut s.objects.get_mut(&word).unwrap().stream;
                let taken: Vec<u8> = stream.drain(..requested.min(stream.len())).collect();
                let handle = s.handle();
                s.packed.insert(
                    handle,
                    PackedStore {
                        kind: 0,
                        rc: 1,
                        data: taken,
                    },
                );
                write_variant(
                    ret,
                    RawVariant {
                        tag: TAG_PACKED_BYTE,
                        flags: 0,
                        payload: [handle as u64, 0, 0],
                    },
                );
            }
            ("StreamPeer", "poll") => {
                write_int(ret, 0);
            }
            _ => {}
        }
    }
}

unsafe extern "C" fn string_new_utf8(data: *const u8, len: usize) -> RawString {
    let text = unsafe { std::slice::from_raw_parts(data, len) };
    let text = String::from_utf8_lossy(text).into_owned();
    RawString::from_word(state().new_string(&text))
}

unsafe extern "C" fn string_utf8_len(string: RawString) -> usize {
    state().string_text(string.to_word()).len()
}

unsafe extern "C" fn string_copy_utf8(string: RawString, buf: *mut u8, cap: usize) -> usize {
    let text = state().string_text(string.to_word());
    let count = text.len().min(cap);
    unsafe { std::ptr::copy_nonoverlapping(text.as_ptr(), buf, count) };
    count
}

unsafe extern "C" fn string_reference(string: RawString) {
    if let Some(entry) = state().strings.get_mut(&string.to_word()) {
        entry.1 += 1;
    }
}

unsafe extern "C" fn string_release(string: RawString) {
    state().release_string(string.to_word());
}

unsafe extern "C" fn string_name_intern(data: *const u8, len: usize) -> RawStringName {
    let text = unsafe { std::slice::from_raw_parts(data, len) };
    let text = String::from_utf8_lossy(text).into_owned();
    let mut s = state();
    if let Some(word) = s.interned.get(&text) {
        let word = *word;
        s.names.get_mut(&word).unwrap().1 += 1;
        return RawStringName::from_word(word);
    }
    let word = s.handle();
    s.names.insert(word, (text.clone(), 1));
    s.interned.insert(text, word);
    RawStringName::from_word(word)
}

unsafe extern "C" fn string_name_utf8_len(name: RawStringName) -> usize {
    state().name_text(name.to_word()).len()
}

unsafe extern "C" fn string_name_copy_utf8(name: RawStringName, buf: *mut u8, cap: usize) -> usize {
    let text = state().name_text(name.to_word());
    let count = text.len().min(cap);
    unsafe { std::ptr::copy_nonoverlapping(text.as_ptr(), buf, count) };
    count
}

unsafe extern "C" fn string_name_reference(name: RawStringName) {
    if let Some(entry) = state().names.get_mut(&name.to_word()) {
        entry.1 += 1;
    }
}

unsafe extern "C" fn string_name_release(name: RawStringName) {
    state().release_name(name.to_word());
}

unsafe extern "C" fn packed_new(kind: u32) -> RawPacked {
    let mut s = state();
    let word = s.handle();
    s.packed.insert(
        word,
        PackedStore {
            kind,
            rc: 1,
            data: Vec::new(),
        },
    );
    RawPacked::from_word(word)
}

unsafe extern "C" fn packed_reference(packed: RawPacked) {
    if let Some(store) = state().packed.get_mut(&packed.to_word()) {
        store.rc += 1;
    }
}

unsafe extern "C" fn packed_release(packed: RawPacked) {
    state().release_packed(packed.to_word());
}

unsafe extern "C" fn packed_len(packed: RawPacked) -> usize {
    let s = state();
    let store = &s.packed[&packed.to_word()];
    store.data.len() / elem_size(store.kind)
}

unsafe extern "C" fn packed_resize(packed: RawPacked, len: usize) -> i32 {
    let mut s = state();
    let store = s.packed.get_mut(&packed.to_word()).unwrap();
    let size = elem_size(store.kind);
    store.data.resize(len * size, 0);
    OK
}

unsafe extern "C" fn packed_read(
    packed: RawPacked,
    start: usize,
    count: usize,
    dst: *mut c_void,
) -> usize {
    let mut s = state();
    let store = &s.packed[&packed.to_word()];
    let size = elem_size(store.kind);
    let kind = store.kind;
    let stored = store.data.len() / size;
    let count = count.min(stored.saturating_sub(start));
    let bytes = store.data[start * size..(start + count) * size].to_vec();
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst as *mut u8, bytes.len()) };
    if kind == KIND_STRING {
        // Reads hand out fresh references.
        for chunk in bytes.chunks_exact(size_of::<usize>()) {
            let mut word_bytes = [0u8; size_of::<usize>()];
            word_bytes.copy_from_slice(chunk);
            let handle = usize::from_ne_bytes(word_bytes);
            if let Some(entry) = s.strings.get_mut(&handle) {
                entry.1 += 1;
            }
        }
    }
    count
}

unsafe extern "C" fn packed_write(
    packed: RawPacked,
    start: usize,
    count: usize,
    src: *const c_void,
) -> usize {
    let mut s = state();
    let store = s.packed.get_mut(&packed.to_word()).unwrap();
    let size = elem_size(store.kind);
    let kind = store.kind;
    let stored = store.data.len() / size;
    let count = count.min(stored.saturating_sub(start));
    let bytes =
        unsafe { std::slice::from_raw_parts(src as *const u8, count * size) }.to_vec();
    let overwritten = store.data[start * size..(start + count) * size].to_vec();
    store.data[start * size..(start + count) * size].copy_from_slice(&bytes);
    if kind == KIND_STRING {
        // Writes retain the handles written in; the slots they replace
        // are released.
        for chunk in bytes.chunks_exact(size_of::<usize>()) {
            let mut word_bytes = [0u8; size_of::<usize>()];
            word_bytes.copy_from_slice(chunk);
            let handle = usize::from_ne_bytes(word_bytes);
            if let Some(entry) = s.strings.get_mut(&handle) {
                entry.1 += 1;
            }
        }
        for chunk in overwritten.chunks_exact(size_of::<usize>()) {
            let mut word_bytes = [0u8; size_of::<usize>()];
            word_bytes.copy_from_slice(chunk);
            let handle = usize::from_ne_bytes(word_bytes);
            if handle != 0 {
                s.release_string(handle);
            }
        }
    }
    count
}

unsafe extern "C" fn array_new() -> RawArray {
    let mut s = state();
    let word = s.handle();
    s.arrays.insert(word, (Vec::new(), 1));
    RawArray::from_word(word)
}

unsafe extern "C" fn array_reference(array: RawArray) {
    if let Some(entry) = state().arrays.get_mut(&array.to_word()) {
        entry.1 += 1;
    }
}

unsafe extern "C" fn array_release(array: RawArray) {
    state().release_array(array.to_word());
}

unsafe extern "C" fn array_len(array: RawArray) -> usize {
    state().arrays[&array.to_word()].0.len()
}

unsafe extern "C" fn array_push(array: RawArray, value: *const RawVariant) {
    let value = unsafe { *value };
    let mut s = state();
    s.retain_variant(&value);
    s.arrays.get_mut(&array.to_word()).unwrap().0.push(value);
}

unsafe extern "C" fn array_get(array: RawArray, index: usize, out: *mut RawVariant) -> u8 {
    let mut s = state();
    let Some(value) = s.arrays[&array.to_word()].0.get(index).copied() else {
        return 0;
    };
    s.retain_variant(&value);
    unsafe { *out = value };
    1
}

unsafe extern "C" fn dict_new() -> RawDict {
    let mut s = state();
    let word = s.handle();
    s.dicts.insert(word, (Vec::new(), 1));
    RawDict::from_word(word)
}

unsafe extern "C" fn dict_reference(dict: RawDict) {
    if let Some(entry) = state().dicts.get_mut(&dict.to_word()) {
        entry.1 += 1;
    }
}

unsafe extern "C" fn dict_release(dict: RawDict) {
    state().release_dict(dict.to_word());
}

unsafe extern "C" fn dict_len(dict: RawDict) -> usize {
    state().dicts[&dict.to_word()].0.len()
}

unsafe extern "C" fn dict_set(dict: RawDict, key: *const RawVariant, value: *const RawVariant) {
    let key = unsafe { *key };
    let value = unsafe { *value };
    let mut s = state();
    let word = dict.to_word();
    let existing = s.dicts[&word]
        .0
        .iter()
        .position(|(k, _)| s.variant_eq(k, &key));
    s.retain_variant(&value);
    match existing {
        Some(index) => {
            let old = s.dicts.get_mut(&word).unwrap().0[index].1;
            s.dicts.get_mut(&word).unwrap().0[index].1 = value;
            s.release_variant(&old);
        }
        None => {
            s.retain_variant(&key);
            s.dicts.get_mut(&word).unwrap().0.push((key, value));
        }
    }
}

unsafe extern "C" fn dict_get(dict: RawDict, key: *const RawVariant, out: *mut RawVariant) -> u8 {
    let key = unsafe { *key };
    let mut s = state();
    let found = s.dicts[&dict.to_word()]
        .0
        .iter()
        .find(|(k, _)| s.variant_eq(k, &key))
        .map(|(_, v)| *v);
    let Some(value) = found else {
        return 0;
    };
    s.retain_variant(&value);
    unsafe { *out = value };
    1
}

unsafe extern "C" fn dict_key_at(dict: RawDict, index: usize, out: *mut RawVariant) -> u8 {
    let mut s = state();
    let Some(key) = s.dicts[&dict.to_word()].0.get(index).map(|(k, _)| *k) else {
        return 0;
    };
    s.retain_variant(&key);
    unsafe { *out = key };
    1
}

unsafe extern "C" fn classdb_register_class(info: *const ClassCreationInfo) -> i32 {
    let info = unsafe { &*info };
    let class = cstr(info.class_name);
    let parent = cstr(info.parent_name);
    let mut s = state();
    if s.classes.contains_key(&class) {
        return ERR_ALREADY_EXISTS;
    }
    if !builtin_class(&parent) && !s.classes.contains_key(&parent) {
        return ERR_DOES_NOT_EXIST;
    }
    s.classes.insert(
        class,
        RegisteredClass {
            parent,
            is_refcounted: info.is_refcounted != 0,
            userdata: info.class_userdata as usize,
            create: info.create_instance,
            free: info.free_instance,
            call_virtual: info.call_virtual,
        },
    );
    OK
}

unsafe extern "C" fn classdb_unregister_class(class_name: *const c_char) -> i32 {
    match state().classes.remove(&cstr(class_name)) {
        Some(_) => OK,
        None => ERR_DOES_NOT_EXIST,
    }
}

unsafe extern "C" fn classdb_register_method(
    class_name: *const c_char,
    info: *const MethodCreationInfo,
) -> i32 {
    let _ = (cstr(class_name), unsafe { cstr((*info).method_name) });
    OK
}

unsafe extern "C" fn classdb_register_property(
    class_name: *const c_char,
    info: *const PropertyCreationInfo,
) -> i32 {
    let _ = (cstr(class_name), unsafe { cstr((*info).property_name) });
    OK
}

unsafe extern "C" fn classdb_register_signal(
    class_name: *const c_char,
    signal_name: *const c_char,
    _argument_count: u32,
) -> i32 {
    let _ = (cstr(class_name), cstr(signal_name));
    OK
}

unsafe extern "C" fn classdb_register_enum_value(
    class_name: *const c_char,
    enum_name: *const c_char,
    value_name: *const c_char,
    _value: i64,
) -> i32 {
    let _ = (cstr(class_name), cstr(enum_name), cstr(value_name));
    OK
}

unsafe extern "C" fn object_connect(
    object: RawObject,
    signal: RawStringName,
    userdata: *mut c_void,
    call: SignalCallFn,
    free: SignalFreeFn,
) -> u64 {
    let mut s = state();
    let signal = s.name_text(signal.to_word());
    let Some(entry) = s.objects.get_mut(&object.to_word()) else {
        return 0;
    };
    if !entry.alive || signal.is_empty() {
        return 0;
    }
    s.next_connection += 1;
    let id = s.next_connection;
    s.objects.get_mut(&object.to_word()).unwrap().connections.push(Connection {
        id,
        signal,
        userdata: userdata as usize,
        call,
        free,
    });
    id
}

unsafe extern "C" fn object_disconnect(object: RawObject, connection: u64) -> i32 {
    let removed = {
        let mut s = state();
        let Some(entry) = s.objects.get_mut(&object.to_word()) else {
            return ERR_DOES_NOT_EXIST;
        };
        match entry.connections.iter().position(|c| c.id == connection) {
            Some(index) => Some(entry.connections.remove(index)),
            None => None,
        }
    };
    match removed {
        Some(connection) => {
            unsafe { (connection.free)(connection.userdata as *mut c_void) };
            OK
        }
        None => ERR_DOES_NOT_EXIST,
    }
}

static MOCK_INTERFACE: EngineInterface = EngineInterface {
    version_major: 1,
    version_minor: 0,
    construct_object,
    object_free,
    object_reference,
    object_unreference,
    object_is_valid,
    object_set_instance,
    object_get_instance,
    method_bind_lookup,
    method_bind_ptrcall,
    string_new_utf8,
    string_utf8_len,
    string_copy_utf8,
    string_reference,
    string_release,
    string_name_intern,
    string_name_utf8_len,
    string_name_copy_utf8,
    string_name_reference,
    string_name_release,
    packed_new,
    packed_reference,
    packed_release,
    packed_len,
    packed_resize,
    packed_read,
    packed_write,
    array_new,
    array_reference,
    array_release,
    array_len,
    array_push,
    array_get,
    dict_new,
    dict_reference,
    dict_release,
    dict_len,
    dict_set,
    dict_get,
    dict_key_at,
    classdb_register_class,
    classdb_unregister_class,
    classdb_register_method,
    classdb_register_property,
    classdb_register_signal,
    classdb_register_enum_value,
    object_connect,
    object_disconnect,
};

static INSTALL: Once = Once::new();

pub fn interface_ptr() -> *const EngineInterface {
    &MOCK_INTERFACE
}

/// Installs the mock interface (idempotent across tests).
pub fn install() {
    INSTALL.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        unsafe { lumen_core::interface::install(&MOCK_INTERFACE) }.unwrap();
    });
}

pub fn is_alive(object: RawObject) -> bool {
    state()
        .objects
        .get(&object.to_word())
        .map(|o| o.alive)
        .unwrap_or(false)
}

pub fn was_destroyed(object: RawObject) -> bool {
    state().destroyed.contains(&object.to_word())
}

pub fn refcount(object: RawObject) -> u32 {
    state().objects[&object.to_word()].refcount
}

pub fn bind_lookups(class: &str, method: &str) -> u32 {
    state()
        .lookups
        .get(&(class.to_owned(), method.to_owned()))
        .copied()
        .unwrap_or(0)
}

pub fn connection_count(object: RawObject) -> usize {
    state()
        .objects
        .get(&object.to_word())
        .map(|o| o.connections.len())
        .unwrap_or(0)
}

pub fn int_raw_variant(value: i64) -> RawVariant {
    RawVariant {
        tag: TAG_INT,
        flags: 0,
        payload: [value as u64, 0, 0],
    }
}

pub fn string_raw_variant(text: &str) -> RawVariant {
    state().string_variant(text)
}

pub fn release_raw_variant(raw: &RawVariant) {
    state().release_variant(raw);
}

/// Plays the engine: delivers one emission of `signal` to every
/// matching connection on `object`.
pub fn emit_signal(object: RawObject, signal: &str, payload: &[RawVariant]) {
    let targets: Vec<(usize, SignalCallFn)> = {
        let s = state();
        match s.objects.get(&object.to_word()) {
            Some(entry) => entry
                .connections
                .iter()
                .filter(|c| c.signal == signal)
                .map(|c| (c.userdata, c.call))
                .collect(),
            None => Vec::new(),
        }
    };
    for (userdata, call) in targets {
        unsafe { call(userdata as *mut c_void, payload.as_ptr(), payload.len()) };
    }
}

/// The host-instance pointer currently recorded for `object`, as the
/// engine would pass it to the class trampolines.
pub fn instance_pointer(object: RawObject) -> usize {
    state().objects[&object.to_word()].instance
}

/// Plays the engine: routes a virtual call for `class` through its
/// registered trampoline with an explicit instance pointer, live or
/// stale.
///
/// # Safety
/// `args` and `ret` must match what the named virtual expects.
pub unsafe fn invoke_virtual_raw(
    class: &str,
    instance: usize,
    name: &str,
    args: *const PtrArg,
    ret: PtrRet,
) {
    let call = state().classes[class].call_virtual;
    let interned = unsafe { string_name_intern(name.as_ptr(), name.len()) };
    unsafe { call(instance as *mut c_void, interned, args, ret) };
}

/// Plays the engine: routes a virtual call through the class's
/// registered trampoline.
///
/// # Safety
/// `args` and `ret` must match what the named virtual expects.
pub unsafe fn invoke_virtual(object: RawObject, name: &str, args: *const PtrArg, ret: PtrRet) {
    let (instance, call) = {
        let s = state();
        let entry = &s.objects[&object.to_word()];
        let class = &s.classes[&entry.class];
        (entry.instance, class.call_virtual)
    };
    let interned = unsafe { string_name_intern(name.as_ptr(), name.len()) };
    unsafe { call(instance as *mut c_void, interned, args, ret) };
}
