//! Interned identifier values used for reflective lookups.
//!
//! The engine interns string-names, so equal text yields equal handles.
//! Conversions from host strings go through a process-wide cache: the
//! cache holds one engine reference per distinct text for process
//! lifetime (the same policy as method binds), and every [`StringName`]
//! handed out carries its own reference on top.

use crate::interface::iface;
use lumen_sys::RawStringName;
use rustc_hash::FxHashMap;
use std::sync::{Mutex, OnceLock};

static INTERN_CACHE: OnceLock<Mutex<FxHashMap<Box<str>, RawStringName>>> = OnceLock::new();

fn cache() -> &'static Mutex<FxHashMap<Box<str>, RawStringName>> {
    INTERN_CACHE.get_or_init(|| Mutex::new(FxHashMap::default()))
}

/// An owned reference to an interned engine identifier.
#[derive(Debug)]
pub struct StringName {
    raw: RawStringName,
}

impl StringName {
    /// Interns `text`, reusing the cached handle when this process has
    /// converted the same text before.
    pub fn new(text: &str) -> StringName {
        let mut cache = cache().lock().expect("string-name cache poisoned");
        let raw = match cache.get(text) {
            Some(raw) => *raw,
            None => {
                let raw = unsafe { (iface().string_name_intern)(text.as_ptr(), text.len()) };
                cache.insert(Box::from(text), raw);
                raw
            }
        };
        unsafe { (iface().string_name_reference)(raw) };
        StringName { raw }
    }

    /// Adopts a handle whose reference the caller already holds.
    pub fn from_raw_retained(raw: RawStringName) -> StringName {
        StringName { raw }
    }

    pub fn raw(&self) -> RawStringName {
        self.raw
    }

    /// Copies the identifier text back out of engine storage.
    pub fn to_text(&self) -> String {
        let len = unsafe { (iface().string_name_utf8_len)(self.raw) };
        let mut buf = vec![0u8; len];
        let copied = unsafe { (iface().string_name_copy_utf8)(self.raw, buf.as_mut_ptr(), len) };
        buf.truncate(copied);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Clone for StringName {
    fn clone(&self) -> Self {
        unsafe { (iface().string_name_reference)(self.raw) };
        StringName { raw: self.raw }
    }
}

impl Drop for StringName {
    fn drop(&mut self) {
        unsafe { (iface().string_name_release)(self.raw) };
    }
}

// Interning makes handle equality text equality.
impl PartialEq for StringName {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for StringName {}

impl std::hash::Hash for StringName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl From<&str> for StringName {
    fn from(text: &str) -> Self {
        StringName::new(text)
    }
}
