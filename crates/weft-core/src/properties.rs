//! The property store: an ordered, shared, typed key/value container.
//!
//! Every service and every frame owns one. Cloning a [`Properties`] handle
//! shares the underlying store; the store (and every data entry it holds) is
//! destroyed when the last handle drops.
//!
//! Single-key operations are internally synchronized. Sequences of
//! operations that must be atomic take the store's re-entrant [`lock`].
//!
//! [`lock`]: Properties::lock

use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::animation::{AnimValue, Animation, Interpolation};
use crate::color::Color;
use crate::error::{Result, WeftError};
use crate::geometry::Rect;
use crate::time::Position;

/// Keys that describe a service's identity or timing and are never copied
/// by [`Properties::inherit`].
pub const STRUCTURAL_KEYS: &[&str] = &["kind", "service", "in", "out", "length", "eof"];

// ── Binary data ─────────────────────────────────────────────────

type Payload = Box<dyn Any + Send + Sync>;
type ReleaseFn = Box<dyn FnOnce(Payload) + Send>;

/// Opaque data with a size and an optional release action.
///
/// The release action runs exactly once, when the last reference to the cell
/// drops (overwrite, removal or destruction of the owning store). A
/// [`DataRef`] obtained from [`Properties::get_data`] is such a reference: while
/// it is held, an overwrite replaces the entry but the old payload is
/// released only when that reference goes.
pub struct DataCell {
    payload: Option<Payload>,
    size: usize,
    release: Mutex<Option<ReleaseFn>>,
}

/// Shared reference to a data entry.
pub type DataRef = Arc<DataCell>;

impl DataCell {
    /// Declared size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Borrow the payload as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref::<T>()
    }
}

impl Drop for DataCell {
    fn drop(&mut self) {
        if let (Some(release), Some(payload)) = (self.release.get_mut().take(), self.payload.take()) {
            release(payload);
        }
    }
}

impl fmt::Debug for DataCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataCell")
            .field("size", &self.size)
            .field("has_release", &self.release.lock().is_some())
            .finish()
    }
}

// ── Values ──────────────────────────────────────────────────────

/// A typed property value.
#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    Int(i64),
    Double(f64),
    Position(Position),
    Rect(Rect),
    Color(Color),
    Animation(Animation),
    Data(DataRef),
}

impl Value {
    /// Text form of a value. Data has none.
    pub fn to_text(&self) -> Option<String> {
        Some(match self {
            Self::String(s) => s.clone(),
            Self::Int(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::Position(v) => v.to_string(),
            Self::Rect(r) => r.to_string(),
            Self::Color(c) => c.to_string(),
            Self::Animation(a) => a.to_string(),
            Self::Data(_) => return None,
        })
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) | Self::Position(v) => Some(*v),
            Self::Double(v) => Some(*v as i64),
            Self::String(s) => parse_int(s),
            Self::Color(c) => Some(c.to_u32() as i64),
            Self::Animation(a) => a.evaluate(0, 0).map(|v| v.as_f64() as i64),
            Self::Rect(_) | Self::Data(_) => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Int(v) | Self::Position(v) => Some(*v as f64),
            Self::String(s) => parse_double(s),
            Self::Color(c) => Some(c.to_u32() as f64),
            Self::Animation(a) => a.evaluate(0, 0).map(|v| v.as_f64()),
            Self::Rect(_) | Self::Data(_) => None,
        }
    }

    fn as_anim_value(&self) -> Option<AnimValue> {
        match self {
            Self::Rect(r) => Some(AnimValue::Rect(*r)),
            Self::Color(c) => Some(AnimValue::Color(*c)),
            Self::String(s) => s.parse().ok(),
            Self::Data(_) | Self::Animation(_) => None,
            other => other.as_f64().map(AnimValue::Number),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Position(a), Self::Position(b)) => a == b,
            (Self::Rect(a), Self::Rect(b)) => a == b,
            (Self::Color(a), Self::Color(b)) => a == b,
            (Self::Animation(a), Self::Animation(b)) => a == b,
            (Self::Data(a), Self::Data(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<Rect> for Value {
    fn from(v: Rect) -> Self {
        Self::Rect(v)
    }
}

impl From<Color> for Value {
    fn from(v: Color) -> Self {
        Self::Color(v)
    }
}

impl From<Animation> for Value {
    fn from(v: Animation) -> Self {
        Self::Animation(v)
    }
}

fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64))
}

fn parse_double(s: &str) -> Option<f64> {
    let s = s.trim();
    match s.strip_suffix('%') {
        Some(pct) => pct.trim().parse::<f64>().ok().map(|v| v / 100.0),
        None => s.parse::<f64>().ok().or_else(|| parse_int(s).map(|v| v as f64)),
    }
}

// ── Store ───────────────────────────────────────────────────────

/// Identifies a registered change listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&str) + Send + Sync>;

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

struct Inner {
    map: RwLock<IndexMap<String, Value>>,
    lock: ReentrantMutex<()>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
}

/// Shared handle to a property store.
#[derive(Clone)]
pub struct Properties {
    inner: Arc<Inner>,
}

impl Default for Properties {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.map.read().iter()).finish()
    }
}

impl Properties {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                map: RwLock::new(IndexMap::new()),
                lock: ReentrantMutex::new(()),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Take the store's re-entrant lock for a multi-key sequence.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.inner.lock.lock()
    }

    /// Whether two handles share one store.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live handles to this store.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    // ── Generic access ──

    /// Set `key`, replacing any previous value in place.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let old = self.inner.map.write().insert(key.to_owned(), value.into());
        // Release actions of the old value run outside the map lock
        drop(old);
        self.notify(key);
    }

    /// Set `key` only when it is not present. Returns whether it was set.
    pub fn set_if_absent(&self, key: &str, value: impl Into<Value>) -> bool {
        {
            let mut map = self.inner.map.write();
            if map.contains_key(key) {
                return false;
            }
            map.insert(key.to_owned(), value.into());
        }
        self.notify(key);
        true
    }

    /// Get a copy of the raw value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.map.read().get(key).cloned()
    }

    /// Whether `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.inner.map.read().contains_key(key)
    }

    /// Remove `key`, preserving the order of the remaining entries.
    pub fn remove(&self, key: &str) -> bool {
        let old = self.inner.map.write().shift_remove(key);
        let removed = old.is_some();
        drop(old);
        if removed {
            self.notify(key);
        }
        removed
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let old = std::mem::take(&mut *self.inner.map.write());
        drop(old);
    }

    /// Number of entries.
    pub fn count(&self) -> usize {
        self.inner.map.read().len()
    }

    /// Name of the entry at `index` in insertion order.
    pub fn name_at(&self, index: usize) -> Option<String> {
        self.inner.map.read().get_index(index).map(|(k, _)| k.clone())
    }

    /// Value of the entry at `index` in insertion order.
    pub fn value_at(&self, index: usize) -> Option<Value> {
        self.inner.map.read().get_index(index).map(|(_, v)| v.clone())
    }

    /// All keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.map.read().keys().cloned().collect()
    }

    // ── Typed setters ──

    pub fn set_string(&self, key: &str, value: impl Into<String>) {
        self.set(key, Value::String(value.into()));
    }

    pub fn set_int(&self, key: &str, value: i64) {
        self.set(key, Value::Int(value));
    }

    pub fn set_double(&self, key: &str, value: f64) {
        self.set(key, Value::Double(value));
    }

    pub fn set_position(&self, key: &str, value: Position) {
        self.set(key, Value::Position(value));
    }

    pub fn set_rect(&self, key: &str, value: Rect) {
        self.set(key, Value::Rect(value));
    }

    pub fn set_color(&self, key: &str, value: Color) {
        self.set(key, Value::Color(value));
    }

    pub fn set_animation(&self, key: &str, value: Animation) {
        self.set(key, Value::Animation(value));
    }

    /// Store opaque data. `release` receives the payload when the entry is
    /// overwritten, removed or the store is destroyed.
    ///
    /// On overwrite the old payload is released before this call returns,
    /// unless a caller still holds it through [`get_data`](Self::get_data);
    /// then it is released when that [`DataRef`] drops.
    pub fn set_data<T, F>(&self, key: &str, value: T, size: usize, release: Option<F>)
    where
        T: Any + Send + Sync,
        F: FnOnce(T) + Send + 'static,
    {
        let release = release.map(|f| {
            Box::new(move |payload: Payload| {
                if let Ok(value) = payload.downcast::<T>() {
                    f(*value);
                }
            }) as ReleaseFn
        });
        let cell = DataCell {
            payload: Some(Box::new(value)),
            size,
            release: Mutex::new(release),
        };
        self.set(key, Value::Data(Arc::new(cell)));
    }

    // ── Typed getters ──

    /// Text form; `None` when missing or when the entry holds data.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.inner.map.read().get(key).and_then(Value::to_text)
    }

    /// Integer value, parsing strings. Missing or unconvertible reads as 0.
    pub fn get_int(&self, key: &str) -> i64 {
        self.inner.map.read().get(key).and_then(Value::as_i64).unwrap_or(0)
    }

    /// Float value, parsing strings (`"50%"` is 0.5). Defaults to 0.0.
    pub fn get_double(&self, key: &str) -> f64 {
        self.inner.map.read().get(key).and_then(Value::as_f64).unwrap_or(0.0)
    }

    /// Frame position. Defaults to 0.
    pub fn get_position(&self, key: &str) -> Position {
        self.get_int(key)
    }

    /// Whether an integer-like flag is non-zero.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get_int(key) != 0
    }

    pub fn get_rect(&self, key: &str) -> Option<Rect> {
        match self.inner.map.read().get(key)? {
            Value::Rect(r) => Some(*r),
            Value::String(s) => s.parse().ok(),
            Value::Animation(a) => a.evaluate(0, 0).map(|v| v.as_rect()),
            _ => None,
        }
    }

    pub fn get_color(&self, key: &str) -> Option<Color> {
        match self.inner.map.read().get(key)? {
            Value::Color(c) => Some(*c),
            Value::String(s) => s.parse().ok(),
            Value::Int(v) => Some(Color::from_u32(*v as u32)),
            _ => None,
        }
    }

    /// The data cell under `key`; `None` for missing keys and non-data values.
    ///
    /// Holding the returned reference keeps the payload alive, and defers its
    /// release action, past an overwrite or removal of the entry.
    pub fn get_data(&self, key: &str) -> Option<DataRef> {
        match self.inner.map.read().get(key)? {
            Value::Data(cell) => Some(Arc::clone(cell)),
            _ => None,
        }
    }

    /// Borrow typed data under `key` for the duration of `f`.
    pub fn with_data<T: Any, R>(&self, key: &str, f: impl FnOnce(&T) -> R) -> Option<R> {
        let cell = self.get_data(key)?;
        cell.downcast_ref::<T>().map(f)
    }

    // ── Animation ──

    /// Evaluate an animated property at `position` of `length`.
    ///
    /// Strings are parsed as animations; plain scalars act as constants.
    pub fn get_animated(&self, key: &str, position: Position, length: Position) -> Option<AnimValue> {
        let map = self.inner.map.read();
        match map.get(key)? {
            Value::Animation(a) => a.evaluate(position, length),
            Value::String(s) if s.contains('=') => {
                s.parse::<Animation>().ok()?.evaluate(position, length)
            }
            other => other.as_anim_value(),
        }
    }

    /// Numeric shorthand for [`get_animated`](Self::get_animated), 0.0 when absent.
    pub fn get_animated_double(&self, key: &str, position: Position, length: Position) -> f64 {
        self.get_animated(key, position, length)
            .map(|v| v.as_f64())
            .unwrap_or(0.0)
    }

    /// Rect shorthand for [`get_animated`](Self::get_animated).
    pub fn get_animated_rect(&self, key: &str, position: Position, length: Position) -> Option<Rect> {
        self.get_animated(key, position, length).map(|v| v.as_rect())
    }

    /// Set a keyframe on `key`, converting a scalar or string entry into an
    /// animation first. The previous scalar becomes a keyframe at frame 0.
    ///
    /// `position` is stored as given, so a negative position stays relative
    /// to the end of whatever length the animation is later evaluated over.
    /// `length` mirrors [`get_animated`](Self::get_animated).
    pub fn set_animated(
        &self,
        key: &str,
        value: AnimValue,
        position: Position,
        _length: Position,
        interpolation: Interpolation,
    ) {
        let _guard = self.lock();
        let mut anim = match self.get(key) {
            Some(Value::Animation(a)) => a,
            Some(Value::String(s)) if s.contains('=') => s.parse().unwrap_or_default(),
            Some(other) => other.as_anim_value().map(Animation::constant).unwrap_or_default(),
            None => Animation::new(),
        };
        anim.set(position, value, interpolation);
        self.set(key, Value::Animation(anim));
    }

    // ── Bulk operations ──

    /// Copy public entries of `src` in source order.
    ///
    /// Skips keys starting with `_`, [`STRUCTURAL_KEYS`] and data.
    pub fn inherit(&self, src: &Properties) {
        self.inherit_except(src, &[]);
    }

    /// [`inherit`](Self::inherit) with extra keys to skip.
    pub fn inherit_except(&self, src: &Properties, skip: &[&str]) {
        if self.ptr_eq(src) {
            return;
        }
        for (key, value) in src.snapshot() {
            if key.starts_with('_')
                || STRUCTURAL_KEYS.contains(&key.as_str())
                || skip.contains(&key.as_str())
                || matches!(value, Value::Data(_))
            {
                continue;
            }
            self.set(&key, value);
        }
    }

    /// Copy entries of `src` whose key starts with `prefix`, stripping it.
    pub fn pass(&self, src: &Properties, prefix: &str) -> usize {
        let mut copied = 0;
        for (key, value) in src.snapshot() {
            if let Some(stripped) = key.strip_prefix(prefix) {
                if !stripped.is_empty() {
                    self.set(stripped, value);
                    copied += 1;
                }
            }
        }
        copied
    }

    /// Copy the whitespace- or comma-separated keys in `list` from `src`.
    pub fn pass_list(&self, src: &Properties, list: &str) -> usize {
        let mut copied = 0;
        for key in list.split(|c: char| c == ',' || c.is_whitespace()).filter(|k| !k.is_empty()) {
            if let Some(value) = src.get(key) {
                self.set(key, value);
                copied += 1;
            }
        }
        copied
    }

    /// Apply `key=value`. Surrounding double quotes on the value are removed.
    pub fn parse(&self, assignment: &str) -> Result<()> {
        let (key, value) = assignment.split_once('=').ok_or_else(|| {
            WeftError::InvalidParameter(format!("Expected key=value, got '{assignment}'"))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(WeftError::InvalidParameter(format!(
                "Empty key in '{assignment}'"
            )));
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        self.set_string(key, value);
        Ok(())
    }

    /// Clone of every entry in insertion order.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        self.inner
            .map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Text form of every non-data entry in insertion order.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.inner
            .map
            .read()
            .iter()
            .filter_map(|(k, v)| v.to_text().map(|t| (k.clone(), t)))
            .collect()
    }

    // ── Listeners ──

    /// Register `f` to be called with the key after every change.
    pub fn listen(&self, f: impl Fn(&str) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push((id, Arc::new(f)));
        id
    }

    /// Unregister a listener.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn notify(&self, key: &str) {
        let listeners: Vec<Listener> = {
            let guard = self.inner.listeners.read();
            if guard.is_empty() {
                return;
            }
            guard.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener(key);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
