pub mod compare;

pub use self::compare::ComparisonStatus;

use crate::codec::message::Message;
use crate::codec::tags::TypeTag;
use crate::codec::text::StringBuffer;
use std::cmp::Ordering;
use std::net::Ipv4Addr;

/// The subset of value kinds permitted as map keys and set elements. All
/// members of one map or set share a single kind, fixed at first insertion.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EnumKind {
    Logical,
    Integer,
    Address,
    Date,
    Time,
    NotEnumerable,
}

/// A calendar date packed as `(year * 13 + month) * 32 + day`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Date(u32);

impl Date {
    pub const MAX_YEAR: u32 = 9999;
    pub const MAX_MONTH: u32 = 12;
    pub const MAX_DAY: u32 = 31;

    pub fn new(year: u32, month: u32, day: u32) -> Option<Date> {
        if year > Self::MAX_YEAR || month < 1 || month > Self::MAX_MONTH || day < 1 || day > Self::MAX_DAY {
            return None;
        }

        Some(Date((year * (Self::MAX_MONTH + 1) + month) * (Self::MAX_DAY + 1) + day))
    }

    pub fn from_packed(packed: u32) -> Option<Date> {
        let candidate = Date(packed);

        Date::new(candidate.year(), candidate.month(), candidate.day())
    }

    #[inline]
    pub fn packed(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn year(self) -> u32 {
        self.0 / ((Self::MAX_MONTH + 1) * (Self::MAX_DAY + 1))
    }

    #[inline]
    pub fn month(self) -> u32 {
        (self.0 / (Self::MAX_DAY + 1)) % (Self::MAX_MONTH + 1)
    }

    #[inline]
    pub fn day(self) -> u32 {
        self.0 % (Self::MAX_DAY + 1)
    }
}

/// A wall-clock time packed as `((hour * 60 + minute) * 60 + second) * 1000
/// + millisecond`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Time(u32);

impl Time {
    pub const MAX_HOUR: u32 = 23;
    pub const MAX_MINUTE: u32 = 59;
    pub const MAX_SECOND: u32 = 59;
    pub const MAX_MILLISECOND: u32 = 999;

    pub fn new(hour: u32, minute: u32, second: u32, millisecond: u32) -> Option<Time> {
        if hour > Self::MAX_HOUR
            || minute > Self::MAX_MINUTE
            || second > Self::MAX_SECOND
            || millisecond > Self::MAX_MILLISECOND
        {
            return None;
        }

        Some(Time(((hour * 60 + minute) * 60 + second) * 1000 + millisecond))
    }

    pub fn from_packed(packed: u32) -> Option<Time> {
        let candidate = Time(packed);

        Time::new(
            candidate.hour(),
            candidate.minute(),
            candidate.second(),
            candidate.millisecond(),
        )
    }

    #[inline]
    pub fn packed(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn hour(self) -> u32 {
        self.0 / 3_600_000
    }

    #[inline]
    pub fn minute(self) -> u32 {
        (self.0 / 60_000) % 60
    }

    #[inline]
    pub fn second(self) -> u32 {
        (self.0 / 1000) % 60
    }

    #[inline]
    pub fn millisecond(self) -> u32 {
        self.0 % 1000
    }
}

/// The out-of-band error carrier produced by decoders. A flaw never appears
/// inside a container or a well-formed message.
#[derive(Debug, Clone, PartialEq)]
pub struct Flaw {
    pub description: String,
    pub position: usize,
}

impl Flaw {
    pub fn new<S: Into<String>>(description: S, position: usize) -> Flaw {
        Flaw {
            description: description.into(),
            position,
        }
    }
}

/// An ordered mapping whose keys share one enumeration-compatible kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    entries: Vec<(Value, Value)>,
    key_kind: EnumKind,
}

impl Map {
    #[inline]
    pub fn new() -> Map {
        Map {
            entries: Vec::new(),
            key_kind: EnumKind::NotEnumerable,
        }
    }

    /// Insert a key/value pair, keeping the entries sorted by key. Returns
    /// false, leaving the map untouched, for a non-enumerable key, a key of
    /// a kind other than the one fixed by the first insertion, or a
    /// duplicate key.
    pub fn add_value(&mut self, key: Value, value: Value) -> bool {
        let kind = key.enumeration_type();

        if kind == EnumKind::NotEnumerable {
            return false;
        }
        if self.entries.is_empty() {
            self.key_kind = kind;
        } else if kind != self.key_kind {
            return false;
        }

        match self
            .entries
            .binary_search_by(|(existing, _)| enum_order(existing, &key))
        {
            Ok(_) => false,
            Err(slot) => {
                self.entries.insert(slot, (key, value));
                true
            }
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        if key.enumeration_type() != self.key_kind {
            return None;
        }

        self.entries
            .binary_search_by(|(existing, _)| enum_order(existing, key))
            .ok()
            .map(|slot| &self.entries[slot].1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn key_kind(&self) -> EnumKind {
        self.key_kind
    }

    #[inline]
    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    /// Move the entries out, leaving the map cleared and its key kind
    /// unfixed.
    pub fn take(&mut self) -> Vec<(Value, Value)> {
        self.key_kind = EnumKind::NotEnumerable;
        std::mem::replace(&mut self.entries, Vec::new())
    }
}

/// An ordered collection of unique values sharing one enumeration-compatible
/// kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Set {
    entries: Vec<Value>,
    element_kind: EnumKind,
}

impl Set {
    #[inline]
    pub fn new() -> Set {
        Set {
            entries: Vec::new(),
            element_kind: EnumKind::NotEnumerable,
        }
    }

    /// Insert a value, keeping the elements sorted. Returns false for a
    /// non-enumerable value, a kind mismatch, or a duplicate.
    pub fn add_value(&mut self, value: Value) -> bool {
        let kind = value.enumeration_type();

        if kind == EnumKind::NotEnumerable {
            return false;
        }
        if self.entries.is_empty() {
            self.element_kind = kind;
        } else if kind != self.element_kind {
            return false;
        }

        match self.entries.binary_search_by(|existing| enum_order(existing, &value)) {
            Ok(_) => false,
            Err(slot) => {
                self.entries.insert(slot, value);
                true
            }
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        value.enumeration_type() == self.element_kind
            && self
                .entries
                .binary_search_by(|existing| enum_order(existing, value))
                .is_ok()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn element_kind(&self) -> EnumKind {
        self.element_kind
    }

    #[inline]
    pub fn entries(&self) -> &[Value] {
        &self.entries
    }

    /// Move the elements out, leaving the set cleared and its element kind
    /// unfixed.
    pub fn take(&mut self) -> Vec<Value> {
        self.element_kind = EnumKind::NotEnumerable;
        std::mem::replace(&mut self.entries, Vec::new())
    }
}

/// Total order over two values of the same enumeration-compatible kind.
/// Callers must have checked the kinds; mixed kinds do not reach here.
fn enum_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Logical(lhs), Value::Logical(rhs)) => lhs.cmp(rhs),
        (Value::Integer(lhs), Value::Integer(rhs)) => lhs.cmp(rhs),
        (Value::Address(lhs), Value::Address(rhs)) => lhs.octets().cmp(&rhs.octets()),
        (Value::Date(lhs), Value::Date(rhs)) => lhs.cmp(rhs),
        (Value::Time(lhs), Value::Time(rhs)) => lhs.cmp(rhs),
        _ => panic!("Mixed kinds in enumeration ordering"),
    }
}

/// The tagged union of everything that can travel in a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Logical(bool),
    Integer(i64),
    Double(f64),
    String(Vec<u8>),
    Blob(Vec<u8>),
    Address(Ipv4Addr),
    Date(Date),
    Time(Time),
    Array(Vec<Value>),
    Map(Map),
    Set(Set),
    Flaw(Flaw),
}

impl Value {
    /// Convenience constructor for a string value from text.
    #[inline]
    pub fn string<S: AsRef<str>>(text: S) -> Value {
        Value::String(text.as_ref().as_bytes().to_vec())
    }

    #[inline]
    pub fn flaw<S: Into<String>>(description: S, position: usize) -> Value {
        Value::Flaw(Flaw::new(description, position))
    }

    #[inline]
    pub fn is_flaw(&self) -> bool {
        matches!(self, Value::Flaw(_))
    }

    #[inline]
    pub fn as_flaw(&self) -> Option<&Flaw> {
        match self {
            Value::Flaw(flaw) => Some(flaw),
            _ => None,
        }
    }

    pub fn enumeration_type(&self) -> EnumKind {
        match self {
            Value::Logical(_) => EnumKind::Logical,
            Value::Integer(_) => EnumKind::Integer,
            Value::Address(_) => EnumKind::Address,
            Value::Date(_) => EnumKind::Date,
            Value::Time(_) => EnumKind::Time,
            _ => EnumKind::NotEnumerable,
        }
    }

    /// Short human label for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Value::Logical(_) => "a logical".to_string(),
            Value::Integer(_) => "an integer".to_string(),
            Value::Double(_) => "a double".to_string(),
            Value::String(_) => "a string".to_string(),
            Value::Blob(bytes) => format!("a blob of {} bytes", bytes.len()),
            Value::Address(_) => "an address".to_string(),
            Value::Date(_) => "a date".to_string(),
            Value::Time(_) => "a time".to_string(),
            Value::Array(elements) => format!("an array of {} elements", elements.len()),
            Value::Map(map) => format!("a map of {} entries", map.len()),
            Value::Set(set) => format!("a set of {} elements", set.len()),
            Value::Flaw(flaw) => format!("a flaw: {}", flaw.description),
        }
    }

    /// Structural deep equality: identical kinds, identical shape.
    #[inline]
    pub fn deep_equal(&self, other: &Value) -> bool {
        self == other
    }

    /// The expected-payload tag carried by the message envelope around this
    /// value.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Logical(_) => TypeTag::Logical,
            Value::Integer(_) => TypeTag::Integer,
            Value::Double(_) => TypeTag::Double,
            Value::String(_) | Value::Blob(_) => TypeTag::StringOrBlob,
            Value::Array(_) | Value::Map(_) | Value::Set(_) => TypeTag::Container,
            _ => TypeTag::Other,
        }
    }

    /// Append this value's binary form to an open message.
    #[inline]
    pub fn write_binary(&self, message: &mut Message) {
        message.write_value(self);
    }

    /// Append the readable textual form to the buffer.
    #[inline]
    pub fn print_text(&self, buffer: &mut StringBuffer, squished: bool) {
        crate::codec::text::print_value(self, buffer, squished);
    }

    /// Append a JSON rendition to the buffer. `as_key` forces scalar values
    /// into quoted strings, for use in object-key position.
    #[inline]
    pub fn print_json(&self, buffer: &mut StringBuffer, as_key: bool, squished: bool) {
        crate::codec::text::print_value_json(self, buffer, as_key, squished);
    }
}
