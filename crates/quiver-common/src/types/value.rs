//! Property values and keys for nodes and edges.
//!
//! [`Value`] is the dynamic type every property, literal and result cell is
//! expressed in. Lists and maps own their nested values; values are trees,
//! never graphs, so cloning is a cheap `Arc` bump.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::{Date, LogicalType, Timestamp};

/// A property name, cheap to clone and compare.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyKey(Arc<str>);

impl PropertyKey {
    /// Creates a new property key from a string.
    #[must_use]
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyKey({:?})", &*self.0)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for PropertyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A dynamically typed property value.
#[derive(Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// Absent or unknown value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// UTF-8 string.
    String(Arc<str>),
    /// Calendar date.
    Date(Date),
    /// Point in time (UTC, microsecond precision).
    DateTime(Timestamp),
    /// Ordered list of values.
    List(Arc<[Value]>),
    /// String-keyed map of values.
    Map(Arc<BTreeMap<PropertyKey, Value>>),
}

impl Value {
    /// Returns true if this is `Null`.
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the boolean, if this is a `Bool`.
    #[inline]
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer, if this is an `Int64`.
    #[inline]
    #[must_use]
    pub const fn as_int64(&self) -> Option<i64> {
        match self {
            Self::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float, if this is a `Float64`.
    #[inline]
    #[must_use]
    pub const fn as_float64(&self) -> Option<f64> {
        match self {
            Self::Float64(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns a numeric value widened to `f64`.
    #[inline]
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int64(i) => Some(*i as f64),
            Self::Float64(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the string slice, if this is a `String`.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the date, if this is a `Date`.
    #[inline]
    #[must_use]
    pub const fn as_date(&self) -> Option<Date> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the timestamp, if this is a `DateTime`.
    #[inline]
    #[must_use]
    pub const fn as_datetime(&self) -> Option<Timestamp> {
        match self {
            Self::DateTime(t) => Some(*t),
            _ => None,
        }
    }

    /// Returns the list elements, if this is a `List`.
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Returns the map entries, if this is a `Map`.
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<PropertyKey, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the name of this value's type, for error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::Int64(_) => "INT64",
            Self::Float64(_) => "FLOAT64",
            Self::String(_) => "STRING",
            Self::Date(_) => "DATE",
            Self::DateTime(_) => "DATETIME",
            Self::List(_) => "LIST",
            Self::Map(_) => "MAP",
        }
    }

    /// Returns the logical type of this value.
    #[must_use]
    pub const fn logical_type(&self) -> LogicalType {
        match self {
            Self::Null => LogicalType::Null,
            Self::Bool(_) => LogicalType::Bool,
            Self::Int64(_) => LogicalType::Int64,
            Self::Float64(_) => LogicalType::Float64,
            Self::String(_) => LogicalType::String,
            Self::Date(_) => LogicalType::Date,
            Self::DateTime(_) => LogicalType::DateTime,
            Self::List(_) => LogicalType::List,
            Self::Map(_) => LogicalType::Map,
        }
    }

    /// Builds a list value.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Builds a map value.
    #[must_use]
    pub fn map<K: Into<PropertyKey>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Map(Arc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Compares two values the way a query predicate does.
    ///
    /// Numbers compare across `Int64`/`Float64`. Returns `None` when the
    /// values are not comparable (different types, or either side null).
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            (Self::Float64(a), Self::Float64(b)) => a.partial_cmp(b),
            (Self::Int64(a), Self::Float64(b)) => (!b.is_nan()).then(|| int_float_cmp(*a, *b)),
            (Self::Float64(a), Self::Int64(b)) => {
                (!a.is_nan()).then(|| int_float_cmp(*b, *a).reverse())
            }
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::DateTime(b)) => Some(Timestamp::from(*a).cmp(b)),
            (Self::DateTime(a), Self::Date(b)) => Some(a.cmp(&Timestamp::from(*b))),
            (Self::List(a), Self::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => {}
                        ord => return Some(ord),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// A total order over all values, used for sorting and ordered keys.
    ///
    /// Values of different types are ordered by a fixed type rank
    /// (null first). Within a rank the order agrees with [`Value::compare`]:
    /// numbers compare exactly by numeric value, so `Int64(25)` and
    /// `Float64(25.0)` are equal, as are `-0.0` and `0.0`. Dates compare
    /// with timestamps at midnight.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Float64(a), Self::Float64(b)) => canonical_zero(*a).total_cmp(&canonical_zero(*b)),
            (Self::Int64(a), Self::Float64(b)) => int_float_cmp(*a, *b),
            (Self::Float64(a), Self::Int64(b)) => int_float_cmp(*b, *a).reverse(),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.cmp(b),
            (Self::Date(a), Self::DateTime(b)) => Timestamp::from(*a).cmp(b),
            (Self::DateTime(a), Self::Date(b)) => a.cmp(&Timestamp::from(*b)),
            (Self::List(a), Self::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.total_cmp(y) {
                        Ordering::Equal => {}
                        ord => return ord,
                    }
                }
                a.len().cmp(&b.len())
            }
            (Self::Map(a), Self::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    match ka.cmp(kb).then_with(|| va.total_cmp(vb)) {
                        Ordering::Equal => {}
                        ord => return ord,
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    const fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int64(_) | Self::Float64(_) => 2,
            Self::String(_) => 3,
            Self::Date(_) | Self::DateTime(_) => 4,
            Self::List(_) => 5,
            Self::Map(_) => 6,
        }
    }

    /// Rough in-memory footprint in bytes, used for memory accounting.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let inline = std::mem::size_of::<Self>();
        match self {
            Self::String(s) => inline + s.len(),
            Self::List(l) => inline + l.iter().map(Value::estimated_size).sum::<usize>(),
            Self::Map(m) => {
                inline
                    + m.iter()
                        .map(|(k, v)| k.as_str().len() + v.estimated_size())
                        .sum::<usize>()
            }
            _ => inline,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int64(i) => write!(f, "Int64({i})"),
            Self::Float64(x) => write!(f, "Float64({x})"),
            Self::String(s) => write!(f, "String({:?})", &**s),
            Self::Date(d) => write!(f, "Date({d})"),
            Self::DateTime(t) => write!(f, "DateTime({t})"),
            Self::List(l) => f.debug_list().entries(l.iter()).finish(),
            Self::Map(m) => f.debug_map().entries(m.iter()).finish(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int64(i) => write!(f, "{i}"),
            Self::Float64(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTime(t) => write!(f, "{t}"),
            Self::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Self::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int64(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int64(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float64(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s.into())
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Self::String(s)
    }
}

impl From<Date> for Value {
    fn from(d: Date) -> Self {
        Self::Date(d)
    }
}

impl From<Timestamp> for Value {
    fn from(t: Timestamp) -> Self {
        Self::DateTime(t)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

/// A [`Value`] usable as a hash or ordered-map key.
///
/// Equality and ordering follow [`Value::total_cmp`]. The hash agrees with
/// that equality: an integral float hashes like the matching integer and a
/// date like its midnight timestamp.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValueKey(pub Value);

impl ValueKey {
    /// Returns the wrapped value.
    #[must_use]
    pub fn into_inner(self) -> Value {
        self.0
    }
}

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for ValueKey {}

impl PartialOrd for ValueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ValueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    value.type_rank().hash(state);
    match value {
        Value::Null => {}
        Value::Bool(b) => b.hash(state),
        Value::Int64(i) => {
            0u8.hash(state);
            i.hash(state);
        }
        Value::Float64(f) => match exact_int(*f) {
            Some(i) => {
                0u8.hash(state);
                i.hash(state);
            }
            None => {
                1u8.hash(state);
                f.to_bits().hash(state);
            }
        },
        Value::String(s) => s.hash(state),
        Value::Date(d) => Timestamp::from(*d).hash(state),
        Value::DateTime(t) => t.hash(state),
        Value::List(l) => {
            l.len().hash(state);
            for v in l.iter() {
                hash_value(v, state);
            }
        }
        Value::Map(m) => {
            m.len().hash(state);
            for (k, v) in m.iter() {
                k.hash(state);
                hash_value(v, state);
            }
        }
    }
}

// 2^63, the first float above every i64.
const I64_END: f64 = 9_223_372_036_854_775_808.0;

fn canonical_zero(f: f64) -> f64 {
    if f == 0.0 { 0.0 } else { f }
}

/// The integer equal to `f`, if there is one.
fn exact_int(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && (-I64_END..I64_END).contains(&f)).then_some(f as i64)
}

/// Exact comparison of an integer with a float, without rounding the
/// integer. NaNs sort by sign, as in [`f64::total_cmp`].
fn int_float_cmp(i: i64, f: f64) -> Ordering {
    if f.is_nan() {
        return if f.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if f >= I64_END {
        return Ordering::Less;
    }
    if f < -I64_END {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    i.cmp(&(whole as i64)).then_with(|| {
        if f > whole {
            Ordering::Less
        } else if f < whole {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    })
}

impl From<Value> for ValueKey {
    fn from(v: Value) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &ValueKey) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::from(42i64).as_int64(), Some(42));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(1.5).as_number(), Some(1.5));
        assert!(Value::Null.is_null());
        assert_eq!(Value::from(true).type_name(), "BOOLEAN");
    }

    #[test]
    fn test_compare_numeric_cross_type() {
        assert_eq!(
            Value::Int64(2).compare(&Value::Float64(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Int64(1).compare(&Value::from("a")), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn test_total_order_ranks_types() {
        let mut values = vec![
            Value::from("b"),
            Value::Int64(3),
            Value::Null,
            Value::Bool(false),
            Value::Float64(2.5),
        ];
        values.sort_by(Value::total_cmp);
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(false),
                Value::Float64(2.5),
                Value::Int64(3),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn test_nested_structural_equality() {
        let a = Value::map([
            ("tags", Value::list([Value::from("x"), Value::from("y")])),
            ("score", Value::Float64(0.5)),
        ]);
        let b = Value::map([
            ("score", Value::Float64(0.5)),
            ("tags", Value::list([Value::from("x"), Value::from("y")])),
        ]);
        assert_eq!(a, b);
        assert_eq!(ValueKey(a.clone()), ValueKey(b));
        assert_eq!(a.to_string(), "{score: 0.5, tags: [\"x\", \"y\"]}");
    }

    #[test]
    fn test_value_key_hash_consistent() {
        let a = ValueKey(Value::Float64(0.0));
        let b = ValueKey(Value::Float64(-0.0));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let int = ValueKey(Value::Int64(1));
        let float = ValueKey(Value::Float64(1.0));
        assert_eq!(int, float);
        assert_eq!(hash_of(&int), hash_of(&float));
        assert_ne!(ValueKey(Value::Int64(1)), ValueKey(Value::Float64(1.5)));

        let date = Date::from_days(19_000);
        let midnight = ValueKey(Value::DateTime(Timestamp::from(date)));
        assert_eq!(ValueKey(Value::Date(date)), midnight);
        assert_eq!(hash_of(&ValueKey(Value::Date(date))), hash_of(&midnight));
    }

    #[test]
    fn test_total_order_agrees_with_compare_on_numbers() {
        let numbers = [
            Value::Int64(25),
            Value::Float64(25.0),
            Value::Float64(24.5),
            Value::Float64(-0.0),
            Value::Int64(0),
            Value::Int64(i64::MAX),
            Value::Float64(9.223_372_036_854_775_808e18),
            Value::Int64((1 << 53) + 1),
            Value::Float64(9_007_199_254_740_992.0),
        ];
        for a in &numbers {
            for b in &numbers {
                assert_eq!(a.compare(b), Some(a.total_cmp(b)), "{a} vs {b}");
                assert_eq!(a.total_cmp(b), b.total_cmp(a).reverse(), "{a} vs {b}");
            }
        }
        assert_eq!(Value::Int64(25).total_cmp(&Value::Float64(25.0)), Ordering::Equal);
        assert_eq!(Value::Int64(i64::MAX).total_cmp(&Value::Float64(9.223_372_036_854_775_808e18)), Ordering::Less);
        assert_eq!(
            Value::Int64((1 << 53) + 1).total_cmp(&Value::Float64(9_007_199_254_740_992.0)),
            Ordering::Greater
        );
    }
}
