//! Tagged request values and explicit field mapping
//!
//! Query strings and urlencoded forms arrive as [`Store`]s of [`Value`]s.
//! Accessors never coerce silently: `as_*` returns `None` when the stored
//! kind differs, and `parse_*` converts strings with a [`ValueError`] on
//! failure. [`FieldMap`] fills a plain struct from a store through setters
//! declared up front.

use crate::error::ValueError;
use bytes::Bytes;
use std::fmt;

/// A single request value with its kind
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Text
    Str(String),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Boolean
    Bool(bool),
    /// Raw bytes, such as a request body
    Bytes(Bytes),
}

/// Discriminant of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// [`Value::Str`]
    Str,
    /// [`Value::Int`]
    Int,
    /// [`Value::Float`]
    Float,
    /// [`Value::Bool`]
    Bool,
    /// [`Value::Bytes`]
    Bytes,
}

impl ValueKind {
    fn name(self) -> &'static str {
        match self {
            ValueKind::Str => "string",
            ValueKind::Int => "integer",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::Bytes => "bytes",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl Value {
    /// Kind of the stored value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Str(_) => ValueKind::Str,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Bool,
            Value::Bytes(_) => ValueKind::Bytes,
        }
    }

    /// The text, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer, if this is an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The float, if this is a float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// The boolean, if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The bytes, if this is raw bytes
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    fn coerce_error(&self, field: &str, expected: ValueKind) -> ValueError {
        ValueError::Coerce {
            field: field.to_string(),
            value: self.to_string(),
            expected: expected.name(),
        }
    }

    /// Read as an integer, parsing strings
    pub fn parse_i64(&self, field: &str) -> Result<i64, ValueError> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| self.coerce_error(field, ValueKind::Int)),
            _ => Err(self.coerce_error(field, ValueKind::Int)),
        }
    }

    /// Read as a float, parsing strings and widening integers
    pub fn parse_f64(&self, field: &str) -> Result<f64, ValueError> {
        match self {
            Value::Float(x) => Ok(*x),
            Value::Int(i) => Ok(*i as f64),
            Value::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| self.coerce_error(field, ValueKind::Float)),
            _ => Err(self.coerce_error(field, ValueKind::Float)),
        }
    }

    /// Read as a boolean. Strings accept `true/false`, `1/0`, `on/off`.
    pub fn parse_bool(&self, field: &str) -> Result<bool, ValueError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "on" | "yes" => Ok(true),
                "false" | "0" | "off" | "no" | "" => Ok(false),
                _ => Err(self.coerce_error(field, ValueKind::Bool)),
            },
            _ => Err(self.coerce_error(field, ValueKind::Bool)),
        }
    }

    /// Read as text. Bytes must be valid UTF-8.
    pub fn parse_string(&self, field: &str) -> Result<String, ValueError> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b)
                .map(str::to_string)
                .map_err(|_| self.coerce_error(field, ValueKind::Str)),
            other => Ok(other.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

/// Ordered, multi-valued map of request values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Store {
    entries: Vec<(String, Value)>,
}

impl Store {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an urlencoded string (`a=1&b=2&a=3`) into string values
    pub fn parse(input: &str) -> Result<Self, ValueError> {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_str(input).map_err(|_| ValueError::Coerce {
                field: String::new(),
                value: input.to_string(),
                expected: "urlencoded pairs",
            })?;
        Ok(pairs.into_iter().collect())
    }

    /// Append a value under `name`
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace all values under `name` with one value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Remove every value under `name`, returning how many were removed
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(key, _)| key != name);
        before - self.entries.len()
    }

    /// First value under `name`
    pub fn first(&self, name: &str) -> Option<&Value> {
        self.index(name, 0)
    }

    /// The `n`th value under `name`
    pub fn index(&self, name: &str, n: usize) -> Option<&Value> {
        self.entries
            .iter()
            .filter(|(key, _)| key == name)
            .nth(n)
            .map(|(_, value)| value)
    }

    /// Every value under `name` in insertion order
    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Whether any value is stored under `name`
    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    /// First value under `name` as text
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.first(name).and_then(Value::as_str)
    }

    /// Distinct names in first-seen order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (key, _) in &self.entries {
            if !names.contains(&key.as_str()) {
                names.push(key);
            }
        }
        names
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no values
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Store {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

type Setter<T> = Box<dyn Fn(&mut T, &str, &[&Value]) -> Result<(), ValueError> + Send + Sync>;

struct Field<T> {
    name: String,
    required: bool,
    set: Setter<T>,
}

/// Table of named setters that fills a `T` from a [`Store`]
///
/// ```
/// use skiff_core::value::{FieldMap, Store};
///
/// #[derive(Default)]
/// struct Page {
///     number: i64,
///     tags: Vec<String>,
/// }
///
/// let fields = FieldMap::new()
///     .int("page", |p: &mut Page, v| p.number = v)
///     .required()
///     .strings("tag", |p: &mut Page, v| p.tags = v);
///
/// let store = Store::parse("page=3&tag=a&tag=b").unwrap();
/// let mut page = Page::default();
/// fields.apply(&store, &mut page).unwrap();
/// assert_eq!(page.number, 3);
/// assert_eq!(page.tags, vec!["a", "b"]);
/// ```
pub struct FieldMap<T> {
    fields: Vec<Field<T>>,
}

impl<T> fmt::Debug for FieldMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.fields.iter().map(|field| &field.name))
            .finish()
    }
}

impl<T> Default for FieldMap<T> {
    fn default() -> Self {
        Self { fields: Vec::new() }
    }
}

impl<T> FieldMap<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn field<F>(mut self, name: &str, set: F) -> Self
    where
        F: Fn(&mut T, &str, &[&Value]) -> Result<(), ValueError> + Send + Sync + 'static,
    {
        self.fields.push(Field {
            name: name.to_string(),
            required: false,
            set: Box::new(set),
        });
        self
    }

    /// Mark the most recently declared field as required
    pub fn required(mut self) -> Self {
        if let Some(field) = self.fields.last_mut() {
            field.required = true;
        }
        self
    }

    /// Map the first value of `name` as text
    pub fn string<F>(self, name: &str, set: F) -> Self
    where
        F: Fn(&mut T, String) + Send + Sync + 'static,
    {
        self.field(name, move |target, field, values| {
            set(target, values[0].parse_string(field)?);
            Ok(())
        })
    }

    /// Map every value of `name` as text
    pub fn strings<F>(self, name: &str, set: F) -> Self
    where
        F: Fn(&mut T, Vec<String>) + Send + Sync + 'static,
    {
        self.field(name, move |target, field, values| {
            let values = values
                .iter()
                .map(|value| value.parse_string(field))
                .collect::<Result<_, _>>()?;
            set(target, values);
            Ok(())
        })
    }

    /// Map the first value of `name` as an integer
    pub fn int<F>(self, name: &str, set: F) -> Self
    where
        F: Fn(&mut T, i64) + Send + Sync + 'static,
    {
        self.field(name, move |target, field, values| {
            set(target, values[0].parse_i64(field)?);
            Ok(())
        })
    }

    /// Map the first value of `name` as a float
    pub fn float<F>(self, name: &str, set: F) -> Self
    where
        F: Fn(&mut T, f64) + Send + Sync + 'static,
    {
        self.field(name, move |target, field, values| {
            set(target, values[0].parse_f64(field)?);
            Ok(())
        })
    }

    /// Map the first value of `name` as a boolean
    pub fn bool<F>(self, name: &str, set: F) -> Self
    where
        F: Fn(&mut T, bool) + Send + Sync + 'static,
    {
        self.field(name, move |target, field, values| {
            set(target, values[0].parse_bool(field)?);
            Ok(())
        })
    }

    /// Map the first value of `name` as raw bytes
    pub fn bytes<F>(self, name: &str, set: F) -> Self
    where
        F: Fn(&mut T, Bytes) + Send + Sync + 'static,
    {
        self.field(name, move |target, field, values| {
            let bytes = match values[0] {
                Value::Bytes(b) => b.clone(),
                Value::Str(s) => Bytes::copy_from_slice(s.as_bytes()),
                other => return Err(other.coerce_error(field, ValueKind::Bytes)),
            };
            set(target, bytes);
            Ok(())
        })
    }

    /// Fill `target` from `store`.
    ///
    /// Absent optional fields are left untouched. Stops at the first
    /// missing required field or failed coercion.
    pub fn apply(&self, store: &Store, target: &mut T) -> Result<(), ValueError> {
        for field in &self.fields {
            let values: Vec<&Value> = store.all(&field.name).collect();
            if values.is_empty() {
                if field.required {
                    return Err(ValueError::Missing {
                        field: field.name.clone(),
                    });
                }
                continue;
            }
            (field.set)(target, &field.name, &values)?;
        }
        Ok(())
    }
}
