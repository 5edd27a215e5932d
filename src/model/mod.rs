//! Minimal PDF object model.
//!
//! The encryption and xref engines consume a narrow slice of the full PDF
//! object syntax: numbers, names, strings, arrays, dictionaries, streams and
//! indirect references, plus a handful of raw accessors that bypass
//! decryption. This module ships exactly that slice, modeled on the shape of
//! a full object model but without content-stream interpretation, font or
//! encoding tables, compression filters, or a writer. Those stay out of
//! scope for this core.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{CoreError, ReadError, Result};

/// Object identifier: object number and generation number.
pub type ObjectId = (u32, u16);

/// String objects can be written in two formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StringFormat {
    #[default]
    Literal,
    Hexadecimal,
}

/// Basic PDF object types.
#[derive(Clone, PartialEq)]
pub enum Object {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f32),
    Name(Vec<u8>),
    String(Vec<u8>, StringFormat),
    Array(Vec<Object>),
    Dictionary(Dictionary),
    Stream(Stream),
    Reference(ObjectId),
}

/// Dictionary object; preserves insertion order like a real PDF dictionary
/// would when round-tripped.
#[derive(Clone, Default, PartialEq)]
pub struct Dictionary(IndexMap<Vec<u8>, Object>);

/// Stream object: its dictionary plus the bytes that follow `stream`/`endstream`.
///
/// Unlike the full object model this core is trimmed from, `content` is
/// always the already-decoded payload: decompression filters (Flate, LZW,
/// ASCII85, predictors) are an external concern the core does not implement.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    pub dict: Dictionary,
    pub content: Vec<u8>,
}

impl Object {
    pub fn string_literal<S: Into<Vec<u8>>>(s: S) -> Self {
        Object::String(s.into(), StringFormat::Literal)
    }

    pub fn is_null(&self) -> bool {
        matches!(*self, Object::Null)
    }

    pub fn as_bool(&self) -> Result<bool> {
        match *self {
            Object::Boolean(ref value) => Ok(*value),
            _ => Err(CoreError::Read(ReadError::ObjectType {
                expected: "Boolean",
            })),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match *self {
            Object::Integer(ref value) => Ok(*value),
            _ => Err(CoreError::Read(ReadError::ObjectType {
                expected: "Integer",
            })),
        }
    }

    pub fn as_name(&self) -> Result<&[u8]> {
        match *self {
            Object::Name(ref name) => Ok(name),
            _ => Err(CoreError::Read(ReadError::ObjectType { expected: "Name" })),
        }
    }

    pub fn as_str(&self) -> Result<&[u8]> {
        match *self {
            Object::String(ref text, _) => Ok(text),
            _ => Err(CoreError::Read(ReadError::ObjectType {
                expected: "String",
            })),
        }
    }

    pub fn as_reference(&self) -> Result<ObjectId> {
        match *self {
            Object::Reference(id) => Ok(id),
            _ => Err(CoreError::Read(ReadError::ObjectType {
                expected: "Reference",
            })),
        }
    }

    pub fn as_array(&self) -> Result<&[Object]> {
        match *self {
            Object::Array(ref arr) => Ok(arr),
            _ => Err(CoreError::Read(ReadError::ObjectType {
                expected: "Array",
            })),
        }
    }

    pub fn as_dict(&self) -> Result<&Dictionary> {
        match *self {
            Object::Dictionary(ref dict) => Ok(dict),
            Object::Stream(ref stream) => Ok(&stream.dict),
            _ => Err(CoreError::Read(ReadError::ObjectType {
                expected: "Dictionary",
            })),
        }
    }

    pub fn as_stream(&self) -> Result<&Stream> {
        match *self {
            Object::Stream(ref stream) => Ok(stream),
            _ => Err(CoreError::Read(ReadError::ObjectType {
                expected: "Stream",
            })),
        }
    }

    pub fn type_name(&self) -> Result<&[u8]> {
        self.as_dict()?.get_type()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Object::Null => f.write_str("null"),
            Object::Boolean(value) => value.fmt(f),
            Object::Integer(value) => value.fmt(f),
            Object::Real(value) => value.fmt(f),
            Object::Name(ref name) => write!(f, "/{}", String::from_utf8_lossy(name)),
            Object::String(ref text, _) => write!(f, "({})", String::from_utf8_lossy(text)),
            Object::Array(ref arr) => arr.fmt(f),
            Object::Dictionary(ref dict) => dict.fmt(f),
            Object::Stream(ref stream) => stream.dict.fmt(f),
            Object::Reference((id, gen)) => write!(f, "{id} {gen} R"),
        }
    }
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary::default()
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.0.contains_key(key)
    }

    /// Look up a key without triggering decryption of the value (the core
    /// never decrypts in-memory `Object`s itself; this is a naming nod to
    /// the consumed interface of §6.1, kept distinct from `get` in case a
    /// caller layers lazy decryption on top).
    pub fn raw_get(&self, key: &[u8]) -> Result<&Object> {
        self.get(key)
    }

    pub fn get(&self, key: &[u8]) -> Result<&Object> {
        self.0.get(key).ok_or(CoreError::Read(ReadError::DictKey))
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Result<&mut Object> {
        self.0.get_mut(key).ok_or(CoreError::Read(ReadError::DictKey))
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Vec<u8>>,
        V: Into<Object>,
    {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Object> {
        self.0.shift_remove(key)
    }

    pub fn has_type(&self, type_name: &[u8]) -> bool {
        self.get_type().map(|ty| ty == type_name).unwrap_or(false)
    }

    pub fn get_type(&self) -> Result<&[u8]> {
        self.get(b"Type").and_then(Object::as_name)
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, Vec<u8>, Object> {
        self.0.iter()
    }

    pub fn extend(&mut self, other: &Dictionary) {
        for (key, value) in other.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn as_hashmap(&self) -> &IndexMap<Vec<u8>, Object> {
        &self.0
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(k, v)| (String::from_utf8_lossy(k), v)))
            .finish()
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a Vec<u8>, &'a Object);
    type IntoIter = indexmap::map::Iter<'a, Vec<u8>, Object>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Construct a [`Dictionary`] literal, mirroring the ergonomics of the
/// teacher's own `dictionary!` macro.
#[macro_export]
macro_rules! dictionary {
    () => { $crate::model::Dictionary::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut dict = $crate::model::Dictionary::new();
        $(dict.set($key, $value);)+
        dict
    }};
}

impl Stream {
    pub fn new(dict: Dictionary, content: Vec<u8>) -> Stream {
        Stream { dict, content }
    }

    /// The decoded stream payload. Since this core does not implement
    /// decompression filters, `data()` and `encoded_data()` coincide; a
    /// caller wiring in a full object model would decode here.
    pub fn data(&self) -> &[u8] {
        &self.content
    }

    pub fn encoded_data(&self) -> &[u8] {
        &self.content
    }

    pub fn set_content(&mut self, content: Vec<u8>) {
        self.content = content;
    }
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Boolean(value)
    }
}

impl From<i64> for Object {
    fn from(number: i64) -> Self {
        Object::Integer(number)
    }
}

macro_rules! from_smaller_ints {
    ($( $Int: ty )+) => {
        $(
            impl From<$Int> for Object {
                fn from(number: $Int) -> Self {
                    Object::Integer(i64::from(number))
                }
            }
        )+
    }
}

from_smaller_ints! {
    i8 i16 i32
    u8 u16 u32
}

impl From<f64> for Object {
    fn from(number: f64) -> Self {
        Object::Real(number as f32)
    }
}

impl From<String> for Object {
    fn from(name: String) -> Self {
        Object::Name(name.into_bytes())
    }
}

impl<'a> From<&'a str> for Object {
    fn from(name: &'a str) -> Self {
        Object::Name(name.as_bytes().to_vec())
    }
}

impl From<Vec<Object>> for Object {
    fn from(array: Vec<Object>) -> Self {
        Object::Array(array)
    }
}

impl From<Dictionary> for Object {
    fn from(dict: Dictionary) -> Self {
        Object::Dictionary(dict)
    }
}

impl From<Stream> for Object {
    fn from(stream: Stream) -> Self {
        Object::Stream(stream)
    }
}

impl From<ObjectId> for Object {
    fn from(id: ObjectId) -> Self {
        Object::Reference(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionary_macro_builds_insertion_ordered_dict() {
        let dict = dictionary! {
            "Type" => "XRef",
            "Size" => 12,
        };
        assert_eq!(dict.get_type().unwrap(), b"XRef");
        assert_eq!(dict.get(b"Size").unwrap().as_i64().unwrap(), 12);
    }

    #[test]
    fn stream_data_and_encoded_data_coincide() {
        let stream = Stream::new(Dictionary::new(), vec![1, 2, 3]);
        assert_eq!(stream.data(), stream.encoded_data());
    }

    #[test]
    fn dictionary_raw_get_does_not_trigger_decryption() {
        let mut dict = Dictionary::new();
        dict.set("Length", 16);
        assert!(dict.raw_get(b"Length").is_ok());
        assert!(dict.raw_get(b"Missing").is_err());
    }
}
