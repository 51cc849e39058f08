//! # Serialization Envelope
//!
//! Versioned, magic-tagged packages used to move bus objects across process
//! boundaries. A package is a list:
//!
//! ```text
//! [:SRLZ, 1, :TypeTag, arg1, arg2, ...]
//! ```
//!
//! Arguments that are themselves serializable objects are nested packages,
//! not flattened. Packages are encoded with CBOR and then base64 so that the
//! result is ASCII-safe text suitable for any job queue.
//!
//! Decoding validates in a fixed order and stops at the first failure:
//! list shape, magic, version, type tag, known type. Nested packages are
//! reconstructed before their parent, and each type supplies its own
//! constructor, which lets [`Instance`] hand back the live registry entry
//! instead of a fresh allocation.

use std::{collections::BTreeMap, collections::HashMap, fmt, sync::Arc};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    error::Result, event::Event, instance::Instance, subscription::Subscription, value::Value,
};

pub const MAGIC: &str = "SRLZ";
pub const VERSION: i64 = 1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvelopeError {
    #[error("serialized string not encoded properly")]
    MalformedEncoding,
    #[error("incorrect format: {0}")]
    MalformedStructure(String),
    #[error("not a package")]
    NotAPackage,
    #[error("invalid serialized package")]
    InvalidMagic,
    #[error("unsupported package version")]
    UnsupportedVersion,
    #[error("invalid type tag")]
    InvalidTypeTag,
    #[error("unknown type: {0}")]
    UnknownType(String),
    #[error("invalid parts for {type_tag}: {reason}")]
    InvalidParts { type_tag: String, reason: String },
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("failed to encode package: {0}")]
    Encode(String),
}

/// Plain data as it travels inside a package.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Packed {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    List(Vec<Packed>),
    Map(BTreeMap<String, Packed>),
}

impl Packed {
    pub fn ident(name: impl Into<String>) -> Self {
        Packed::Ident(name.into())
    }

    fn as_ident(&self) -> Option<&str> {
        match self {
            Packed::Ident(name) => Some(name),
            _ => None,
        }
    }
}

impl TryFrom<&Value> for Packed {
    type Error = EnvelopeError;

    fn try_from(value: &Value) -> std::result::Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => Packed::Null,
            Value::Bool(b) => Packed::Bool(*b),
            Value::Int(i) => Packed::Int(*i),
            Value::Float(f) => Packed::Float(*f),
            Value::String(s) => Packed::Str(s.clone()),
            Value::Ident(s) => Packed::Ident(s.clone()),
            Value::List(items) => Packed::List(
                items
                    .iter()
                    .map(Packed::try_from)
                    .collect::<std::result::Result<_, _>>()?,
            ),
            Value::Map(map) => Packed::Map(
                map.iter()
                    .map(|(k, v)| Packed::try_from(v).map(|v| (k.clone(), v)))
                    .collect::<std::result::Result<_, _>>()?,
            ),
            other => {
                return Err(EnvelopeError::TypeMismatch {
                    expected: "plain data".to_string(),
                    found: other.describe(),
                })
            }
        })
    }
}

impl From<Packed> for Value {
    fn from(packed: Packed) -> Self {
        match packed {
            Packed::Null => Value::Null,
            Packed::Bool(b) => Value::Bool(b),
            Packed::Int(i) => Value::Int(i),
            Packed::Float(f) => Value::Float(f),
            Packed::Str(s) => Value::String(s),
            Packed::Ident(s) => Value::Ident(s),
            Packed::List(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Packed::Map(map) => Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

/// Builds a package from a type tag and its ordered arguments.
pub fn package(type_tag: &str, args: Vec<Packed>) -> Packed {
    let mut parts = Vec::with_capacity(args.len() + 3);
    parts.push(Packed::ident(MAGIC));
    parts.push(Packed::Int(VERSION));
    parts.push(Packed::ident(type_tag));
    parts.extend(args);
    Packed::List(parts)
}

/// Quiet shape check used while walking arguments.
pub fn is_package(candidate: &Packed) -> bool {
    match candidate {
        Packed::List(parts) => matches!(
            parts.as_slice(),
            [Packed::Ident(magic), Packed::Int(VERSION), Packed::Ident(_), ..] if magic == MAGIC
        ),
        _ => false,
    }
}

/// Validates a package and splits it into its type tag and arguments.
pub fn unpackage(package: Packed) -> std::result::Result<(String, Vec<Packed>), EnvelopeError> {
    let Packed::List(parts) = package else {
        return Err(EnvelopeError::NotAPackage);
    };
    let mut parts = parts.into_iter();

    match parts.next() {
        Some(Packed::Ident(magic)) if magic == MAGIC => {}
        _ => return Err(EnvelopeError::InvalidMagic),
    }
    match parts.next() {
        Some(Packed::Int(VERSION)) => {}
        _ => return Err(EnvelopeError::UnsupportedVersion),
    }
    let type_tag = match parts.next() {
        Some(Packed::Ident(tag)) => tag,
        _ => return Err(EnvelopeError::InvalidTypeTag),
    };

    Ok((type_tag, parts.collect()))
}

pub fn encode(package: &Packed) -> std::result::Result<String, EnvelopeError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(package, &mut bytes).map_err(|e| EnvelopeError::Encode(e.to_string()))?;
    Ok(STANDARD.encode(bytes))
}

pub fn decode(encoded: &str) -> std::result::Result<Packed, EnvelopeError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| EnvelopeError::MalformedEncoding)?;
    ciborium::from_reader(bytes.as_slice())
        .map_err(|e| EnvelopeError::MalformedStructure(e.to_string()))
}

/// A type that can be packaged. Each type declares its tag and its ordered
/// field list once.
pub trait Serializable {
    const TYPE_TAG: &'static str;

    fn fields(&self) -> std::result::Result<Vec<Packed>, EnvelopeError>;

    fn package(&self) -> std::result::Result<Packed, EnvelopeError> {
        Ok(package(Self::TYPE_TAG, self.fields()?))
    }

    fn serialize(&self) -> std::result::Result<String, EnvelopeError> {
        encode(&self.package()?)
    }
}

/// An argument handed to a constructor: plain data, or an object already
/// rebuilt from a nested package.
#[derive(Debug)]
pub enum Part<O> {
    Value(Packed),
    Object(O),
}

impl<O> Part<O> {
    pub fn into_value(self, type_tag: &str) -> std::result::Result<Packed, EnvelopeError> {
        match self {
            Part::Value(value) => Ok(value),
            Part::Object(_) => Err(invalid_parts(type_tag, "expected plain value, found object")),
        }
    }

    pub fn into_object(self, type_tag: &str) -> std::result::Result<O, EnvelopeError> {
        match self {
            Part::Object(object) => Ok(object),
            Part::Value(_) => Err(invalid_parts(type_tag, "expected object, found plain value")),
        }
    }
}

pub fn invalid_parts(type_tag: &str, reason: impl Into<String>) -> EnvelopeError {
    EnvelopeError::InvalidParts {
        type_tag: type_tag.to_string(),
        reason: reason.into(),
    }
}

/// Splits constructor parts into a fixed-size array, failing on arity.
pub fn fixed_parts<O, const N: usize>(
    type_tag: &str,
    parts: Vec<Part<O>>,
) -> std::result::Result<[Part<O>; N], EnvelopeError> {
    let found = parts.len();
    parts
        .try_into()
        .map_err(|_| invalid_parts(type_tag, format!("expected {N} parts, found {found}")))
}

pub type Constructor<O> = fn(Vec<Part<O>>) -> Result<O>;

/// Maps type tags to constructors.
pub struct TypeRegistry<O> {
    constructors: HashMap<&'static str, Constructor<O>>,
}

impl<O> Default for TypeRegistry<O> {
    fn default() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }
}

impl<O> TypeRegistry<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_tag: &'static str, constructor: Constructor<O>) -> &mut Self {
        self.constructors.insert(type_tag, constructor);
        self
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.constructors.contains_key(type_tag)
    }

    pub fn decode(&self, encoded: &str) -> Result<O> {
        self.load(decode(encoded)?)
    }

    /// Rebuilds an object from a package, nested packages first.
    pub fn load(&self, package: Packed) -> Result<O> {
        let (type_tag, args) = unpackage(package)?;
        let constructor = self
            .constructors
            .get(type_tag.as_str())
            .ok_or_else(|| EnvelopeError::UnknownType(type_tag.clone()))?;

        let parts = args
            .into_iter()
            .map(|arg| {
                if is_package(&arg) {
                    self.load(arg).map(Part::Object)
                } else {
                    Ok(Part::Value(arg))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        constructor(parts)
    }
}

/// Every object the bus knows how to rebuild.
#[derive(Clone)]
pub enum BusObject {
    Instance(Arc<Instance>),
    Event(Event),
    Subscription(Arc<Subscription>),
}

impl BusObject {
    pub fn type_tag(&self) -> &'static str {
        match self {
            BusObject::Instance(_) => Instance::TYPE_TAG,
            BusObject::Event(_) => Event::TYPE_TAG,
            BusObject::Subscription(_) => Subscription::TYPE_TAG,
        }
    }

    pub fn into_instance(self) -> std::result::Result<Arc<Instance>, EnvelopeError> {
        match self {
            BusObject::Instance(instance) => Ok(instance),
            other => Err(other.mismatch(Instance::TYPE_TAG)),
        }
    }

    pub fn into_event(self) -> std::result::Result<Event, EnvelopeError> {
        match self {
            BusObject::Event(event) => Ok(event),
            other => Err(other.mismatch(Event::TYPE_TAG)),
        }
    }

    pub fn into_subscription(self) -> std::result::Result<Arc<Subscription>, EnvelopeError> {
        match self {
            BusObject::Subscription(subscription) => Ok(subscription),
            other => Err(other.mismatch(Subscription::TYPE_TAG)),
        }
    }

    fn mismatch(&self, expected: &str) -> EnvelopeError {
        EnvelopeError::TypeMismatch {
            expected: expected.to_string(),
            found: self.type_tag().to_string(),
        }
    }
}

impl fmt::Debug for BusObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusObject::Instance(instance) => write!(f, "Instance({})", instance.name()),
            BusObject::Event(event) => write!(f, "{event}"),
            BusObject::Subscription(subscription) => write!(f, "{subscription}"),
        }
    }
}

lazy_static! {
    static ref BUS_TYPES: TypeRegistry<BusObject> = {
        let mut registry = TypeRegistry::new();
        registry
            .register(Instance::TYPE_TAG, Instance::from_parts)
            .register(Event::TYPE_TAG, Event::from_parts)
            .register(Subscription::TYPE_TAG, Subscription::from_parts);
        registry
    };
}

/// Decodes any bus object.
pub fn deserialize(encoded: &str) -> Result<BusObject> {
    BUS_TYPES.decode(encoded)
}
