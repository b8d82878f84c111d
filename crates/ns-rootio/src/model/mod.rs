//! Type descriptions, class layouts and the values read from them.

pub mod primitive;
pub mod streamer;

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

pub use primitive::Primitive;
pub use streamer::Streamer;

/// Which string flavor a string member uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringKind {
    /// ROOT's `TString`: no version header.
    TString,
    /// `std::string`: version header when streamed as an object member.
    StdString,
}

/// The streamed type of a branch or member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDesc {
    /// Fixed-width number.
    Primitive(Primitive),
    /// Length-prefixed string.
    String(StringKind),
    /// `TObject` header (unique id and bits).
    TObject,
    /// `TDatime`: packed date and time.
    Datime,
    /// `TTime`: milliseconds.
    Time,
    /// `TRef`: reference number.
    Ref,
    /// `TRefArray`: named array of reference numbers.
    RefArray,
    /// `std::vector<T>`
    Vector(Box<TypeDesc>),
    /// `T[n]`
    FixedArray(Box<TypeDesc>, usize),
    /// `std::map<K, V>`
    Map(Box<TypeDesc>, Box<TypeDesc>),
    /// A user class looked up in the [`ClassRegistry`].
    Class(String),
}

impl TypeDesc {
    /// `std::vector<elem>`
    pub fn vector(elem: TypeDesc) -> Self {
        TypeDesc::Vector(Box::new(elem))
    }

    /// `elem[n]`
    pub fn fixed_array(elem: TypeDesc, n: usize) -> Self {
        TypeDesc::FixedArray(Box::new(elem), n)
    }

    /// `std::map<key, value>`
    pub fn map(key: TypeDesc, value: TypeDesc) -> Self {
        TypeDesc::Map(Box::new(key), Box::new(value))
    }

    /// A class by name, resolving the built-in ROOT classes.
    pub fn class(name: &str) -> Self {
        match name {
            "TObject" => TypeDesc::TObject,
            "TString" => TypeDesc::String(StringKind::TString),
            "string" | "std::string" => TypeDesc::String(StringKind::StdString),
            "TDatime" => TypeDesc::Datime,
            "TTime" => TypeDesc::Time,
            "TRef" => TypeDesc::Ref,
            "TRefArray" => TypeDesc::RefArray,
            _ => TypeDesc::Class(name.to_string()),
        }
    }

    /// C++-like spelling, unique per type. Used as the model cache key.
    pub fn signature(&self) -> String {
        match self {
            TypeDesc::Primitive(p) => p.cpp_name().to_string(),
            TypeDesc::String(StringKind::TString) => "TString".into(),
            TypeDesc::String(StringKind::StdString) => "std::string".into(),
            TypeDesc::TObject => "TObject".into(),
            TypeDesc::Datime => "TDatime".into(),
            TypeDesc::Time => "TTime".into(),
            TypeDesc::Ref => "TRef".into(),
            TypeDesc::RefArray => "TRefArray".into(),
            TypeDesc::Vector(elem) => format!("std::vector<{}>", elem.signature()),
            TypeDesc::FixedArray(elem, n) => format!("{}[{n}]", elem.signature()),
            TypeDesc::Map(k, v) => format!("std::map<{}, {}>", k.signature(), v.signature()),
            TypeDesc::Class(name) => name.clone(),
        }
    }

    /// The primitive element type, if this is a primitive.
    pub fn as_primitive(&self) -> Option<Primitive> {
        match self {
            TypeDesc::Primitive(p) => Some(*p),
            _ => None,
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// A data member of a class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    /// Member name, used as the record field name.
    pub name: String,
    /// Streamed type.
    pub ty: TypeDesc,
}

/// Streaming layout of one version of a class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassLayout {
    /// Class name.
    pub name: String,
    /// Class version.
    pub version: u16,
    /// Base classes, streamed first and in this order.
    pub bases: Vec<String>,
    /// Members in streaming order.
    pub members: Vec<Member>,
}

impl ClassLayout {
    /// A layout with no bases or members.
    pub fn new(name: impl Into<String>, version: u16) -> Self {
        Self { name: name.into(), version, bases: Vec::new(), members: Vec::new() }
    }

    /// Add a base class.
    pub fn with_base(mut self, name: impl Into<String>) -> Self {
        self.bases.push(name.into());
        self
    }

    /// Add a member.
    pub fn with_member(mut self, name: impl Into<String>, ty: TypeDesc) -> Self {
        self.members.push(Member { name: name.into(), ty });
        self
    }
}

/// Every known layout, by class name and version.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: HashMap<String, BTreeMap<u16, ClassLayout>>,
}

impl ClassRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) one version of a class.
    pub fn register(&mut self, layout: ClassLayout) {
        self.classes.entry(layout.name.clone()).or_default().insert(layout.version, layout);
    }

    /// Builder-style [`ClassRegistry::register`].
    pub fn with(mut self, layout: ClassLayout) -> Self {
        self.register(layout);
        self
    }

    /// The layout of `name` at `version`.
    pub fn get(&self, name: &str, version: u16) -> Option<&ClassLayout> {
        self.classes.get(name)?.get(&version)
    }

    /// The newest registered layout of `name`.
    pub fn latest(&self, name: &str) -> Option<&ClassLayout> {
        self.classes.get(name)?.values().next_back()
    }

    /// Registered versions of `name`, ascending.
    pub fn versions(&self, name: &str) -> Vec<u16> {
        self.classes.get(name).map(|v| v.keys().copied().collect()).unwrap_or_default()
    }

    /// Whether any version of `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Hash of every layout `ty` can reach through members and bases.
    ///
    /// Registries that differ in any of those layouts give different
    /// fingerprints, up to hash collisions. Unrelated classes do not count.
    pub fn fingerprint(&self, ty: &TypeDesc) -> u64 {
        let mut hasher = DefaultHasher::new();
        let mut seen = HashSet::new();
        self.hash_reachable(ty, &mut seen, &mut hasher);
        hasher.finish()
    }

    fn hash_reachable<'a>(
        &'a self,
        ty: &'a TypeDesc,
        seen: &mut HashSet<&'a str>,
        hasher: &mut DefaultHasher,
    ) {
        match ty {
            TypeDesc::Vector(elem) | TypeDesc::FixedArray(elem, _) => {
                self.hash_reachable(elem, seen, hasher)
            }
            TypeDesc::Map(k, v) => {
                self.hash_reachable(k, seen, hasher);
                self.hash_reachable(v, seen, hasher);
            }
            TypeDesc::Class(name) => self.hash_class(name, seen, hasher),
            _ => {}
        }
    }

    fn hash_class<'a>(&'a self, name: &'a str, seen: &mut HashSet<&'a str>, hasher: &mut DefaultHasher) {
        if !seen.insert(name) {
            return;
        }
        name.hash(hasher);
        let Some(versions) = self.classes.get(name) else {
            // Built-in or unregistered: the name alone.
            return;
        };
        versions.len().hash(hasher);
        for layout in versions.values() {
            layout.hash(hasher);
        }
        for layout in versions.values() {
            for base in &layout.bases {
                self.hash_class(base, seen, hasher);
            }
            for member in &layout.members {
                self.hash_reachable(&member.ty, seen, hasher);
            }
        }
    }
}

/// A value read by the interpreted path.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point.
    Float(f64),
    /// String.
    Str(String),
    /// Vector, fixed array or reference list.
    List(Vec<Value>),
    /// Map entries in streaming order.
    Map(Vec<(Value, Value)>),
    /// Class instance: fields in streaming order, bases flattened first.
    Record(Vec<(String, Value)>),
}

impl Value {
    /// Field `name` of a record.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Elements of a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}
