//! Foreign runtime boundary
//!
//! Extensions are compiled for a managed runtime this crate does not embed. The host
//! (the platform's dex class loader, or a desktop JVM bridge) implements the traits in
//! this module and the loader drives foreign code exclusively through them: classes are
//! resolved by fully-qualified name and members are invoked by name, never by a shared
//! compile-time type.
//!
//! Every call on these traits may block (foreign code routinely performs network I/O on
//! the calling thread), so async callers dispatch them through `spawn_blocking`.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

/// Shared handle to a live foreign object
pub type ForeignRef = Arc<dyn ForeignObject>;

/// Shared handle to a resolved foreign class
pub type ClassRef = Arc<dyn ForeignClass>;

/// Errors raised by the foreign runtime
#[derive(Debug, Clone, Error)]
pub enum ForeignError {
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    #[error("No such member {member} on {class}")]
    NoSuchMember { class: String, member: String },

    /// The foreign code threw
    #[error("{exception}: {message}")]
    Thrown { exception: String, message: String },

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Loader scope is closed")]
    ScopeClosed,

    #[error("Host runtime error: {0}")]
    Host(String),
}

impl ForeignError {
    pub fn no_such_member(class: impl Into<String>, member: impl Into<String>) -> Self {
        ForeignError::NoSuchMember {
            class: class.into(),
            member: member.into(),
        }
    }

    pub fn thrown(exception: impl Into<String>, message: impl Into<String>) -> Self {
        ForeignError::Thrown {
            exception: exception.into(),
            message: message.into(),
        }
    }

    pub fn is_missing_member(&self) -> bool {
        matches!(self, ForeignError::NoSuchMember { .. })
    }
}

/// A value crossing the runtime boundary
#[derive(Clone)]
pub enum ForeignValue {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    List(Vec<ForeignValue>),
    Object(ForeignRef),
}

impl ForeignValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ForeignValue::Null => "null",
            ForeignValue::Bool(_) => "boolean",
            ForeignValue::Int(_) => "int",
            ForeignValue::Long(_) => "long",
            ForeignValue::Float(_) => "float",
            ForeignValue::Double(_) => "double",
            ForeignValue::Str(_) => "String",
            ForeignValue::List(_) => "List",
            ForeignValue::Object(_) => "Object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ForeignValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ForeignValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integral value, widening `int` to `long`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ForeignValue::Int(v) => Some(*v as i64),
            ForeignValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            ForeignValue::Int(v) => Some(*v),
            ForeignValue::Long(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Floating value; integral values are accepted since older builds boxed them differently
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            ForeignValue::Float(v) => Some(*v),
            ForeignValue::Double(v) => Some(*v as f32),
            ForeignValue::Int(v) => Some(*v as f32),
            ForeignValue::Long(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ForeignValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ForeignValue]> {
        match self {
            ForeignValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ForeignRef> {
        match self {
            ForeignValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn from_opt_str(value: Option<&str>) -> Self {
        value
            .map(|s| ForeignValue::Str(s.to_string()))
            .unwrap_or(ForeignValue::Null)
    }
}

impl fmt::Debug for ForeignValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForeignValue::Null => write!(f, "null"),
            ForeignValue::Bool(v) => write!(f, "{}", v),
            ForeignValue::Int(v) => write!(f, "{}", v),
            ForeignValue::Long(v) => write!(f, "{}L", v),
            ForeignValue::Float(v) => write!(f, "{}f", v),
            ForeignValue::Double(v) => write!(f, "{}", v),
            ForeignValue::Str(v) => write!(f, "{:?}", v),
            ForeignValue::List(items) => f.debug_list().entries(items).finish(),
            ForeignValue::Object(obj) => write!(f, "<{}>", obj.class_name()),
        }
    }
}

impl From<bool> for ForeignValue {
    fn from(v: bool) -> Self {
        ForeignValue::Bool(v)
    }
}

impl From<i32> for ForeignValue {
    fn from(v: i32) -> Self {
        ForeignValue::Int(v)
    }
}

impl From<i64> for ForeignValue {
    fn from(v: i64) -> Self {
        ForeignValue::Long(v)
    }
}

impl From<f32> for ForeignValue {
    fn from(v: f32) -> Self {
        ForeignValue::Float(v)
    }
}

impl From<&str> for ForeignValue {
    fn from(v: &str) -> Self {
        ForeignValue::Str(v.to_string())
    }
}

impl From<String> for ForeignValue {
    fn from(v: String) -> Self {
        ForeignValue::Str(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Method { arity: usize },
    Field,
}

/// A public member as reported by reflection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberInfo {
    pub name: String,
    pub kind: MemberKind,
}

impl MemberInfo {
    pub fn method(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Method { arity },
        }
    }

    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Field,
        }
    }
}

/// Reflective view of an instance living in the foreign runtime
pub trait ForeignObject: Send + Sync {
    /// Fully-qualified runtime class name
    fn class_name(&self) -> String;

    /// Fully-qualified names of every interface and superclass the instance is assignable to
    fn interfaces(&self) -> Vec<String>;

    /// Public methods and fields, including inherited ones
    fn members(&self) -> Vec<MemberInfo>;

    fn invoke(&self, name: &str, args: &[ForeignValue]) -> Result<ForeignValue, ForeignError>;

    fn get_field(&self, name: &str) -> Result<ForeignValue, ForeignError>;

    fn set_field(&self, name: &str, value: ForeignValue) -> Result<(), ForeignError>;
}

pub trait ForeignClass: Send + Sync {
    fn name(&self) -> String;

    /// Invoke the public constructor matching `args`
    fn construct(&self, args: &[ForeignValue]) -> Result<ForeignRef, ForeignError>;

    fn invoke_static(&self, name: &str, args: &[ForeignValue]) -> Result<ForeignValue, ForeignError>;
}

/// Isolated class namespace for one package
pub trait LoaderScope: Send + Sync {
    fn load_class(&self, fqcn: &str) -> Result<ClassRef, ForeignError>;

    /// Release the namespace. Classes resolved from it must not be used afterwards.
    fn close(&self) -> Result<(), ForeignError>;
}

/// Entry point into the host runtime's dynamic class loading
pub trait ClassLoaderHost: Send + Sync {
    /// Open a scope over a loadable module (an APK on the managed runtime, a jar on desktop)
    ///
    /// `work_dir` is a writable directory the host may use for optimized code caches.
    fn open_scope(&self, module_path: &Path, work_dir: &Path) -> Result<Arc<dyn LoaderScope>, ForeignError>;
}
