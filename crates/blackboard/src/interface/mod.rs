// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed interfaces: schema description, shared storage and handles.
//!
//! A concrete interface type implements [`Schema`]. The schema names the
//! record type (`Data`), the inbound command type (`Message`) and a field list
//! from which the compatibility hash is derived. Handles of type
//! [`Interface<S>`] are obtained from the [`BlackBoard`](crate::BlackBoard).

mod handle;
mod shared;

pub use handle::{AnyInterface, Interface, OpenMode};
pub(crate) use shared::{ErasedShared, SharedInterface};

use std::fmt;

use md5::{Digest, Md5};

use crate::error::{Error, Result};

// ============================================================================
// Field description
// ============================================================================

/// Primitive type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    Int8,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
    Enum,
}

impl FieldType {
    /// Name used in hashes and introspection output.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int8 => "int8",
            FieldType::Byte => "byte",
            FieldType::Int16 => "int16",
            FieldType::UInt16 => "uint16",
            FieldType::Int32 => "int32",
            FieldType::UInt32 => "uint32",
            FieldType::Int64 => "int64",
            FieldType::UInt64 => "uint64",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::String => "string",
            FieldType::Enum => "enum",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field of a schema record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: &'static str,
    pub field_type: FieldType,
    /// Array length (1 for scalars) or maximum string length.
    pub length: usize,
}

impl FieldInfo {
    pub const fn new(name: &'static str, field_type: FieldType, length: usize) -> Self {
        Self {
            name,
            field_type,
            length,
        }
    }

    pub const fn scalar(name: &'static str, field_type: FieldType) -> Self {
        Self::new(name, field_type, 1)
    }
}

/// Dynamically typed field value, used for introspection.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    String(String),
    Array(Vec<FieldValue>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::UInt(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Double(v) => write!(f, "{}", v),
            FieldValue::String(v) => write!(f, "{}", v),
            FieldValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

// ============================================================================
// Compatibility hash
// ============================================================================

/// MD5 digest over an interface's type name and field layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaHash(pub [u8; 16]);

impl SchemaHash {
    /// Derive the hash from a type name and field list.
    ///
    /// Field order matters; renaming, retyping or resizing a field changes the
    /// hash.
    pub fn compute(type_name: &str, fields: &[FieldInfo]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(type_name.as_bytes());
        for field in fields {
            hasher.update([0u8]);
            hasher.update(field.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(field.field_type.as_str().as_bytes());
            hasher.update((field.length as u64).to_be_bytes());
        }
        Self(hasher.finalize().into())
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for SchemaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaHash({})", self.to_hex())
    }
}

impl fmt::Display for SchemaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Command payload accepted by an interface.
pub trait InterfaceMessage {
    /// Message type name, e.g. `"SetMessage"`.
    fn type_name(&self) -> &'static str;
}

/// Message type of schemas that accept no commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoMessage {}

impl InterfaceMessage for NoMessage {
    fn type_name(&self) -> &'static str {
        match *self {}
    }
}

/// Static description of an interface type.
///
/// Implementations are normally generated from a declarative description;
/// the crate ships [`JoystickInterface`](crate::interfaces::JoystickInterface)
/// and [`SwitchInterface`](crate::interfaces::SwitchInterface).
pub trait Schema: Send + Sync + 'static {
    /// Registry type name.
    const TYPE_NAME: &'static str;

    /// Fixed-layout record shared between writer and readers.
    type Data: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Inbound command type.
    type Message: InterfaceMessage + Clone + fmt::Debug + Send + Sync + 'static;

    /// Field layout of `Data`, in declaration order.
    fn fields() -> &'static [FieldInfo];

    /// Current values of `data`, aligned with [`Schema::fields`].
    fn values(data: &Self::Data) -> Vec<FieldValue>;

    fn hash() -> SchemaHash {
        SchemaHash::compute(Self::TYPE_NAME, Self::fields())
    }

    /// Names of the message types this interface accepts.
    fn message_types() -> &'static [&'static str] {
        &[]
    }

    /// True if `msg` may be enqueued on this interface.
    fn message_valid(msg: &Self::Message) -> bool {
        Self::message_types().contains(&msg.type_name())
    }

    /// Build a default-initialized message from its type name.
    fn create_message(type_name: &str) -> Result<Self::Message> {
        Err(Error::UnknownType(type_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: &[FieldInfo] = &[
        FieldInfo::scalar("enabled", FieldType::Bool),
        FieldInfo::new("axis", FieldType::Float, 8),
    ];

    #[test]
    fn test_hash_is_stable() {
        let a = SchemaHash::compute("TestInterface", FIELDS);
        let b = SchemaHash::compute("TestInterface", FIELDS);
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 32);
    }

    #[test]
    fn test_hash_depends_on_layout() {
        let base = SchemaHash::compute("TestInterface", FIELDS);
        let resized = SchemaHash::compute(
            "TestInterface",
            &[
                FieldInfo::scalar("enabled", FieldType::Bool),
                FieldInfo::new("axis", FieldType::Float, 4),
            ],
        );
        let renamed = SchemaHash::compute("OtherInterface", FIELDS);
        assert_ne!(base, resized);
        assert_ne!(base, renamed);
    }

    #[test]
    fn test_field_value_display() {
        let v = FieldValue::Array(vec![FieldValue::Float(0.5), FieldValue::Float(1.0)]);
        assert_eq!(v.to_string(), "[0.5, 1]");
        assert_eq!(FieldValue::Bool(true).to_string(), "true");
    }
}
