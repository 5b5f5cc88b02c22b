//! Property-style access to a [`BridgedStorage`]
//!
//! Hosts that treat the store as a dynamic record (`store.foo`,
//! `store.foo = "x"`, `delete store.foo`, enumerating keys) go through
//! [`StorageRecord`]. The method surface (`length`, `getItem`, `setItem`,
//! `removeItem`, `clear`, `key`) is reserved: those names always resolve to
//! the surface, never to stored values, and cannot be assigned or deleted.

use crate::storage::BridgedStorage;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Reserved property holding the entry count
pub const LENGTH: &str = "length";

/// Callable member of the storage surface
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageMethod {
    GetItem,
    SetItem,
    RemoveItem,
    Clear,
    Key,
}

impl StorageMethod {
    pub const ALL: [StorageMethod; 5] = [
        Self::GetItem,
        Self::SetItem,
        Self::RemoveItem,
        Self::Clear,
        Self::Key,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::GetItem => "getItem",
            Self::SetItem => "setItem",
            Self::RemoveItem => "removeItem",
            Self::Clear => "clear",
            Self::Key => "key",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Number of arguments the method reads
    pub const fn arity(self) -> usize {
        match self {
            Self::GetItem | Self::RemoveItem | Self::Key => 1,
            Self::SetItem => 2,
            Self::Clear => 0,
        }
    }
}

impl fmt::Display for StorageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved value of a property read
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Property {
    /// `length`
    Length(usize),
    /// A member of the method surface
    Method(StorageMethod),
    /// A stored value, `None` when the key is absent
    Value(Option<String>),
}

/// Shape of an own property
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub value: Property,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("{method} expects {expected} argument(s), got {got}")]
    Arity {
        method: StorageMethod,
        expected: usize,
        got: usize,
    },
    #[error("invalid index \"{0}\"")]
    InvalidIndex(String),
    #[error("unknown method \"{0}\"")]
    UnknownMethod(String),
}

/// Dynamic property view over a [`BridgedStorage`]
#[derive(Clone)]
pub struct StorageRecord {
    storage: BridgedStorage,
}

impl StorageRecord {
    pub fn new(storage: BridgedStorage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &BridgedStorage {
        &self.storage
    }

    /// Check if `name` belongs to the method surface
    pub fn is_reserved(name: &str) -> bool {
        name == LENGTH || StorageMethod::from_name(name).is_some()
    }

    /// Property read
    pub fn get(&self, name: &str) -> Property {
        if name == LENGTH {
            return Property::Length(self.storage.len());
        }
        if let Some(method) = StorageMethod::from_name(name) {
            return Property::Method(method);
        }
        Property::Value(self.storage.get_item(name))
    }

    /// Property assignment; refused for reserved names
    pub fn set(&self, name: &str, value: impl ToString) -> bool {
        if Self::is_reserved(name) {
            debug!("Refusing to assign reserved property '{}'", name);
            return false;
        }
        self.storage.set_item(name, value);
        true
    }

    /// Property deletion; refused for reserved names
    pub fn delete(&self, name: &str) -> bool {
        if Self::is_reserved(name) {
            debug!("Refusing to delete reserved property '{}'", name);
            return false;
        }
        self.storage.remove_item(name);
        true
    }

    /// Membership check
    pub fn has(&self, name: &str) -> bool {
        Self::is_reserved(name) || self.storage.get_item(name).is_some()
    }

    /// Stored keys followed by the method surface, without duplicates
    pub fn own_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .storage
            .keys()
            .into_iter()
            .filter(|k| !Self::is_reserved(k))
            .collect();
        keys.push(LENGTH.to_string());
        keys.extend(StorageMethod::ALL.iter().map(|m| m.name().to_string()));
        keys
    }

    /// Descriptor for an own property, `None` if it does not exist
    pub fn descriptor(&self, name: &str) -> Option<PropertyDescriptor> {
        let value = self.get(name);
        let stored = match &value {
            Property::Value(None) => return None,
            Property::Value(Some(_)) => true,
            Property::Length(_) | Property::Method(_) => false,
        };
        Some(PropertyDescriptor {
            value,
            writable: stored,
            enumerable: true,
            configurable: stored,
        })
    }

    /// Call a surface method with string arguments
    ///
    /// Returns the method's result: the value for `getItem`, the key for
    /// `key`, nothing for the mutators.
    pub fn invoke(&self, method: StorageMethod, args: &[&str]) -> Result<Option<String>, RecordError> {
        if args.len() != method.arity() {
            return Err(RecordError::Arity {
                method,
                expected: method.arity(),
                got: args.len(),
            });
        }
        let result = match method {
            StorageMethod::GetItem => self.storage.get_item(args[0]),
            StorageMethod::SetItem => {
                self.storage.set_item(args[0], args[1]);
                None
            }
            StorageMethod::RemoveItem => {
                self.storage.remove_item(args[0]);
                None
            }
            StorageMethod::Clear => {
                self.storage.clear();
                None
            }
            StorageMethod::Key => {
                let index = args[0]
                    .parse::<i64>()
                    .map_err(|_| RecordError::InvalidIndex(args[0].to_string()))?;
                self.storage.key(index)
            }
        };
        Ok(result)
    }

    /// Like [`invoke`](Self::invoke), resolving the method by name
    pub fn invoke_by_name(&self, name: &str, args: &[&str]) -> Result<Option<String>, RecordError> {
        let method = StorageMethod::from_name(name)
            .ok_or_else(|| RecordError::UnknownMethod(name.to_string()))?;
        self.invoke(method, args)
    }
}
