//! Entities: the tokens that flow between stocks.

use std::fmt;

/// Arena index of an entity inside its [`Environment`](crate::Environment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub(crate) usize);

impl EntityId {
    /// Creation order of the entity (0 for the first one created).
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind tag shared by an entity and the stocks that may hold it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKind(pub &'static str);

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A named, typed token carrying a domain payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity<T> {
    name: String,
    kind: EntityKind,
    /// Domain state attached to the entity.
    pub data: T,
}

impl<T> Entity<T> {
    pub fn new(name: impl Into<String>, kind: EntityKind, data: T) -> Self {
        Self {
            name: name.into(),
            kind,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }
}
