//! Type-safe identifiers for memory graph elements.
//!
//! This module provides newtype wrappers that keep object identifiers and
//! value identifiers apart, so that a value can never be used where an object
//! is expected (and vice versa).
use std::fmt;

/// An object identifier.
///
/// Objects are regions of memory (concrete or abstract). The identifier `0`
/// is reserved for the unique Null object.
///
/// # Invariants
///
/// - `ObjectId::NULL` denotes the Null object, which is always invalid and has size 0
/// - Identifiers are never reused within one analysis
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    /// The identifier of the Null object.
    pub const NULL: ObjectId = ObjectId(0);

    /// Creates a new object identifier.
    pub const fn new(id: u64) -> Self {
        ObjectId(id)
    }

    /// Returns the raw identifier.
    pub const fn id(self) -> u64 {
        self.0
    }

    /// Checks if this is the Null object.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A value identifier.
///
/// Values are opaque symbolic tokens standing for either a pointer or a
/// scalar. The identifier `0` is reserved for the Zero value, which is both
/// the numeric zero and the null pointer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValueId(u64);

impl ValueId {
    /// The Zero value (numeric 0 and the null pointer).
    pub const ZERO: ValueId = ValueId(0);

    /// Creates a new value identifier.
    pub const fn new(id: u64) -> Self {
        ValueId(id)
    }

    /// Returns the raw identifier.
    pub const fn id(self) -> u64 {
        self.0
    }

    /// Checks if this is the Zero value.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Which logical end of a list segment a pointer denotes.
///
/// Only meaningful when the target object is an abstract list segment; for
/// concrete regions the specifier is always [`TargetSpecifier::Region`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TargetSpecifier {
    Region,
    First,
    Last,
    All,
}

impl fmt::Display for TargetSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetSpecifier::Region => "reg",
            TargetSpecifier::First => "fst",
            TargetSpecifier::Last => "lst",
            TargetSpecifier::All => "all",
        };
        f.write_str(s)
    }
}

/// A resolved address: an object plus a bit offset inside it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Address {
    pub object: ObjectId,
    pub offset: u64,
}

impl Address {
    pub const fn new(object: ObjectId, offset: u64) -> Self {
        Address { object, offset }
    }

    /// The null address.
    pub const fn null() -> Self {
        Address::new(ObjectId::NULL, 0)
    }

    pub const fn is_null(&self) -> bool {
        self.object.is_null()
    }

    /// Returns the address shifted by `delta` bits, or `None` on underflow.
    pub fn shifted(self, delta: i64) -> Option<Self> {
        let offset = if delta >= 0 {
            self.offset.checked_add(delta as u64)?
        } else {
            self.offset.checked_sub(delta.unsigned_abs())?
        };
        Some(Address::new(self.object, offset))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.object, self.offset)
    }
}
