//! Stack frames of the language memory layer.

use std::fmt;
use std::sync::Arc;

use im::OrdMap;

use crate::error::{Result, SmgError};
use crate::types::ObjectId;

/// Label of the object reserved for a function's return value.
pub const RETURN_OBJECT_LABEL: &str = "__return_value";

/// The identity of a called function.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FunctionDecl {
    pub name: Arc<str>,
    /// Size of the returned value in bits, `None` for `void` functions.
    pub return_size: Option<u64>,
}

impl FunctionDecl {
    pub fn new(name: impl Into<Arc<str>>, return_size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            return_size,
        }
    }

    pub fn void(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, None)
    }
}

impl fmt::Display for FunctionDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}()", self.name)
    }
}

/// One activation record: local variables plus the return slot.
///
/// A variable name is bound at most once per frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StackFrame {
    function: FunctionDecl,
    variables: OrdMap<Arc<str>, ObjectId>,
    return_object: Option<ObjectId>,
}

impl StackFrame {
    pub fn new(function: FunctionDecl, return_object: Option<ObjectId>) -> Self {
        Self {
            function,
            variables: OrdMap::new(),
            return_object,
        }
    }

    pub fn function(&self) -> &FunctionDecl {
        &self.function
    }

    pub fn return_object(&self) -> Option<ObjectId> {
        self.return_object
    }

    pub fn variable(&self, name: &str) -> Option<ObjectId> {
        self.variables.get(name).copied()
    }

    pub fn contains_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&Arc<str>, ObjectId)> {
        self.variables.iter().map(|(name, object)| (name, *object))
    }

    pub fn add_variable(&mut self, name: impl Into<Arc<str>>, object: ObjectId) -> Result<()> {
        let name = name.into();
        if self.variables.contains_key(&name) {
            return Err(SmgError::DuplicateVariable(name));
        }
        self.variables.insert(name, object);
        Ok(())
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<ObjectId> {
        self.variables.remove(name)
    }

    /// All objects owned by the frame, including the return slot.
    pub fn objects(&self) -> Vec<ObjectId> {
        self.variables.values().copied().chain(self.return_object).collect()
    }

    pub fn owns(&self, object: ObjectId) -> bool {
        self.return_object == Some(object) || self.variables.values().any(|&o| o == object)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_variables_unique() {
        let mut frame = StackFrame::new(FunctionDecl::void("main"), None);
        frame.add_variable("x", ObjectId::new(1)).unwrap();
        assert!(matches!(
            frame.add_variable("x", ObjectId::new(2)),
            Err(SmgError::DuplicateVariable(name)) if &*name == "x"
        ));
        assert_eq!(frame.variable("x"), Some(ObjectId::new(1)));
    }

    #[test]
    fn test_objects_include_return_slot() {
        let mut frame = StackFrame::new(FunctionDecl::new("f", Some(32)), Some(ObjectId::new(9)));
        frame.add_variable("a", ObjectId::new(3)).unwrap();
        assert_eq!(frame.objects(), vec![ObjectId::new(3), ObjectId::new(9)]);
        assert!(frame.owns(ObjectId::new(9)));
        assert_eq!(frame.remove_variable("a"), Some(ObjectId::new(3)));
        assert!(!frame.owns(ObjectId::new(3)));
    }
}
