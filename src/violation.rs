//! Violation record of a state: which memory-safety properties were broken
//! on the path leading to it, and which graph elements are implicated.

use std::fmt;

use crate::types::{ObjectId, ValueId};

/// A kind of memory-safety violation of the analyzed program.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Violation {
    InvalidRead,
    InvalidWrite,
    InvalidFree,
    MemoryLeak,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Violation::InvalidRead => "invalid read",
            Violation::InvalidWrite => "invalid write",
            Violation::InvalidFree => "invalid free",
            Violation::MemoryLeak => "memory leak",
        };
        f.write_str(s)
    }
}

/// A graph element mentioned in a counterexample explanation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ChainElement {
    Object(ObjectId),
    Value(ValueId),
}

impl fmt::Display for ChainElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainElement::Object(o) => write!(f, "{}", o),
            ChainElement::Value(v) => write!(f, "{}", v),
        }
    }
}

impl From<ObjectId> for ChainElement {
    fn from(object: ObjectId) -> Self {
        ChainElement::Object(object)
    }
}

impl From<ValueId> for ChainElement {
    fn from(value: ValueId) -> Self {
        ChainElement::Value(value)
    }
}

/// Violation flags plus the element chains used to explain them.
///
/// The *current chain* accumulates elements touched while evaluating the
/// current edge; once a violation is confirmed the chain is moved to the
/// *invalid chain*.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ErrorInfo {
    invalid_read: bool,
    invalid_write: bool,
    invalid_free: bool,
    has_leak: bool,
    description: Option<String>,
    current_chain: Vec<ChainElement>,
    invalid_chain: Vec<ChainElement>,
}

impl ErrorInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_invalid_read(&self) -> bool {
        self.invalid_read
    }
    pub fn is_invalid_write(&self) -> bool {
        self.invalid_write
    }
    pub fn is_invalid_free(&self) -> bool {
        self.invalid_free
    }
    pub fn has_leak(&self) -> bool {
        self.has_leak
    }

    /// Invalid read, write or free (leaks are reported separately).
    pub fn has_memory_errors(&self) -> bool {
        self.invalid_read || self.invalid_write || self.invalid_free
    }

    pub fn has(&self, violation: Violation) -> bool {
        match violation {
            Violation::InvalidRead => self.invalid_read,
            Violation::InvalidWrite => self.invalid_write,
            Violation::InvalidFree => self.invalid_free,
            Violation::MemoryLeak => self.has_leak,
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn current_chain(&self) -> &[ChainElement] {
        &self.current_chain
    }

    pub fn invalid_chain(&self) -> &[ChainElement] {
        &self.invalid_chain
    }

    pub fn with_violation(mut self, violation: Violation) -> Self {
        match violation {
            Violation::InvalidRead => self.invalid_read = true,
            Violation::InvalidWrite => self.invalid_write = true,
            Violation::InvalidFree => self.invalid_free = true,
            Violation::MemoryLeak => self.has_leak = true,
        }
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_current_element(mut self, element: impl Into<ChainElement>) -> Self {
        let element = element.into();
        if !self.current_chain.contains(&element) {
            self.current_chain.push(element);
        }
        self
    }

    pub fn with_invalid_element(mut self, element: impl Into<ChainElement>) -> Self {
        let element = element.into();
        if !self.invalid_chain.contains(&element) {
            self.invalid_chain.push(element);
        }
        self
    }

    /// Moves the current chain to the end of the invalid chain.
    pub fn confirm_current_chain(mut self) -> Self {
        for element in std::mem::take(&mut self.current_chain) {
            if !self.invalid_chain.contains(&element) {
                self.invalid_chain.push(element);
            }
        }
        self
    }

    pub fn clear_current_chain(mut self) -> Self {
        self.current_chain.clear();
        self
    }

    /// Flags and chains of both records; the first description wins.
    pub fn merge(&self, other: &ErrorInfo) -> ErrorInfo {
        let mut merged = self.clone();
        merged.invalid_read |= other.invalid_read;
        merged.invalid_write |= other.invalid_write;
        merged.invalid_free |= other.invalid_free;
        merged.has_leak |= other.has_leak;
        if merged.description.is_none() {
            merged.description = other.description.clone();
        }
        for element in &other.current_chain {
            if !merged.current_chain.contains(element) {
                merged.current_chain.push(*element);
            }
        }
        for element in &other.invalid_chain {
            if !merged.invalid_chain.contains(element) {
                merged.invalid_chain.push(*element);
            }
        }
        merged
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags: Vec<String> = [
            Violation::InvalidRead,
            Violation::InvalidWrite,
            Violation::InvalidFree,
            Violation::MemoryLeak,
        ]
        .into_iter()
        .filter(|&v| self.has(v))
        .map(|v| v.to_string())
        .collect();
        if flags.is_empty() {
            write!(f, "no violations")?;
        } else {
            write!(f, "{}", flags.join(", "))?;
        }
        if let Some(description) = &self.description {
            write!(f, ": {}", description)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_flags() {
        let info = ErrorInfo::new().with_violation(Violation::InvalidFree);
        assert!(info.has_memory_errors());
        assert!(info.is_invalid_free());
        assert!(!info.has_leak());
        let leak = ErrorInfo::new().with_violation(Violation::MemoryLeak);
        assert!(!leak.has_memory_errors());
        assert!(leak.has_leak());
    }

    #[test]
    fn test_chains() {
        let info = ErrorInfo::new()
            .with_current_element(ObjectId::new(1))
            .with_current_element(ValueId::new(2))
            .with_current_element(ObjectId::new(1))
            .confirm_current_chain();
        assert!(info.current_chain().is_empty());
        assert_eq!(
            info.invalid_chain(),
            &[ChainElement::Object(ObjectId::new(1)), ChainElement::Value(ValueId::new(2))]
        );
    }

    #[test]
    fn test_display() {
        let info = ErrorInfo::new()
            .with_violation(Violation::InvalidRead)
            .with_description("read of freed object");
        assert_eq!(info.to_string(), "invalid read: read of freed object");
        assert_eq!(ErrorInfo::new().to_string(), "no violations");
    }

    #[test]
    fn test_merge() {
        let a = ErrorInfo::new().with_violation(Violation::InvalidRead).with_description("a");
        let b = ErrorInfo::new()
            .with_violation(Violation::MemoryLeak)
            .with_invalid_element(ObjectId::new(3));
        let m = a.merge(&b);
        assert!(m.is_invalid_read() && m.has_leak());
        assert_eq!(m.description(), Some("a"));
        assert_eq!(m.invalid_chain(), &[ChainElement::Object(ObjectId::new(3))]);
    }
}
