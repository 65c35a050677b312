//! The relation between two joined states.

use std::fmt;

/// How the two inputs of a join relate to each other.
///
/// `LeftEntails` means the left input is covered by the right one
/// (left ⊑ right): it is at least as specific everywhere.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum JoinStatus {
    Equal,
    LeftEntails,
    RightEntails,
    Incomparable,
}

impl JoinStatus {
    /// Combines the relation found so far with the relation of one more part.
    pub fn update(self, other: JoinStatus) -> JoinStatus {
        match (self, other) {
            (JoinStatus::Equal, x) | (x, JoinStatus::Equal) => x,
            (a, b) if a == b => a,
            _ => JoinStatus::Incomparable,
        }
    }

    /// The same relation seen with the inputs swapped.
    pub fn flip(self) -> JoinStatus {
        match self {
            JoinStatus::LeftEntails => JoinStatus::RightEntails,
            JoinStatus::RightEntails => JoinStatus::LeftEntails,
            other => other,
        }
    }

    /// Checks whether the left input is covered by the right one.
    pub fn left_covered(self) -> bool {
        matches!(self, JoinStatus::Equal | JoinStatus::LeftEntails)
    }
}

impl fmt::Display for JoinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinStatus::Equal => "=",
            JoinStatus::LeftEntails => "⊑",
            JoinStatus::RightEntails => "⊒",
            JoinStatus::Incomparable => "⋈",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_update() {
        use JoinStatus::*;
        assert_eq!(Equal.update(LeftEntails), LeftEntails);
        assert_eq!(RightEntails.update(Equal), RightEntails);
        assert_eq!(LeftEntails.update(LeftEntails), LeftEntails);
        assert_eq!(LeftEntails.update(RightEntails), Incomparable);
        assert_eq!(Incomparable.update(Equal), Incomparable);
    }

    #[test]
    fn test_flip() {
        assert_eq!(JoinStatus::LeftEntails.flip(), JoinStatus::RightEntails);
        assert_eq!(JoinStatus::Equal.flip(), JoinStatus::Equal);
        assert!(JoinStatus::LeftEntails.left_covered());
        assert!(!JoinStatus::RightEntails.left_covered());
    }
}
