// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Action kinds and the categories they compete in.
//!
//! Each action kind belongs to exactly one of three categories. A handle
//! has one slot per category, so an accept and a read on the same handle
//! overwrite each other while a read and a write coexist.

use std::fmt;
use std::str::FromStr;

use crate::error::DispatchError;

/// The operation a pending registration waits on.
///
/// Discriminants are the numeric codes used on the raw registration path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(i32)]
pub enum ActionKind {
    Accept = 1,
    Read = 2,
    PeerClose = 3,
    Connect = 4,
    Write = 5,
    Timer = 6,
}

/// One registration slot per handle per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Category {
    /// Accept, read and timer expiry: reported as input readiness.
    Read,
    /// Write and connect completion: reported as output readiness.
    Write,
    /// The peer hung up.
    PeerClose,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Read, Category::Write, Category::PeerClose];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Read => write!(f, "read"),
            Category::Write => write!(f, "write"),
            Category::PeerClose => write!(f, "peer-close"),
        }
    }
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::Accept,
        ActionKind::Read,
        ActionKind::PeerClose,
        ActionKind::Connect,
        ActionKind::Write,
        ActionKind::Timer,
    ];

    /// Category whose slot this action occupies. Total over the enum.
    pub fn category(self) -> Category {
        match self {
            ActionKind::Accept | ActionKind::Read | ActionKind::Timer => Category::Read,
            ActionKind::Connect | ActionKind::Write => Category::Write,
            ActionKind::PeerClose => Category::PeerClose,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<ActionKind> {
        ActionKind::ALL.into_iter().find(|kind| kind.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Accept => "accept",
            ActionKind::Read => "read",
            ActionKind::PeerClose => "peer_close",
            ActionKind::Connect => "connect",
            ActionKind::Write => "write",
            ActionKind::Timer => "timer",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActionKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "accept" => Ok(ActionKind::Accept),
            "read" => Ok(ActionKind::Read),
            "peer_close" | "peer-close" | "peerclose" => Ok(ActionKind::PeerClose),
            "connect" => Ok(ActionKind::Connect),
            "write" => Ok(ActionKind::Write),
            "timer" => Ok(ActionKind::Timer),
            _ => Err(DispatchError::UnrecognizedAction(s.to_string())),
        }
    }
}

/// Anything that names an action kind, possibly wrongly.
///
/// Typed callers pass `ActionKind` and can never be rejected; raw numeric
/// codes and names go through the same check as the registry.
pub trait IntoAction {
    fn into_action(self) -> Result<ActionKind, DispatchError>;
}

impl IntoAction for ActionKind {
    fn into_action(self) -> Result<ActionKind, DispatchError> {
        Ok(self)
    }
}

impl IntoAction for i32 {
    fn into_action(self) -> Result<ActionKind, DispatchError> {
        ActionKind::from_code(self).ok_or_else(|| DispatchError::UnrecognizedAction(self.to_string()))
    }
}

impl IntoAction for &str {
    fn into_action(self) -> Result<ActionKind, DispatchError> {
        self.parse()
    }
}

/// Map an action to its category, rejecting anything outside the six kinds.
pub fn classify(action: impl IntoAction) -> Result<Category, DispatchError> {
    action.into_action().map(ActionKind::category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_partition_kinds() {
        let read: Vec<_> = ActionKind::ALL
            .into_iter()
            .filter(|k| k.category() == Category::Read)
            .collect();
        assert_eq!(read, vec![ActionKind::Accept, ActionKind::Read, ActionKind::Timer]);

        let write: Vec<_> = ActionKind::ALL
            .into_iter()
            .filter(|k| k.category() == Category::Write)
            .collect();
        assert_eq!(write, vec![ActionKind::Connect, ActionKind::Write]);

        assert_eq!(ActionKind::PeerClose.category(), Category::PeerClose);
    }

    #[test]
    fn codes_match_raw_values() {
        assert_eq!(ActionKind::Accept.code(), 1);
        assert_eq!(ActionKind::Timer.code(), 6);
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ActionKind::from_code(0), None);
        assert_eq!(ActionKind::from_code(7), None);
    }

    #[test]
    fn classify_raw_codes() {
        assert_eq!(classify(1), Ok(Category::Read));
        assert_eq!(classify(4), Ok(Category::Write));
        assert_eq!(classify(3), Ok(Category::PeerClose));
        assert_eq!(
            classify(42),
            Err(DispatchError::UnrecognizedAction("42".to_string()))
        );
        assert!(classify(-1).is_err());
    }

    #[test]
    fn classify_names() {
        assert_eq!(classify("Timer"), Ok(Category::Read));
        assert_eq!(classify("peer-close"), Ok(Category::PeerClose));
        assert_eq!(classify(" connect "), Ok(Category::Write));
        match classify("bogus") {
            Err(DispatchError::UnrecognizedAction(name)) => assert_eq!(name, "bogus"),
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}
