//! Identities and the static allow-list.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque chat identity of a subscriber or observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub i64);

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Identity {
    fn from(v: i64) -> Self {
        Identity(v)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    allowed: BTreeSet<Identity>,
    observer: Option<Identity>,
}

impl AccessPolicy {
    pub fn new(allowed: impl IntoIterator<Item = Identity>, observer: Option<Identity>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            observer,
        }
    }

    pub fn is_allowed(&self, who: Identity) -> bool {
        self.allowed.contains(&who)
    }

    pub fn observer(&self) -> Option<Identity> {
        self.observer
    }

    pub fn allowed(&self) -> impl Iterator<Item = Identity> + '_ {
        self.allowed.iter().copied()
    }
}
