use std::fmt;
use std::str::FromStr;

use crate::types::{Error, Result};

/// Hierarchical actor path, e.g. `/rwCoordinator/session-1`.
///
/// The root (`/`) is not an actor; it is the implicit parent of top-level actors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorAddress {
    segments: Vec<String>,
}

impl ActorAddress {
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Address of a direct child named `name`.
    pub fn child(&self, name: &str) -> Result<Self> {
        if name.is_empty() || name.contains('/') {
            return Err(Error::bad_request(format!("invalid actor name: {:?}", name)));
        }
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Last path segment; empty for the root.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    pub fn is_child_of(&self, parent: &ActorAddress) -> bool {
        self.segments.len() == parent.segments.len() + 1
            && self.segments.starts_with(&parent.segments)
    }
}

impl fmt::Display for ActorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for ActorAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let path = s
            .strip_prefix('/')
            .ok_or_else(|| Error::bad_request(format!("actor address must be absolute: {}", s)))?;
        let mut address = Self::root();
        if path.is_empty() {
            return Ok(address);
        }
        for segment in path.split('/') {
            address = address.child(segment)?;
        }
        Ok(address)
    }
}
