//! Which request/response headers become metric labels.
//!
//! Built once from configuration and shared read-only by every classifier.
//! Names are stored lowercased; HTTP header names are case-insensitive.

use std::collections::HashSet;

use crate::session::Direction;

/// Membership set for the header names of one direction.
#[derive(Debug, Clone, Default)]
pub struct HeaderFilter {
    names: HashSet<String>,
}

impl HeaderFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|name| name.as_ref().trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        Self { names }
    }

    /// Check a header name. Callers on the hot path pass names that are
    /// already lowercased; anything else is normalized here first.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        if self.names.is_empty() {
            return false;
        }
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            self.names.contains(&name.to_ascii_lowercase())
        } else {
            self.names.contains(name)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}

/// Request and response filters together.
#[derive(Debug, Clone, Default)]
pub struct AttributeFilters {
    pub request: HeaderFilter,
    pub response: HeaderFilter,
}

impl AttributeFilters {
    pub fn new(request: HeaderFilter, response: HeaderFilter) -> Self {
        Self { request, response }
    }

    pub fn for_direction(&self, direction: Direction) -> &HeaderFilter {
        match direction {
            Direction::Request => &self.request,
            Direction::Response => &self.response,
        }
    }

    /// True when no header of either direction is tracked.
    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.response.is_empty()
    }
}
