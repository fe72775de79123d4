// src/package/filter.rs
//! Component selection
//!
//! Filters narrow a package to the components an operation should see. An
//! empty filter keeps everything. Requested names that match nothing are
//! ignored rather than reported.

use super::{Component, Package};

/// Selects components by host OS and by requested name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentFilter {
    local_os: Option<String>,
    requested: Vec<String>,
}

impl ComponentFilter {
    /// Keep every component
    pub fn empty() -> Self {
        Self::default()
    }

    /// Drop components restricted to another OS
    pub fn by_local_os(os: impl Into<String>) -> Self {
        Self {
            local_os: Some(os.into()),
            requested: Vec::new(),
        }
    }

    /// Keep only the named components (no names keeps all)
    pub fn with_requested<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested = names
            .into_iter()
            .map(Into::into)
            .filter(|n: &String| !n.is_empty())
            .collect();
        self
    }

    /// Names explicitly requested
    pub fn requested(&self) -> &[String] {
        &self.requested
    }

    /// Whether a single component passes the filter
    pub fn matches(&self, component: &Component) -> bool {
        if let Some(os) = &self.local_os
            && let Some(only) = &component.only.local_os
            && only != os
        {
            return false;
        }
        self.requested.is_empty() || self.requested.iter().any(|n| n == &component.name)
    }

    /// Components that pass the filter, in package order
    pub fn apply(&self, package: &Package) -> Vec<Component> {
        package
            .components
            .iter()
            .filter(|c| self.matches(c))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::ComponentTarget;

    fn package() -> Package {
        let mut package = Package::new("test", "1.0.0");
        for (name, os) in [("a", None), ("b", Some("linux")), ("c", Some("windows"))] {
            package.components.push(Component {
                name: name.to_string(),
                only: ComponentTarget {
                    local_os: os.map(str::to_string),
                },
                ..Default::default()
            });
        }
        package
    }

    fn names(components: &[Component]) -> Vec<&str> {
        components.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_empty_keeps_all() {
        assert_eq!(names(&ComponentFilter::empty().apply(&package())), ["a", "b", "c"]);
    }

    #[test]
    fn test_local_os() {
        let filter = ComponentFilter::by_local_os("linux");
        assert_eq!(names(&filter.apply(&package())), ["a", "b"]);
    }

    #[test]
    fn test_requested_preserves_package_order() {
        let filter = ComponentFilter::empty().with_requested(["c", "a"]);
        assert_eq!(names(&filter.apply(&package())), ["a", "c"]);
    }

    #[test]
    fn test_unknown_names_select_nothing() {
        let filter = ComponentFilter::empty().with_requested(["nope"]);
        assert!(filter.apply(&package()).is_empty());
    }

    #[test]
    fn test_blank_names_ignored() {
        let filter = ComponentFilter::empty().with_requested([""]);
        assert!(filter.requested().is_empty());
        assert_eq!(filter.apply(&package()).len(), 3);
    }
}
