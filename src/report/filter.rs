//! Report-class allow-lists

use std::collections::BTreeSet;

use serde::Deserialize;

/// Set of report classes a caller wants to see
///
/// An empty set lets everything through.
///
/// ```
/// use gpsd_stream::report::FilterSet;
///
/// let filter = FilterSet::from_iter(["TPV", "SKY"]);
/// assert!(filter.allows("TPV"));
/// assert!(!filter.allows("VERSION"));
/// assert!(FilterSet::default().allows("VERSION"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    classes: BTreeSet<String>,
}

/// Just enough of a frame to read its class
#[derive(Deserialize)]
struct ClassTag {
    class: String,
}

impl FilterSet {
    /// A filter that passes everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds a class to the allow-list
    pub fn insert(&mut self, class: impl Into<String>) {
        self.classes.insert(class.into());
    }

    /// True when the filter passes everything
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Allowed classes, in sorted order
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(String::as_str)
    }

    /// Pass/drop decision for a decoded report's class
    pub fn allows(&self, class: &str) -> bool {
        self.classes.is_empty() || self.classes.contains(class)
    }

    /// Pass/drop decision for a raw frame
    ///
    /// A frame whose class cannot be read only passes an empty filter.
    pub fn allows_line(&self, line: &str) -> bool {
        if self.classes.is_empty() {
            return true;
        }

        serde_json::from_str::<ClassTag>(line)
            .map(|tag| self.classes.contains(&tag.class))
            .unwrap_or(false)
    }
}

impl<S: Into<String>> FromIterator<S> for FilterSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        FilterSet {
            classes: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S: Into<String>> Extend<S> for FilterSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.classes.extend(iter.into_iter().map(Into::into));
    }
}
