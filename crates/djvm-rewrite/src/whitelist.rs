//! The whitelist: host names that pass through the remapper unchanged.

use std::collections::HashSet;

use regex::Regex;

/// A decision function over host internal names. A name the whitelist
/// contains is *unmapped*: it keeps its host spelling through the remapper.
/// Everything else is mapped into the sandbox namespace.
#[derive(Debug, Default)]
pub struct Whitelist {
    names: HashSet<String>,
    patterns: Vec<Regex>,
}

impl Whitelist {
    /// The minimal whitelist: the root object, plus the dynamic-linkage
    /// bootstrap owner that call sites must keep naming for the host VM to
    /// link them.
    pub fn minimal() -> Self {
        Self {
            names: ["java/lang/Object", "java/lang/invoke/LambdaMetafactory"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            patterns: Vec::new(),
        }
    }

    /// Add exact internal names.
    pub fn with_names(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.names.extend(names);
        self
    }

    /// Add anchored patterns. Patterns are matched against the whole
    /// internal name; anchor them explicitly (`^java/lang/invoke/.*$`).
    pub fn with_patterns<I, S>(mut self, patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            self.patterns.push(Regex::new(pattern.as_ref())?);
        }
        Ok(self)
    }

    /// True when `name` passes through the remapper unchanged.
    pub fn contains(&self, name: &str) -> bool {
        if self.names.contains(name) {
            return true;
        }
        self.patterns.iter().any(|p| p.is_match(name))
    }
}
