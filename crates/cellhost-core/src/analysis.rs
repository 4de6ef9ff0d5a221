//! Dependency analysis of cell code.
//!
//! Language front ends walk their own syntax trees and report names to a
//! [`NameCollector`]. The collector turns those observations into the cell's
//! inputs (free names, in first-use order) and its output (the name bound by
//! the last top-level statement).

use rustc_hash::FxHashSet;

/// Result of analysing a cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    /// Names the cell reads but does not bind.
    pub inputs: Vec<String>,
    /// Name bound by the last top-level statement.
    pub output: Option<String>,
}

/// Accumulates declared, used and excluded names during a tree walk.
#[derive(Debug, Default)]
pub struct NameCollector {
    used: Vec<String>,
    declared: FxHashSet<String>,
    excluded: FxHashSet<String>,
    output: Option<String>,
}

impl NameCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a name read by the code.
    pub fn used(&mut self, name: &str) {
        if !self.used.iter().any(|n| n == name) {
            self.used.push(name.to_string());
        }
    }

    /// Record a name bound by the code.
    pub fn declared(&mut self, name: &str) {
        self.declared.insert(name.to_string());
    }

    /// Record a name that is local to a construct, such as a loop variable.
    /// Excluded names are never inputs.
    pub fn excluded(&mut self, name: &str) {
        self.excluded.insert(name.to_string());
    }

    /// Set the name bound by the last top-level statement.
    pub fn set_output(&mut self, name: Option<String>) {
        self.output = name;
    }

    /// Resolve the collected names.
    ///
    /// `is_bound` reports names already held by the persistent scope and
    /// `builtins` lists the language's predefined names; neither can be an
    /// input.
    pub fn finish(self, is_bound: impl Fn(&str) -> bool, builtins: &[&str]) -> Analysis {
        let builtins: FxHashSet<&str> = builtins.iter().copied().collect();
        let inputs = self
            .used
            .into_iter()
            .filter(|name| {
                !self.declared.contains(name)
                    && !self.excluded.contains(name)
                    && !builtins.contains(name.as_str())
                    && !is_bound(name)
            })
            .collect();
        Analysis {
            inputs,
            output: self.output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_keep_first_use_order() {
        let mut names = NameCollector::new();
        for name in ["y", "x", "y", "z"] {
            names.used(name);
        }
        let analysis = names.finish(|_| false, &[]);
        assert_eq!(analysis.inputs, ["y", "x", "z"]);
    }

    #[test]
    fn test_declared_bound_and_builtin_names_are_not_inputs() {
        let mut names = NameCollector::new();
        for name in ["a", "b", "c", "print", "i"] {
            names.used(name);
        }
        names.declared("a");
        names.excluded("i");
        names.set_output(Some("a".to_string()));

        let analysis = names.finish(|name| name == "b", &["print"]);
        assert_eq!(analysis.inputs, ["c"]);
        assert_eq!(analysis.output.as_deref(), Some("a"));
    }
}
