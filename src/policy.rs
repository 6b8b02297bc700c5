//! Which statements receive a probe
//!
//! Rules are evaluated in order and the first match wins:
//! 1. units of the tracing runtime itself are never instrumented
//! 2. units under an excluded platform prefix are skipped
//! 3. with an application scope set, methods outside it are skipped
//! 4. identity-binding statements are never preceded by a probe
//! 5. everything else is instrumented

use std::collections::HashSet;

use crate::ir::{Statement, StatementKind};

/// Platform and framework namespaces skipped by default
pub const DEFAULT_EXCLUDED_PREFIXES: [&str; 4] = [
    "android.support.",
    "com.google.",
    "com.android.",
    "android.java.",
];

/// Outcome of evaluating the policy for one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Decision {
    Include,
    HelperUnit,
    ExcludedNamespace,
    OutOfScope,
    IdentityBinding,
}

impl Decision {
    pub fn is_include(self) -> bool {
        self == Decision::Include
    }
}

/// Organizational root of an application namespace
///
/// Namespaces with more than two segments are cut to their first two
/// (`com.example.app.ui` becomes `com.example`); shorter ones are kept.
pub fn scope_prefix(namespace: &str) -> String {
    let parts: Vec<&str> = namespace.trim_end_matches('.').split('.').collect();
    if parts.len() > 2 {
        format!("{}.{}", parts[0], parts[1])
    } else {
        namespace.to_string()
    }
}

/// Exclusion/inclusion rules for one run; read-only during injection
#[derive(Debug, Clone, Default)]
pub struct ExclusionPolicy {
    helper_units: HashSet<String>,
    excluded_prefixes: Vec<String>,
    scope: Option<String>,
}

impl ExclusionPolicy {
    pub fn new<H, P>(helper_units: H, excluded_prefixes: P) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        let mut prefixes: Vec<String> = Vec::new();
        for prefix in excluded_prefixes {
            let prefix = prefix.into();
            if !prefixes.contains(&prefix) {
                prefixes.push(prefix);
            }
        }
        Self {
            helper_units: helper_units.into_iter().map(Into::into).collect(),
            excluded_prefixes: prefixes,
            scope: None,
        }
    }

    /// Restrict instrumentation to methods whose signature starts with `prefix`
    pub fn with_scope(mut self, prefix: Option<String>) -> Self {
        self.scope = prefix;
        self
    }

    /// Scope to the organizational root of the application's `namespace`
    pub fn scoped_to_application(self, namespace: &str) -> Self {
        self.with_scope(Some(scope_prefix(namespace)))
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn is_helper(&self, unit_name: &str) -> bool {
        self.helper_units.contains(unit_name)
    }

    /// Unit-level rules (1 and 2); `Some` means no statement of the unit is instrumented
    pub fn unit_decision(&self, unit_name: &str) -> Option<Decision> {
        if self.is_helper(unit_name) {
            Some(Decision::HelperUnit)
        } else if self
            .excluded_prefixes
            .iter()
            .any(|prefix| unit_name.starts_with(prefix.as_str()))
        {
            Some(Decision::ExcludedNamespace)
        } else {
            None
        }
    }

    /// Method-level rule 3
    pub fn in_scope(&self, method_signature: &str) -> bool {
        match &self.scope {
            None => true,
            Some(prefix) => method_signature
                .strip_prefix('<')
                .unwrap_or(method_signature)
                .starts_with(prefix.as_str()),
        }
    }

    /// Evaluate every rule for one statement
    pub fn decide(&self, statement: &Statement, method_signature: &str, unit_name: &str) -> Decision {
        if let Some(decision) = self.unit_decision(unit_name) {
            return decision;
        }
        if !self.in_scope(method_signature) {
            return Decision::OutOfScope;
        }
        if statement.kind() == StatementKind::IdentityBinding {
            return Decision::IdentityBinding;
        }
        Decision::Include
    }

    pub fn include(&self, statement: &Statement, method_signature: &str, unit_name: &str) -> bool {
        self.decide(statement, method_signature, unit_name).is_include()
    }
}
