// src/concretize/conflict.rs

//! Conflict types for concretization
//!
//! Every dead end the search reaches is described by a [`Conflict`]. When
//! no alternative remains, the conflicts seen along the way are returned
//! as a [`ConcretizationError`].

use std::fmt;

/// A constraint placed on a node, with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub constraint: String,
    pub origin: String,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.constraint, self.origin)
    }
}

/// One reason a partial assignment cannot be completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// No candidate value remains for a field
    NoCandidates {
        package: String,
        field: String,
        requirements: Vec<Requirement>,
    },
    /// A new constraint contradicts a value already chosen
    Incompatible {
        package: String,
        field: String,
        chosen: String,
        requirement: Requirement,
    },
    /// A dependency names a package no repository defines
    UnknownPackage { package: String, required_by: String },
    /// A constraint names a variant the package does not declare
    UnknownVariant {
        package: String,
        variant: String,
        origin: String,
    },
    /// A constraint asks for a value the variant can never take
    InvalidVariantValue {
        package: String,
        variant: String,
        value: String,
        origin: String,
    },
    /// A package's declared conflict matches the chosen configuration
    ConflictRule {
        package: String,
        rule: String,
        message: Option<String>,
    },
    /// A requested `^dep` is not part of the root's DAG
    MissingDependency { root: String, dependency: String },
    /// Dependencies form a cycle
    CircularDependency { cycle: Vec<String> },
    /// The search gave up after too many steps
    SearchLimit { steps: usize },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::NoCandidates {
                package,
                field,
                requirements,
            } => {
                write!(f, "no {} of {} satisfies all of:", field, package)?;
                for req in requirements {
                    write!(f, "\n    - {}", req)?;
                }
                Ok(())
            }
            Conflict::Incompatible {
                package,
                field,
                chosen,
                requirement,
            } => write!(
                f,
                "{} {} {} does not satisfy {}",
                package, field, chosen, requirement
            ),
            Conflict::UnknownPackage {
                package,
                required_by,
            } => write!(f, "unknown package {} required by {}", package, required_by),
            Conflict::UnknownVariant {
                package,
                variant,
                origin,
            } => write!(
                f,
                "{} has no variant '{}' (requested by {})",
                package, variant, origin
            ),
            Conflict::InvalidVariantValue {
                package,
                variant,
                value,
                origin,
            } => write!(
                f,
                "variant '{}' of {} cannot be {} (requested by {})",
                variant, package, value, origin
            ),
            Conflict::ConflictRule {
                package,
                rule,
                message,
            } => {
                write!(f, "{} conflicts with '{}'", package, rule)?;
                if let Some(msg) = message {
                    write!(f, ": {}", msg)?;
                }
                Ok(())
            }
            Conflict::MissingDependency { root, dependency } => {
                write!(f, "{} does not depend on {}", root, dependency)
            }
            Conflict::CircularDependency { cycle } => {
                write!(f, "Circular dependency: {}", cycle.join(" -> "))
            }
            Conflict::SearchLimit { steps } => {
                write!(f, "gave up after {} search steps", steps)
            }
        }
    }
}

/// Most conflicts kept in an error
const MAX_CHAIN: usize = 16;

/// No assignment satisfies the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcretizationError {
    pub roots: Vec<String>,
    /// Distinct conflicts in the order they were first hit
    pub chain: Vec<Conflict>,
}

impl ConcretizationError {
    pub fn new(roots: Vec<String>) -> Self {
        Self {
            roots,
            chain: Vec::new(),
        }
    }

    /// Record a conflict unless already known
    pub fn record(&mut self, conflict: Conflict) {
        if self.chain.len() < MAX_CHAIN && !self.chain.contains(&conflict) {
            self.chain.push(conflict);
        }
    }

    /// True if some recorded conflict matches `pred`
    pub fn any(&self, pred: impl Fn(&Conflict) -> bool) -> bool {
        self.chain.iter().any(pred)
    }
}

impl fmt::Display for ConcretizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot concretize {}", self.roots.join(", "))?;
        for conflict in &self.chain {
            write!(f, "\n  - {}", conflict)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConcretizationError {}
