// src/concretize/mod.rs

//! Concretization: abstract specs to concrete DAGs
//!
//! The search keeps one node per package name. Each step first expands
//! every node whose fields are all decided: its conflict rules are checked
//! and its active dependencies are added, with their constraints imposed on
//! the child nodes. It then picks the open field with the fewest remaining
//! candidates and tries them in preference order. A contradiction restores
//! the state saved at the most recent choice point and tries its next
//! candidate.
//!
//! Preference order:
//! - versions as the repository lists them (preferred, newest, deprecated last)
//! - the declared variant default first
//! - compilers in configured order
//!
//! Ties between fields go to the earliest discovered node, then version,
//! variants alphabetically, compiler, architecture.

mod conflict;
mod state;

pub use conflict::{ConcretizationError, Conflict, Requirement};

use crate::arch::{ArchConstraint, Architecture};
use crate::compiler::{Compiler, CompilerConstraint};
use crate::error::{Error, Result};
use crate::repository::PackageRepository;
use crate::spec::{ConcreteSpec, DepType, DepTypes, Dependency, Spec, SpecInterner};
use state::{ChoicePoint, Choice, Field, Imposed, NodeState, State};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Search steps allowed before giving up
pub const DEFAULT_MAX_STEPS: usize = 100_000;

/// Knobs for a concretization run
#[derive(Debug, Clone)]
pub struct ConcretizerOptions {
    /// Solve all roots together so each package has one configuration
    pub unify: bool,
    pub max_steps: usize,
    /// Follow dependencies whose only type is `test`
    pub include_test_deps: bool,
}

impl Default for ConcretizerOptions {
    fn default() -> Self {
        Self {
            unify: true,
            max_steps: DEFAULT_MAX_STEPS,
            include_test_deps: false,
        }
    }
}

/// Resolves abstract specs against a package repository
pub struct Concretizer<'a> {
    repo: &'a dyn PackageRepository,
    compilers: Vec<Compiler>,
    host: Architecture,
    options: ConcretizerOptions,
    constraints: Vec<Spec>,
}

impl<'a> Concretizer<'a> {
    /// `compilers` is the preference-ordered list of available compilers;
    /// `host` fills architecture fields nothing constrains.
    pub fn new(repo: &'a dyn PackageRepository, compilers: Vec<Compiler>, host: Architecture) -> Self {
        Self {
            repo,
            compilers,
            host,
            options: ConcretizerOptions::default(),
            constraints: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: ConcretizerOptions) -> Self {
        self.options = options;
        self
    }

    /// Constraints applied to a package whenever it appears in a solution
    pub fn with_constraints(mut self, constraints: Vec<Spec>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn options(&self) -> &ConcretizerOptions {
        &self.options
    }

    pub fn constraints(&self) -> &[Spec] {
        &self.constraints
    }

    /// Concretize a single root
    pub fn concretize(&self, spec: &Spec) -> Result<Arc<ConcreteSpec>> {
        let mut interner = SpecInterner::default();
        self.solve(std::slice::from_ref(spec), &mut interner)?
            .pop()
            .ok_or_else(|| Error::NotConcrete(spec.to_string()))
    }

    /// Concretize several roots, together or one by one per `unify`
    ///
    /// Either way, identical subgraphs come back as the same shared node.
    pub fn concretize_all(&self, specs: &[Spec]) -> Result<Vec<Arc<ConcreteSpec>>> {
        let mut interner = SpecInterner::default();
        if self.options.unify {
            return self.solve(specs, &mut interner);
        }
        let mut out = Vec::with_capacity(specs.len());
        for spec in specs {
            out.extend(self.solve(std::slice::from_ref(spec), &mut interner)?);
        }
        Ok(out)
    }

    fn solve(&self, roots: &[Spec], interner: &mut SpecInterner) -> Result<Vec<Arc<ConcreteSpec>>> {
        for spec in roots.iter().chain(&self.constraints) {
            if spec.name().is_none() {
                return Err(Error::ParseError(format!(
                    "cannot concretize '{}': no package name",
                    spec
                )));
            }
        }
        let names: Vec<String> = roots.iter().map(|r| r.format_node()).collect();

        let mut search = Search::new(self);
        match search.run(roots, &names, interner) {
            Ok(specs) => {
                info!(
                    "Concretized {} in {} step(s) with {} backtrack(s)",
                    names.join(", "),
                    search.steps,
                    search.backtracks
                );
                Ok(specs)
            }
            Err(err) => {
                debug!("Concretization failed after {} step(s)", search.steps);
                Err(Error::Concretization(err))
            }
        }
    }
}

/// One run of the search
struct Search<'c, 'a> {
    solver: &'c Concretizer<'a>,
    /// Constraints waiting for a package's node to appear
    pending: HashMap<String, Vec<Imposed>>,
    steps: usize,
    backtracks: usize,
}

/// The next decision: node, field, first choice, remaining choices
type Decision = (usize, Field, Choice, VecDeque<Choice>);

impl<'c, 'a> Search<'c, 'a> {
    fn new(solver: &'c Concretizer<'a>) -> Self {
        Self {
            solver,
            pending: HashMap::new(),
            steps: 0,
            backtracks: 0,
        }
    }

    fn run(
        &mut self,
        roots: &[Spec],
        names: &[String],
        interner: &mut SpecInterner,
    ) -> std::result::Result<Vec<Arc<ConcreteSpec>>, ConcretizationError> {
        let mut error = ConcretizationError::new(names.to_vec());
        let mut state = State::default();
        if let Err(conflict) = self.seed(&mut state, roots) {
            error.record(conflict);
            return Err(error);
        }

        let mut stack: Vec<ChoicePoint> = Vec::new();
        loop {
            self.steps += 1;
            if self.steps > self.solver.options.max_steps {
                error.record(Conflict::SearchLimit {
                    steps: self.solver.options.max_steps,
                });
                return Err(error);
            }

            match self.step(&mut state) {
                Ok(Some((node, field, first, alternatives))) => {
                    trace!(
                        "Deciding {} of {} ({} alternative(s) left)",
                        field.label(),
                        state.nodes[node].name,
                        alternatives.len()
                    );
                    if !alternatives.is_empty() {
                        stack.push(ChoicePoint {
                            snapshot: state.clone(),
                            node,
                            field: field.clone(),
                            alternatives,
                        });
                    }
                    state.nodes[node].assign(first);
                    continue;
                }
                Ok(None) => match self.finish(&state, roots, interner) {
                    Ok(specs) => return Ok(specs),
                    Err(conflict) => error.record(conflict),
                },
                Err(conflict) => error.record(conflict),
            }

            // Resume from the most recent choice point with alternatives left
            let Some(mut point) = stack.pop() else {
                return Err(error);
            };
            let Some(choice) = point.alternatives.pop_front() else {
                return Err(error);
            };
            self.backtracks += 1;
            state = point.snapshot.clone();
            debug!(
                "Backtracking to {} of {}",
                point.field.label(),
                state.nodes[point.node].describe()
            );
            state.nodes[point.node].assign(choice);
            if !point.alternatives.is_empty() {
                stack.push(point);
            }
        }
    }

    /// Register `^dep` and configured constraints, then create the roots
    fn seed(&mut self, state: &mut State, roots: &[Spec]) -> std::result::Result<(), Conflict> {
        for spec in &self.solver.constraints {
            self.defer(spec, "configured constraint");
            for dep in spec.flat_dependencies() {
                self.defer(&dep.spec, "configured constraint");
            }
        }
        for root in roots {
            for dep in root.flat_dependencies() {
                self.defer(&dep.spec, &format!("^{} in request", dep.spec.format_node()));
            }
        }
        for root in roots {
            let name = root.name().unwrap_or_default();
            let idx = self.ensure(state, name, "request")?;
            self.impose(state, idx, Imposed::new(root.clone(), "requested"))?;
        }
        Ok(())
    }

    fn defer(&mut self, spec: &Spec, origin: &str) {
        if let Some(name) = spec.name() {
            self.pending
                .entry(name.to_string())
                .or_default()
                .push(Imposed::new(spec.clone(), origin));
        }
    }

    /// Node index for `name`, creating it with any pending constraints
    fn ensure(&self, state: &mut State, name: &str, required_by: &str) -> std::result::Result<usize, Conflict> {
        if !self.solver.repo.contains(name) {
            return Err(Conflict::UnknownPackage {
                package: name.to_string(),
                required_by: required_by.to_string(),
            });
        }
        let (idx, created) = state.node(name);
        if created && let Some(pending) = self.pending.get(name) {
            for imposed in pending {
                self.impose(state, idx, imposed.clone())?;
            }
        }
        Ok(idx)
    }

    /// Add a constraint to a node, checking it against decided fields
    fn impose(&self, state: &mut State, idx: usize, imposed: Imposed) -> std::result::Result<(), Conflict> {
        let node = &mut state.nodes[idx];
        let Some(desc) = self.solver.repo.get(&node.name) else {
            return Err(Conflict::UnknownPackage {
                package: node.name.clone(),
                required_by: imposed.origin,
            });
        };

        for (name, value) in &imposed.spec.variants {
            let Some(decl) = desc.variants.get(name) else {
                return Err(Conflict::UnknownVariant {
                    package: node.name.clone(),
                    variant: name.clone(),
                    origin: imposed.origin.clone(),
                });
            };
            if !decl.accepts_constraint(value) {
                return Err(Conflict::InvalidVariantValue {
                    package: node.name.clone(),
                    variant: name.clone(),
                    value: value.to_string(),
                    origin: imposed.origin.clone(),
                });
            }
            if let Some(decided) = node.variants.get(name)
                && !decided.as_ref().is_some_and(|d| d.satisfies(value))
            {
                return Err(Conflict::Incompatible {
                    package: node.name.clone(),
                    field: Field::Variant(name.clone()).label(),
                    chosen: decided
                        .as_ref()
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "unset".to_string()),
                    requirement: imposed.requirement(),
                });
            }
        }

        let chosen = if let Some(version) = &node.version
            && !imposed.spec.versions.satisfies(version)
        {
            Some((Field::Version, version.to_string()))
        } else if let (Some(compiler), Some(wanted)) = (&node.compiler, &imposed.spec.compiler)
            && !wanted.satisfied_by(compiler)
        {
            Some((Field::Compiler, compiler.to_string()))
        } else if let Some(arch) = &node.arch
            && !imposed.spec.arch.satisfied_by(arch)
        {
            Some((Field::Arch, arch.to_string()))
        } else {
            None
        };
        if let Some((field, chosen)) = chosen {
            return Err(Conflict::Incompatible {
                package: node.name.clone(),
                field: field.label(),
                chosen,
                requirement: imposed.requirement(),
            });
        }

        node.imposed.push(imposed);
        Ok(())
    }

    /// Expand decided nodes, then pick the most constrained open field
    fn step(&self, state: &mut State) -> std::result::Result<Option<Decision>, Conflict> {
        while let Some(idx) =
            (0..state.nodes.len()).find(|&i| !state.nodes[i].expanded && self.is_decided(&state.nodes[i]))
        {
            self.expand(state, idx)?;
        }

        let mut best: Option<(usize, Field, Vec<Choice>)> = None;
        'nodes: for (idx, node) in state.nodes.iter().enumerate() {
            for field in self.open_fields(node) {
                let candidates = self.candidates(node, &field);
                if candidates.is_empty() {
                    return Err(self.no_candidates(node, &field));
                }
                if best.as_ref().is_none_or(|(_, _, b)| candidates.len() < b.len()) {
                    let forced = candidates.len() == 1;
                    best = Some((idx, field, candidates));
                    if forced {
                        break 'nodes;
                    }
                }
            }
        }

        let Some((idx, field, candidates)) = best else {
            return Ok(None);
        };
        let mut alternatives: VecDeque<Choice> = candidates.into();
        let first = alternatives
            .pop_front()
            .ok_or_else(|| self.no_candidates(&state.nodes[idx], &field))?;
        Ok(Some((idx, field, first, alternatives)))
    }

    fn open_fields(&self, node: &NodeState) -> Vec<Field> {
        let mut fields = Vec::new();
        if node.version.is_none() {
            fields.push(Field::Version);
        }
        if let Some(desc) = self.solver.repo.get(&node.name) {
            fields.extend(
                desc.variants
                    .keys()
                    .filter(|name| !node.variants.contains_key(*name))
                    .map(|name| Field::Variant(name.clone())),
            );
        }
        if node.compiler.is_none() {
            fields.push(Field::Compiler);
        }
        if node.arch.is_none() {
            fields.push(Field::Arch);
        }
        fields
    }

    fn is_decided(&self, node: &NodeState) -> bool {
        self.open_fields(node).is_empty()
    }

    /// Values still allowed for a field, most preferred first
    fn candidates(&self, node: &NodeState, field: &Field) -> Vec<Choice> {
        let Some(desc) = self.solver.repo.get(&node.name) else {
            return Vec::new();
        };
        match field {
            Field::Version => desc
                .versions
                .iter()
                .map(|d| &d.version)
                .filter(|v| node.imposed.iter().all(|i| i.spec.versions.satisfies(v)))
                .cloned()
                .map(Choice::Version)
                .collect(),
            Field::Variant(name) => {
                let Some(decl) = desc.variants.get(name) else {
                    return Vec::new();
                };
                let constraints: Vec<_> = node
                    .imposed
                    .iter()
                    .filter_map(|i| i.spec.variants.get(name))
                    .collect();
                decl.candidates(&constraints)
                    .into_iter()
                    .map(|value| Choice::Variant(name.clone(), value))
                    .collect()
            }
            Field::Compiler => self
                .solver
                .compilers
                .iter()
                .filter(|c| {
                    node.imposed
                        .iter()
                        .all(|i| i.spec.compiler.as_ref().is_none_or(|w| w.satisfied_by(c)))
                })
                .cloned()
                .map(Choice::Compiler)
                .collect(),
            Field::Arch => node
                .imposed
                .iter()
                .try_fold(ArchConstraint::default(), |acc, i| acc.merge(&i.spec.arch))
                .map(|merged| Choice::Arch(merged.complete(&self.solver.host)))
                .into_iter()
                .collect(),
        }
    }

    fn no_candidates(&self, node: &NodeState, field: &Field) -> Conflict {
        let mut requirements: Vec<Requirement> = node
            .imposed
            .iter()
            .filter(|i| match field {
                Field::Version => !i.spec.versions.is_any(),
                Field::Variant(name) => i.spec.variants.contains_key(name),
                Field::Compiler => i.spec.compiler.is_some(),
                Field::Arch => !i.spec.arch.is_empty(),
            })
            .map(Imposed::requirement)
            .collect();
        match field {
            Field::Version => requirements.push(Requirement {
                constraint: self
                    .solver
                    .repo
                    .versions(&node.name)
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                origin: "declared versions".to_string(),
            }),
            Field::Compiler => requirements.push(Requirement {
                constraint: self
                    .solver
                    .compilers
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                origin: "available compilers".to_string(),
            }),
            _ => {}
        }
        Conflict::NoCandidates {
            package: node.name.clone(),
            field: field.label(),
            requirements,
        }
    }

    /// Check node-level conflict rules and add active dependencies
    fn expand(&self, state: &mut State, idx: usize) -> std::result::Result<(), Conflict> {
        state.nodes[idx].expanded = true;
        let Some(decided) = state.nodes[idx].decided() else {
            return Ok(());
        };
        let repo = self.solver.repo;
        let facts = decided.facts();
        let parent = format!("{}@{}", decided.name, decided.version);

        for rule in repo.conflicts(&decided.name, &facts) {
            if rule.spec.dependencies.is_empty() && rule.spec.matches_node(&facts) {
                return Err(Conflict::ConflictRule {
                    package: parent,
                    rule: rule.spec.to_string(),
                    message: rule.message,
                });
            }
        }

        let test_only = DepTypes::of(&[DepType::Test]);
        for dep in repo.dependencies(&decided.name, &facts) {
            if dep.deptypes == test_only && !self.solver.options.include_test_deps {
                continue;
            }
            let child = dep.name().to_string();
            let cidx = self.ensure(state, &child, &parent)?;
            state.link(idx, &child, dep.deptypes);
            let origin = format!("{} depends on {}", parent, dep.spec.format_node());
            self.impose(state, cidx, Imposed::new(dep.spec.clone(), origin))?;

            if !repo.independent_toolchain(&child) {
                let toolchain = Spec {
                    compiler: Some(CompilerConstraint::exact(&decided.compiler)),
                    arch: ArchConstraint::exact(&decided.arch),
                    ..Spec::default()
                };
                let origin = format!("toolchain of {}", parent);
                self.impose(state, cidx, Imposed::new(toolchain, origin))?;
            }
        }
        Ok(())
    }

    /// Build the concrete DAG and run the checks that need whole subgraphs
    fn finish(
        &self,
        state: &State,
        roots: &[Spec],
        interner: &mut SpecInterner,
    ) -> std::result::Result<Vec<Arc<ConcreteSpec>>, Conflict> {
        if let Some(cycle) = state.find_cycle() {
            return Err(Conflict::CircularDependency { cycle });
        }

        let mut built: Vec<Option<Arc<ConcreteSpec>>> = vec![None; state.nodes.len()];
        for idx in 0..state.nodes.len() {
            self.build(state, idx, &mut built, interner)?;
        }

        for (node, spec) in state.nodes.iter().zip(&built) {
            let Some(spec) = spec else { continue };
            for rule in self.solver.repo.conflicts(&node.name, &spec.facts()) {
                if !rule.spec.dependencies.is_empty() && spec.satisfies(&rule.spec) {
                    return Err(Conflict::ConflictRule {
                        package: spec.format_node(),
                        rule: rule.spec.to_string(),
                        message: rule.message,
                    });
                }
            }
        }

        let mut out = Vec::with_capacity(roots.len());
        for root in roots {
            let name = root.name().unwrap_or_default();
            let Some(spec) = state.get(name).and_then(|idx| built[idx].clone()) else {
                return Err(Conflict::UnknownPackage {
                    package: name.to_string(),
                    required_by: "request".to_string(),
                });
            };
            for dep in &root.dependencies {
                let wanted = Spec {
                    dependencies: vec![dep.clone()],
                    ..Spec::default()
                };
                if !spec.satisfies(&wanted) {
                    return Err(Conflict::MissingDependency {
                        root: name.to_string(),
                        dependency: dep.spec.to_string(),
                    });
                }
            }
            out.push(spec);
        }
        Ok(out)
    }

    fn build(
        &self,
        state: &State,
        idx: usize,
        built: &mut [Option<Arc<ConcreteSpec>>],
        interner: &mut SpecInterner,
    ) -> std::result::Result<Arc<ConcreteSpec>, Conflict> {
        if let Some(spec) = &built[idx] {
            return Ok(spec.clone());
        }
        let node = &state.nodes[idx];
        let decided = node
            .decided()
            .ok_or_else(|| self.no_candidates(node, &Field::Version))?;

        let mut dependencies = Vec::with_capacity(node.edges.len());
        for (child, deptypes) in &node.edges {
            let Some(cidx) = state.get(child) else { continue };
            dependencies.push(Dependency {
                deptypes: *deptypes,
                spec: self.build(state, cidx, built, interner)?,
            });
        }

        let spec = interner.intern(ConcreteSpec::from_parts(
            decided.name,
            decided.version,
            decided.variants,
            decided.compiler,
            decided.arch,
            dependencies,
        ));
        built[idx] = Some(spec.clone());
        Ok(spec)
    }
}
