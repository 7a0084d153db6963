//! The evaluation engine.
//!
//! A `Simulation` resolves (variable, period) requests recursively. Each cache
//! entry moves `uncomputed -> in_progress -> done | failed`; the first
//! requester owns the computation and concurrent requesters block until it
//! settles. A request for an entry already in progress on the requester's own
//! stack, or on a chain of tasks waiting back on the requester, is a cycle.

use super::error::ComputationError;
use super::ledger::{Array, CacheKey, EntryStatus, Ledger, Slot, TaskId};
use super::scope::Scope;
use crate::config::EngineConfig;
use crate::entity::{EntityGraph, EntityId};
use crate::parameters::ParameterTree;
use crate::period::{Granularity, Period};
use crate::store::{Reconciliation, VariableDefinition, VariableKind, VariableRegistry};
use rayon::prelude::*;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace, warn};

/// The call stack of one top-level request.
pub(crate) struct Resolver<'a> {
    task: TaskId,
    stack: RefCell<SmallVec<[CacheKey; 16]>>,
    cancel: &'a AtomicBool,
}

impl<'a> Resolver<'a> {
    fn new(task: TaskId, cancel: &'a AtomicBool) -> Self {
        Self { task, stack: RefCell::new(SmallVec::new()), cancel }
    }

    fn current(&self) -> Option<CacheKey> {
        self.stack.borrow().last().copied()
    }

    fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Stack suffix starting at `key`, if `key` is on the stack.
    fn loop_from(&self, key: CacheKey) -> Vec<CacheKey> {
        let stack = self.stack.borrow();
        stack.iter().position(|k| *k == key).map(|pos| stack[pos..].to_vec()).unwrap_or_default()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// One simulation run: registry, entities, parameters, inputs and the cache.
///
/// Several simulations (e.g. baseline and reform) may share registry and
/// entities while keeping separate inputs and caches.
pub struct Simulation {
    registry: Arc<VariableRegistry>,
    entities: Arc<EntityGraph>,
    parameters: Arc<ParameterTree>,
    config: EngineConfig,
    /// VariableId -> home entity
    homes: Vec<EntityId>,
    inputs: HashMap<CacheKey, Array>,
    ledger: Mutex<Ledger>,
    ready: Condvar,
    next_task: AtomicU64,
    evaluations: AtomicUsize,
}

impl Simulation {
    /// Binds every registered variable to its entity in `entities`.
    pub fn new(
        registry: Arc<VariableRegistry>,
        entities: Arc<EntityGraph>,
        parameters: Arc<ParameterTree>,
    ) -> Result<Self, ComputationError> {
        let homes = registry
            .iter()
            .map(|(_, def)| {
                entities.id_of(&def.entity).map_err(|_| ComputationError::InvalidDefinition {
                    name: def.name().to_string(),
                    reason: format!("unknown entity '{}'", def.entity),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            variables = registry.count(),
            persons = entities.person_count(),
            entities = entities.entity_count(),
            "simulation created"
        );
        Ok(Self {
            registry,
            entities,
            parameters,
            config: EngineConfig::default(),
            homes,
            inputs: HashMap::new(),
            ledger: Mutex::new(Ledger::new()),
            ready: Condvar::new(),
            next_task: AtomicU64::new(0),
            evaluations: AtomicUsize::new(0),
        })
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn entities(&self) -> &EntityGraph {
        &self.entities
    }

    pub fn parameters(&self) -> &ParameterTree {
        &self.parameters
    }

    /// A new simulation over the same variables, entities, parameters and inputs, with an empty cache.
    pub fn fork(&self) -> Simulation {
        Simulation {
            registry: Arc::clone(&self.registry),
            entities: Arc::clone(&self.entities),
            parameters: Arc::clone(&self.parameters),
            config: self.config.clone(),
            homes: self.homes.clone(),
            inputs: self.inputs.clone(),
            ledger: Mutex::new(Ledger::new()),
            ready: Condvar::new(),
            next_task: AtomicU64::new(0),
            evaluations: AtomicUsize::new(0),
        }
    }

    /// A fork evaluated under different parameters (a reform).
    pub fn with_parameters(&self, parameters: Arc<ParameterTree>) -> Simulation {
        let mut fork = self.fork();
        fork.parameters = parameters;
        fork
    }

    /// Number of formula invocations so far. Cache hits do not count.
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ledger_mut(&mut self) -> &mut Ledger {
        self.ledger.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn with_ledger<R>(&self, f: impl FnOnce(&Ledger) -> R) -> R {
        f(&self.lock())
    }

    pub(crate) fn home(&self, def_id: crate::store::VariableId) -> EntityId {
        self.homes[def_id.index()]
    }

    pub(crate) fn key(&self, name: &str, period: Period) -> Result<CacheKey, ComputationError> {
        Ok(CacheKey::new(self.registry.id(name)?, period.validate()?))
    }

    pub fn status(&self, name: &str, period: Period) -> Result<EntryStatus, ComputationError> {
        let key = self.key(name, period)?;
        Ok(self.lock().status(&key))
    }

    /// The (variable, period) pairs read while computing `name` for `period`.
    pub fn dependencies_of(&self, name: &str, period: Period) -> Result<Vec<(String, Period)>, ComputationError> {
        let key = self.key(name, period)?;
        Ok(self
            .lock()
            .reads(&key)
            .into_iter()
            .map(|k| (self.registry.name(k.variable).to_string(), k.period))
            .collect())
    }

    /// Overrides the value of `name` for `period` and drops every cached
    /// result computed from an overlapping period of it.
    pub fn set_input(&mut self, name: &str, period: Period, values: Vec<f64>) -> Result<(), ComputationError> {
        let id = self.key(name, period)?.variable;
        let def = self.registry.get(id);
        if period.granularity() != def.granularity {
            return Err(ComputationError::GranularityMismatch {
                variable: name.to_string(),
                defined: def.granularity,
                requested: period,
            });
        }
        let expected = self.entities.count(self.home(id));
        let values = conform(def, expected, values, "input")?;

        self.inputs.insert(CacheKey::new(id, period), values);
        let ledger = self.ledger_mut();
        let seeds: Vec<CacheKey> = ledger
            .keys()
            .filter(|k| k.variable == id && k.period.overlaps(&period))
            .copied()
            .collect();
        let dropped = ledger.invalidate(&seeds);
        debug!(variable = name, %period, dropped = dropped.len(), "input set");
        Ok(())
    }

    /// Discards every cached result. Inputs are kept.
    pub fn clear_cache(&mut self) {
        self.ledger_mut().clear();
    }

    /// Computes `name` for `period`, one value per record of its entity.
    pub fn calculate(&self, name: &str, period: Period) -> Result<Array, ComputationError> {
        let cancel = AtomicBool::new(false);
        self.run(name, period, &cancel)
    }

    /// Computes several requests, in parallel when configured. The first
    /// failure cancels the remaining work of this batch and is returned.
    pub fn calculate_many(&self, requests: &[(&str, Period)]) -> Result<Vec<Array>, ComputationError> {
        let cancel = AtomicBool::new(false);
        let first_error: Mutex<Option<ComputationError>> = Mutex::new(None);

        let attempt = |&(name, period): &(&str, Period)| {
            let result = self.run(name, period, &cancel);
            if let Err(e) = &result {
                if !e.is_cancelled() {
                    let mut slot = first_error.lock().unwrap_or_else(PoisonError::into_inner);
                    if slot.is_none() {
                        warn!(variable = name, %period, error = %e, "request failed, cancelling batch");
                        *slot = Some(e.clone());
                        cancel.store(true, Ordering::Release);
                    }
                }
            }
            result
        };

        let results: Vec<Result<Array, ComputationError>> = if self.config.parallel {
            requests.par_iter().map(&attempt).collect()
        } else {
            requests.iter().map(&attempt).collect()
        };

        if let Some(e) = first_error.into_inner().unwrap_or_else(PoisonError::into_inner) {
            return Err(e);
        }
        results.into_iter().collect()
    }

    fn run(&self, name: &str, period: Period, cancel: &AtomicBool) -> Result<Array, ComputationError> {
        let key = self.key(name, period)?;
        let resolver = Resolver::new(TaskId(self.next_task.fetch_add(1, Ordering::Relaxed)), cancel);
        debug!(variable = name, %period, task = resolver.task.0, "request");
        self.resolve(&resolver, key).map_err(|e| e.within(name, period))
    }

    fn describe(&self, keys: impl IntoIterator<Item = CacheKey>) -> Vec<String> {
        keys.into_iter()
            .map(|k| format!("{}@{}", self.registry.name(k.variable), k.period))
            .collect()
    }

    /// Runs the state machine for `key` on behalf of `resolver`.
    pub(crate) fn resolve(&self, resolver: &Resolver<'_>, key: CacheKey) -> Result<Array, ComputationError> {
        let parent = resolver.current();
        let mut ledger = self.lock();
        loop {
            if resolver.cancelled() {
                return Err(ComputationError::Cancelled);
            }
            match ledger.slot(&key) {
                Some(Slot::Done(values)) => {
                    let values = Arc::clone(values);
                    if let Some(p) = parent {
                        ledger.link(p, key);
                    }
                    trace!(variable = self.registry.name(key.variable), period = %key.period, "cache hit");
                    return Ok(values);
                }
                Some(Slot::Failed(e)) => {
                    let e = e.clone();
                    if let Some(p) = parent {
                        ledger.link(p, key);
                    }
                    return Err(e);
                }
                Some(Slot::InProgress { owner }) => {
                    let cycle = if *owner == resolver.task {
                        Some(resolver.loop_from(key))
                    } else {
                        // key -> .. -> (a key on our own stack) -> .. -> top of our stack
                        ledger.wait_cycle(resolver.task, key).map(|mut chain| {
                            if let Some(&ours) = chain.last() {
                                chain.extend(resolver.loop_from(ours).into_iter().skip(1));
                            }
                            chain
                        })
                    };
                    if let Some(keys) = cycle {
                        let mut cycle = self.describe(keys);
                        cycle.push(self.describe([key]).remove(0));
                        warn!(cycle = %cycle.join(" -> "), "circular dependency");
                        return Err(ComputationError::CircularDependency { cycle });
                    }
                    ledger.set_waiting(resolver.task, key);
                    ledger = self.ready.wait(ledger).unwrap_or_else(PoisonError::into_inner);
                    ledger.clear_waiting(resolver.task);
                }
                None => break,
            }
        }
        if resolver.depth() >= self.config.max_depth {
            return Err(ComputationError::RecursionLimit {
                variable: self.registry.name(key.variable).to_string(),
                depth: self.config.max_depth,
            });
        }
        ledger.begin(key, resolver.task);
        drop(ledger);

        resolver.stack.borrow_mut().push(key);
        let result = self.compute(resolver, key);
        resolver.stack.borrow_mut().pop();

        let mut ledger = self.lock();
        match &result {
            Err(e) if e.is_transient() => ledger.abandon(key),
            _ => {
                ledger.finish(key, result.clone());
                if let Some(p) = parent {
                    ledger.link(p, key);
                }
            }
        }
        drop(ledger);
        self.ready.notify_all();
        result
    }

    fn compute(&self, resolver: &Resolver<'_>, key: CacheKey) -> Result<Array, ComputationError> {
        if let Some(values) = self.inputs.get(&key) {
            return Ok(Arc::clone(values));
        }
        let def = self.registry.get(key.variable);
        if key.period.granularity() != def.granularity {
            return self.reconcile(resolver, key, def);
        }
        let entity = self.home(key.variable);
        let count = self.entities.count(entity);
        match &def.kind {
            VariableKind::Input { default } => Ok(Arc::new(vec![*default; count])),
            VariableKind::Formula(formula) => {
                self.evaluations.fetch_add(1, Ordering::Relaxed);
                debug!(variable = def.name(), period = %key.period, "evaluating formula");
                let scope = Scope::new(self, resolver, key, entity, def);
                let values = formula.call(&scope, key.period, &self.parameters)?;
                conform(def, count, values, "formula output")
            }
        }
    }

    /// Answers a request whose period granularity differs from the variable's own.
    fn reconcile(&self, resolver: &Resolver<'_>, key: CacheKey, def: &VariableDefinition) -> Result<Array, ComputationError> {
        let mismatch = || ComputationError::GranularityMismatch {
            variable: def.name().to_string(),
            defined: def.granularity,
            requested: key.period,
        };
        let at = |period: Period| {
            self.resolve(resolver, CacheKey::new(key.variable, period))
                .map_err(|e| e.within(def.name(), period))
        };
        let values = match (def.reconciliation, def.granularity) {
            (Reconciliation::Reject, _) => return Err(mismatch()),
            (Reconciliation::HoldConstant, Granularity::Year) => return at(key.period.this_year()),
            (Reconciliation::HoldConstant, Granularity::Month) => return at(key.period.first_month()),
            (Reconciliation::Split, Granularity::Year) => at(key.period.this_year())?.iter().map(|v| v / 12.0).collect(),
            (Reconciliation::Split, Granularity::Month) => {
                let mut total = vec![0.0; self.entities.count(self.home(key.variable))];
                for month in key.period.months() {
                    for (acc, v) in total.iter_mut().zip(at(month)?.iter()) {
                        *acc += v;
                    }
                }
                total
            }
        };
        Ok(Arc::new(values))
    }
}

/// Validates length and value type of an array destined for the cache.
fn conform(def: &VariableDefinition, expected: usize, values: Vec<f64>, context: &str) -> Result<Array, ComputationError> {
    if values.len() != expected {
        return Err(ComputationError::ShapeMismatch {
            context: format!("{context} of '{}'", def.name()),
            expected,
            actual: values.len(),
        });
    }
    let values = match def.value_type {
        crate::store::ValueType::Float => values,
        _ => values
            .into_iter()
            .enumerate()
            .map(|(i, v)| def.coerce(i, v))
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(Arc::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use crate::store::ValueType;
    use rstest::rstest;

    fn people(n: usize) -> Arc<EntityGraph> {
        Arc::new(
            EntityGraph::builder(EntityKind::new("person", "people"), n)
                .group(EntityKind::new("household", "households"), 1, vec![0; n])
                .build()
                .unwrap(),
        )
    }

    fn simulate(reg: VariableRegistry, n: usize) -> Simulation {
        Simulation::new(Arc::new(reg), people(n), Arc::new(ParameterTree::default())).unwrap()
    }

    fn scaled(name: &str, dep: &'static str, factor: f64) -> VariableDefinition {
        VariableDefinition::formula(name, "person", move |scope, period, _| {
            Ok(scope.calc(dep, period)?.iter().map(|v| v * factor).collect())
        })
        .depends_on([dep])
    }

    fn counted(name: &str, counter: Arc<AtomicUsize>) -> VariableDefinition {
        VariableDefinition::formula(name, "person", move |scope, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(scope.filled(7.0))
        })
    }

    const Y: Period = Period::Year(2024);

    #[test]
    fn test_memoized_result_is_shared() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut reg = VariableRegistry::new();
        reg.register(counted("base", counter.clone())).unwrap();
        let sim = simulate(reg, 3);

        let first = sim.calculate("base", Y).unwrap();
        let second = sim.calculate("base", Y).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(sim.evaluations(), 1);
        assert_eq!(sim.status("base", Y).unwrap(), EntryStatus::Done);
        assert_eq!(sim.status("base", Period::Year(2023)).unwrap(), EntryStatus::Uncomputed);
    }

    #[test]
    fn test_cycle_is_reported_not_overflowed() {
        let mut reg = VariableRegistry::new();
        reg.register(scaled("a", "b", 1.0)).unwrap();
        reg.register(scaled("b", "a", 1.0)).unwrap();
        let sim = simulate(reg, 1);

        let err = sim.calculate("a", Y).unwrap_err();
        assert_eq!(
            err.root_cause(),
            &ComputationError::CircularDependency { cycle: vec!["a@2024".into(), "b@2024".into(), "a@2024".into()] }
        );
        assert_eq!(err.chain(), vec!["a@2024".to_string(), "b@2024".into(), "a@2024".into()]);
        // Failed entries replay the same error.
        assert_eq!(sim.calculate("a", Y).unwrap_err(), err);
        assert_eq!(sim.status("b", Y).unwrap(), EntryStatus::Failed);
    }

    #[test]
    fn test_invalidation_only_touches_dependents() {
        let mut reg = VariableRegistry::new();
        reg.register(VariableDefinition::input("wages", "person")).unwrap();
        reg.register(scaled("tax", "wages", 0.1)).unwrap();
        reg.register(VariableDefinition::input("rent", "person")).unwrap();
        reg.register(scaled("housing", "rent", 12.0)).unwrap();
        let mut sim = simulate(reg, 2);
        sim.set_input("wages", Y, vec![100.0, 200.0]).unwrap();
        sim.set_input("rent", Y, vec![10.0, 20.0]).unwrap();

        assert_eq!(*sim.calculate("tax", Y).unwrap(), vec![10.0, 20.0]);
        sim.calculate("housing", Y).unwrap();
        assert_eq!(sim.dependencies_of("tax", Y).unwrap(), vec![("wages".to_string(), Y)]);

        sim.set_input("wages", Y, vec![1000.0, 0.0]).unwrap();
        assert_eq!(sim.status("tax", Y).unwrap(), EntryStatus::Uncomputed);
        assert_eq!(sim.status("housing", Y).unwrap(), EntryStatus::Done);
        assert_eq!(*sim.calculate("tax", Y).unwrap(), vec![100.0, 0.0]);
    }

    #[test]
    fn test_missing_input_takes_default() {
        let mut reg = VariableRegistry::new();
        reg.register(VariableDefinition::input("age", "person").default_value(40.0)).unwrap();
        let mut sim = simulate(reg, 2);
        sim.set_input("age", Y, vec![30.0, 50.0]).unwrap();
        assert_eq!(*sim.calculate("age", Period::Year(2023)).unwrap(), vec![40.0, 40.0]);
        assert_eq!(*sim.calculate("age", Y).unwrap(), vec![30.0, 50.0]);
    }

    #[rstest]
    #[case::split_year_to_month(Granularity::Year, Reconciliation::Split, Period::Month { year: 2024, month: 3 }, 100.0)]
    #[case::hold_year_to_month(Granularity::Year, Reconciliation::HoldConstant, Period::Month { year: 2024, month: 3 }, 1200.0)]
    #[case::split_month_to_year(Granularity::Month, Reconciliation::Split, Y, 1200.0 * 12.0)]
    #[case::hold_month_to_year(Granularity::Month, Reconciliation::HoldConstant, Y, 1200.0)]
    fn test_reconciliation(
        #[case] granularity: Granularity,
        #[case] policy: Reconciliation,
        #[case] requested: Period,
        #[case] expected: f64,
    ) {
        let mut reg = VariableRegistry::new();
        reg.register(
            VariableDefinition::formula("income", "person", |scope, _, _| Ok(scope.filled(1200.0)))
                .granularity(granularity)
                .reconciliation(policy),
        )
        .unwrap();
        let sim = simulate(reg, 1);
        assert_eq!(*sim.calculate("income", requested).unwrap(), vec![expected]);
    }

    #[test]
    fn test_granularity_mismatch_rejected_by_default() {
        let mut reg = VariableRegistry::new();
        reg.register(VariableDefinition::input("rent", "person").granularity(Granularity::Month)).unwrap();
        let sim = simulate(reg, 1);
        let err = sim.calculate("rent", Y).unwrap_err();
        assert!(matches!(err.root_cause(), ComputationError::GranularityMismatch { .. }));
    }

    #[test]
    fn test_output_shape_and_type_checked() {
        let mut reg = VariableRegistry::new();
        reg.register(VariableDefinition::formula("short", "person", |_, _, _| Ok(vec![1.0]))).unwrap();
        reg.register(
            VariableDefinition::formula("flag", "person", |scope, _, _| Ok(scope.filled(3.0))).value_type(ValueType::Bool),
        )
        .unwrap();
        let sim = simulate(reg, 2);

        let err = sim.calculate("short", Y).unwrap_err();
        assert!(matches!(err.root_cause(), ComputationError::ShapeMismatch { expected: 2, actual: 1, .. }));
        assert_eq!(*sim.calculate("flag", Y).unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_set_input_validation() {
        let mut reg = VariableRegistry::new();
        reg.register(VariableDefinition::input("wages", "person")).unwrap();
        reg.register(VariableDefinition::input("status", "household").value_type(ValueType::category(["A", "B"]))).unwrap();
        let mut sim = simulate(reg, 2);

        assert!(matches!(
            sim.set_input("wages", Y, vec![1.0]),
            Err(ComputationError::ShapeMismatch { expected: 2, actual: 1, .. })
        ));
        assert!(matches!(
            sim.set_input("wages", Period::Month { year: 2024, month: 1 }, vec![1.0, 2.0]),
            Err(ComputationError::GranularityMismatch { .. })
        ));
        assert!(matches!(sim.set_input("status", Y, vec![2.0]), Err(ComputationError::InvalidValue { index: 0, .. })));
        assert!(sim.set_input("status", Y, vec![1.0]).is_ok());
    }

    #[test]
    fn test_entity_roles_checked() {
        let mut reg = VariableRegistry::new();
        reg.register(VariableDefinition::input("wages", "person")).unwrap();
        let mut bad = scaled("household_bad", "wages", 1.0);
        bad.entity = "household".into();
        reg.register(bad).unwrap();
        reg.register(
            VariableDefinition::formula("household_total", "household", |scope, period, _| {
                scope.sum(&scope.members("wages", period)?)
            })
            .depends_on(["wages"]),
        )
        .unwrap();
        let mut sim = simulate(reg, 3);
        sim.set_input("wages", Y, vec![1.0, 2.0, 3.0]).unwrap();

        let err = sim.calculate("household_bad", Y).unwrap_err();
        assert!(matches!(err.root_cause(), ComputationError::EntityMismatch { .. }));
        assert_eq!(*sim.calculate("household_total", Y).unwrap(), vec![6.0]);
    }

    #[test]
    fn test_undeclared_read_strict() {
        let mut reg = VariableRegistry::new();
        reg.register(VariableDefinition::input("wages", "person")).unwrap();
        reg.register(VariableDefinition::formula("sneaky", "person", |scope, period, _| {
            Ok(scope.calc("wages", period)?.to_vec())
        }))
        .unwrap();
        let reg = Arc::new(reg);

        let lenient = Simulation::new(reg.clone(), people(1), Arc::new(ParameterTree::default())).unwrap();
        assert!(lenient.calculate("sneaky", Y).is_ok());

        let strict = lenient.fork().with_config(EngineConfig { strict_dependencies: true, ..Default::default() });
        let err = strict.calculate("sneaky", Y).unwrap_err();
        assert!(matches!(err.root_cause(), ComputationError::UndeclaredDependency { .. }));
    }

    #[test]
    fn test_self_lag_and_depth_limit() {
        let mut reg = VariableRegistry::new();
        reg.register(
            VariableDefinition::formula("balance", "person", |scope, period, _| {
                crate::compute::kernel::add(&scope.calc("balance", period.last_year())?, 1.0)
            }),
        )
        .unwrap();
        let mut sim = simulate(reg, 1);
        sim.set_input("balance", Period::Year(2000), vec![0.0]).unwrap();
        assert_eq!(*sim.calculate("balance", Y).unwrap(), vec![24.0]);

        let shallow = sim.fork().with_config(EngineConfig { max_depth: 10, ..Default::default() });
        let err = shallow.calculate("balance", Y).unwrap_err();
        assert!(matches!(err.root_cause(), ComputationError::RecursionLimit { depth: 10, .. }));
    }

    #[test]
    fn test_default_depth_limit_fails_before_the_stack_does() {
        let mut reg = VariableRegistry::new();
        reg.register(VariableDefinition::formula("balance", "person", |scope, period, _| {
            crate::compute::kernel::add(&scope.calc("balance", period.last_year())?, 1.0)
        }))
        .unwrap();
        let mut sim = simulate(reg, 1);
        sim.set_input("balance", Period::Year(1000), vec![0.0]).unwrap();
        let limit = EngineConfig::default().max_depth;

        // A plain 2 MiB thread, as spawned by std and rayon.
        let result = std::thread::scope(|s| {
            std::thread::Builder::new()
                .stack_size(2 << 20)
                .spawn_scoped(s, || sim.calculate("balance", Period::Year(3000)))
                .unwrap()
                .join()
                .unwrap()
        });
        let err = result.unwrap_err();
        assert_eq!(err.root_cause(), &ComputationError::RecursionLimit { variable: "balance".into(), depth: limit });
        assert_eq!(sim.status("balance", Period::Year(3000)).unwrap(), EntryStatus::Uncomputed);
    }

    #[test]
    fn test_depth_failure_is_not_cached() {
        let mut reg = VariableRegistry::new();
        reg.register(VariableDefinition::input("d", "person")).unwrap();
        reg.register(scaled("c", "d", 1.0)).unwrap();
        reg.register(scaled("b", "c", 1.0)).unwrap();
        reg.register(scaled("a", "b", 1.0)).unwrap();
        let mut sim = simulate(reg, 1).with_config(EngineConfig { max_depth: 3, ..Default::default() });
        sim.set_input("d", Y, vec![5.0]).unwrap();

        let err = sim.calculate("a", Y).unwrap_err();
        assert_eq!(err.root_cause(), &ComputationError::RecursionLimit { variable: "d".into(), depth: 3 });
        for name in ["a", "b", "c"] {
            assert_eq!(sim.status(name, Y).unwrap(), EntryStatus::Uncomputed);
        }
        // Reached from a shallower request, the same entries succeed.
        assert_eq!(*sim.calculate("c", Y).unwrap(), vec![5.0]);
        assert_eq!(*sim.calculate("b", Y).unwrap(), vec![5.0]);
    }

    #[test]
    fn test_cycle_across_concurrent_requests() {
        fn slow(name: &str, dep: &'static str) -> VariableDefinition {
            VariableDefinition::formula(name, "person", move |scope, period, _| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(scope.calc(dep, period)?.to_vec())
            })
            .depends_on([dep])
        }
        let mut reg = VariableRegistry::new();
        reg.register(slow("a", "b")).unwrap();
        reg.register(slow("b", "a")).unwrap();
        let reg = Arc::new(reg);

        for _ in 0..10 {
            let sim = Simulation::new(reg.clone(), people(1), Arc::new(ParameterTree::default()))
                .unwrap()
                .with_config(EngineConfig { parallel: true, ..Default::default() });
            let err = sim.calculate_many(&[("a", Y), ("b", Y)]).unwrap_err();
            match err.root_cause() {
                ComputationError::CircularDependency { cycle } => {
                    assert_eq!(cycle.len(), 3);
                    assert_eq!(cycle.first(), cycle.last());
                    assert!(cycle.contains(&"a@2024".to_string()));
                    assert!(cycle.contains(&"b@2024".to_string()));
                }
                other => panic!("expected a circular dependency, got {other:?}"),
            }
            for name in ["a", "b"] {
                assert_ne!(sim.status(name, Y).unwrap(), EntryStatus::InProgress);
            }
        }
    }

    #[test]
    fn test_unrepresentable_periods_rejected() {
        let mut reg = VariableRegistry::new();
        reg.register(VariableDefinition::input("wages", "person")).unwrap();
        let mut sim = simulate(reg, 1);

        let err = sim.calculate("wages", Period::Month { year: 2024, month: 13 }).unwrap_err();
        assert!(matches!(err, ComputationError::InvalidPeriod(_)));
        let err = sim.set_input("wages", Period::Year(i32::MAX), vec![1.0]).unwrap_err();
        assert!(matches!(err, ComputationError::InvalidPeriod(_)));
        assert!(matches!(sim.status("wages", Period::Year(i32::MIN)), Err(ComputationError::InvalidPeriod(_))));
    }

    #[test]
    fn test_parallel_batch_computes_shared_dependency_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut reg = VariableRegistry::new();
        reg.register(counted("base", counter.clone())).unwrap();
        let names: Vec<String> = (0..8).map(|i| format!("derived_{i}")).collect();
        for (i, name) in names.iter().enumerate() {
            reg.register(scaled(name, "base", i as f64)).unwrap();
        }
        let sim = simulate(reg, 4);

        let requests: Vec<(&str, Period)> = names.iter().map(|n| (n.as_str(), Y)).collect();
        let results = sim.calculate_many(&requests).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(*results[3], vec![21.0; 4]);
    }

    #[rstest]
    #[case::parallel(true)]
    #[case::sequential(false)]
    fn test_batch_failure_cancels_and_surfaces_first_error(#[case] parallel: bool) {
        let mut reg = VariableRegistry::new();
        reg.register(VariableDefinition::formula("broken", "person", |scope, _, _| Err(scope.fail("no data")))).unwrap();
        reg.register(VariableDefinition::formula("fine", "person", |scope, _, _| Ok(scope.filled(1.0)))).unwrap();
        let sim = simulate(reg, 1).with_config(EngineConfig { parallel, ..Default::default() });

        let err = sim.calculate_many(&[("broken", Y), ("fine", Y)]).unwrap_err();
        assert_eq!(err.root_cause(), &ComputationError::Formula { variable: "broken".into(), message: "no data".into() });
        assert_ne!(sim.status("fine", Y).unwrap(), EntryStatus::InProgress);
        // The simulation stays usable after the batch.
        assert_eq!(*sim.calculate("fine", Y).unwrap(), vec![1.0]);
    }

    #[test]
    fn test_fork_and_reform() {
        let mut reg = VariableRegistry::new();
        reg.register(VariableDefinition::input("wages", "person")).unwrap();
        reg.register(VariableDefinition::formula("tax", "person", |scope, period, params| {
            let rate = params.get("tax.rate", period)?;
            crate::compute::kernel::mul(rate, &scope.calc("wages", period)?)
        })
        .depends_on(["wages"]))
        .unwrap();

        let baseline_params = ParameterTree::from_json_str(r#"{"tax": {"rate": {"values": {"2000-01-01": 0.1}}}}"#).unwrap();
        let reform_params = ParameterTree::from_json_str(r#"{"tax": {"rate": {"values": {"2000-01-01": 0.2}}}}"#).unwrap();
        let mut baseline = Simulation::new(Arc::new(reg), people(1), Arc::new(baseline_params)).unwrap();
        baseline.set_input("wages", Y, vec![1000.0]).unwrap();
        assert_eq!(*baseline.calculate("tax", Y).unwrap(), vec![100.0]);

        let reform = baseline.with_parameters(Arc::new(reform_params));
        assert_eq!(reform.status("tax", Y).unwrap(), EntryStatus::Uncomputed);
        assert_eq!(*reform.calculate("tax", Y).unwrap(), vec![200.0]);
        assert_eq!(*baseline.calculate("tax", Y).unwrap(), vec![100.0]);
    }

    #[test]
    fn test_unknown_entity_rejected() {
        let mut reg = VariableRegistry::new();
        reg.register(VariableDefinition::input("x", "company")).unwrap();
        let err = Simulation::new(Arc::new(reg), people(1), Arc::new(ParameterTree::default())).err().unwrap();
        assert!(matches!(err, ComputationError::InvalidDefinition { .. }));
    }
}
