//! Work References
//!
//! A [`Work`] is a named callable together with an explicit declaration of
//! what the engine must hand it: the step identity, the pipeline's global
//! state, and/or a read-only view of the pipeline itself. The engine injects
//! exactly what was declared and nothing else.
//!
//! Works are registered by name in a [`WorkRegistry`] so that checkpoints
//! and YAML definitions can refer to them without serializing code.

use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::execution::shell::SHELL_WORK;

/// Boxed error a work may return to signal a fault.
pub type WorkError = Box<dyn Error + Send + Sync>;

/// Return type of every work: a JSON value, normally `{"status": ..., ...}`.
pub type WorkResult = Result<Value, WorkError>;

type WorkFn = dyn Fn(&mut StepContext<'_>) -> WorkResult + Send + Sync;
type InitFn = dyn Fn() + Send + Sync;

/// Capabilities a work declares at registration time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Needs {
    /// Receive the identity of the step being executed
    pub step_id: bool,
    /// Receive the pipeline's global state
    pub globals: bool,
    /// Receive a read-only view of the pipeline (sequential steps only)
    pub pipeline: bool,
}

/// A named, shareable callable executed by a step.
#[derive(Clone)]
pub struct Work {
    name: String,
    needs: Needs,
    func: Arc<WorkFn>,
}

impl Work {
    /// Creates a work that needs nothing beyond its keyword arguments.
    ///
    /// # Example
    ///
    /// ```
    /// use serde_json::json;
    /// use stepwise::workflow::Work;
    ///
    /// let work = Work::new("count", |ctx| {
    ///     let n = ctx.arg("n").and_then(|v| v.as_u64()).unwrap_or(0);
    ///     Ok(json!({"status": "success", "n": n}))
    /// })
    /// .needs_step_id();
    ///
    /// assert_eq!(work.name(), "count");
    /// assert!(work.needs().step_id);
    /// ```
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut StepContext<'_>) -> WorkResult + Send + Sync + 'static,
    {
        Self {
            name: name.into().trim().to_string(),
            needs: Needs::default(),
            func: Arc::new(func),
        }
    }

    pub fn needs_step_id(mut self) -> Self {
        self.needs.step_id = true;
        self
    }

    pub fn needs_globals(mut self) -> Self {
        self.needs.globals = true;
        self
    }

    /// Declares that the work reads the pipeline handle. Such works cannot
    /// be placed in a concurrent group.
    pub fn needs_pipeline(mut self) -> Self {
        self.needs.pipeline = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn needs(&self) -> Needs {
        self.needs
    }

    pub(crate) fn call(&self, ctx: &mut StepContext<'_>) -> WorkResult {
        (self.func)(ctx)
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work")
            .field("name", &self.name)
            .field("needs", &self.needs)
            .finish()
    }
}

/// Hook run once on each worker thread of a concurrent group.
#[derive(Clone)]
pub struct Initializer {
    name: String,
    func: Arc<InitFn>,
}

impl Initializer {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn call(&self) {
        (self.func)()
    }
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Initializer").field(&self.name).finish()
    }
}

/// Pipeline-wide variables shared between steps.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct GlobalState {
    vars: BTreeMap<String, Value>,
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Sets a variable, returning its previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.vars.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl From<BTreeMap<String, Value>> for GlobalState {
    fn from(vars: BTreeMap<String, Value>) -> Self {
        Self { vars }
    }
}

/// Access a step has to the global state.
///
/// Sequential steps get the live state; steps inside a concurrent group get
/// a shared snapshot they cannot modify.
#[derive(Debug)]
pub enum Globals<'a> {
    Live(&'a mut GlobalState),
    Snapshot(&'a GlobalState),
}

/// Read-only view of the pipeline handed to sequential steps.
#[derive(Debug, Clone, Copy)]
pub struct PipelineInfo<'a> {
    pub name: &'a str,
    pub paths: &'a BTreeMap<String, PathBuf>,
    pub run_step_idx: usize,
}

impl<'a> PipelineInfo<'a> {
    pub fn path(&self, name: &str) -> Option<&'a Path> {
        self.paths.get(name).map(PathBuf::as_path)
    }
}

/// Arguments resolved for one execution of a work.
#[derive(Debug)]
pub struct StepContext<'a> {
    kwargs: &'a Map<String, Value>,
    step_id: Option<&'a str>,
    globals: Option<Globals<'a>>,
    pipeline: Option<PipelineInfo<'a>>,
}

impl<'a> StepContext<'a> {
    /// Builds a context holding only what `needs` declares.
    pub(crate) fn new(
        needs: Needs,
        kwargs: &'a Map<String, Value>,
        step_id: Option<&'a str>,
        globals: Globals<'a>,
        pipeline: Option<PipelineInfo<'a>>,
    ) -> Self {
        Self {
            kwargs,
            step_id: step_id.filter(|_| needs.step_id),
            globals: needs.globals.then_some(globals),
            pipeline: pipeline.filter(|_| needs.pipeline),
        }
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        self.kwargs
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    pub fn step_id(&self) -> Option<&str> {
        self.step_id
    }

    pub fn globals(&self) -> Option<&GlobalState> {
        match &self.globals {
            Some(Globals::Live(state)) => Some(&**state),
            Some(Globals::Snapshot(state)) => Some(*state),
            None => None,
        }
    }

    /// Mutable global state; `None` inside a concurrent group.
    pub fn globals_mut(&mut self) -> Option<&mut GlobalState> {
        match &mut self.globals {
            Some(Globals::Live(state)) => Some(&mut **state),
            _ => None,
        }
    }

    pub fn pipeline(&self) -> Option<&PipelineInfo<'a>> {
        self.pipeline.as_ref()
    }
}

/// Name-indexed collection of works and group initializers.
#[derive(Debug, Clone, Default)]
pub struct WorkRegistry {
    works: HashMap<String, Work>,
    initializers: HashMap<String, Initializer>,
}

impl WorkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in `shell` work.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(SHELL_WORK.clone());
        registry
    }

    /// Registers a work, returning the one previously stored under its name.
    pub fn register(&mut self, work: Work) -> Option<Work> {
        self.works.insert(work.name().to_string(), work)
    }

    pub fn register_initializer(&mut self, initializer: Initializer) -> Option<Initializer> {
        self.initializers
            .insert(initializer.name().to_string(), initializer)
    }

    pub fn get(&self, name: &str) -> Option<&Work> {
        self.works.get(name)
    }

    pub fn initializer(&self, name: &str) -> Option<&Initializer> {
        self.initializers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.works.contains_key(name)
    }

    /// Registered work names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.works.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> Work {
        Work::new("noop", |_| Ok(json!({"status": "success"})))
    }

    #[test]
    fn test_work_declares_nothing_by_default() {
        let work = noop();
        assert_eq!(work.needs(), Needs::default());
    }

    #[test]
    fn test_work_needs_builders() {
        let work = noop().needs_step_id().needs_globals().needs_pipeline();
        let needs = work.needs();
        assert!(needs.step_id && needs.globals && needs.pipeline);
    }

    #[test]
    fn test_context_injects_only_declared_capabilities() {
        let kwargs = Map::new();
        let mut state = GlobalState::new();
        let paths = BTreeMap::new();
        let info = PipelineInfo {
            name: "p",
            paths: &paths,
            run_step_idx: 0,
        };

        let ctx = StepContext::new(
            Needs::default(),
            &kwargs,
            Some("7"),
            Globals::Live(&mut state),
            Some(info),
        );

        assert!(ctx.step_id().is_none());
        assert!(ctx.globals().is_none());
        assert!(ctx.pipeline().is_none());
    }

    #[test]
    fn test_live_globals_are_writable() {
        let kwargs = Map::new();
        let mut state = GlobalState::new();
        {
            let needs = Needs {
                globals: true,
                ..Needs::default()
            };
            let mut ctx = StepContext::new(needs, &kwargs, None, Globals::Live(&mut state), None);
            ctx.globals_mut().unwrap().set("seen", true);
        }
        assert_eq!(state.get("seen"), Some(&json!(true)));
    }

    #[test]
    fn test_snapshot_globals_are_read_only() {
        let kwargs = Map::new();
        let mut state = GlobalState::new();
        state.set("x", 1);

        let needs = Needs {
            globals: true,
            ..Needs::default()
        };
        let mut ctx = StepContext::new(needs, &kwargs, None, Globals::Snapshot(&state), None);

        assert_eq!(ctx.globals().unwrap().get("x"), Some(&json!(1)));
        assert!(ctx.globals_mut().is_none());
    }

    #[test]
    fn test_registry_builtins_include_shell() {
        let registry = WorkRegistry::with_builtins();
        assert!(registry.contains("shell"));
        assert_eq!(registry.names(), vec!["shell"]);
    }

    #[test]
    fn test_registry_replaces_by_name() {
        let mut registry = WorkRegistry::new();
        assert!(registry.register(noop()).is_none());
        assert!(registry.register(noop()).is_some());
        assert!(registry.get("noop").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_global_state_roundtrip() {
        let mut state = GlobalState::new();
        state.set("a", 1);
        state.set("b", "two");

        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"a":1,"b":"two"}"#);

        let loaded: GlobalState = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.len(), 2);
    }
}
