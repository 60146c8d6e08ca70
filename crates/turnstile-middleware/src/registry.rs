//! Stage registration and per-path chain resolution.
//!
//! The [`StageRegistry`] holds every [`StageDescriptor`] in one immutable
//! [`RegistrySnapshot`], kept sorted by `(priority, sequence)`. Registration
//! builds a new snapshot and swaps it in under a write lock, so readers
//! resolving chains never see a half-applied registration.
//!
//! # Example
//!
//! ```
//! use turnstile_middleware::{stage_fn, Decision, StageDescriptor, StageRegistry};
//!
//! let registry = StageRegistry::new();
//! registry
//!     .register(
//!         StageDescriptor::builder("audit", stage_fn(|_| Decision::Continue))
//!             .path("/api/**")
//!             .priority(10)
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! assert_eq!(registry.resolve("/api/data").names(), vec!["audit"]);
//! assert!(registry.resolve("/public").is_empty());
//! ```

use crate::predicate::{PathPredicate, PredicateError};
use crate::stage::Stage;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Priority assigned to stages that do not set one.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Errors raised while registering stages.
///
/// All of these are configuration faults and are fatal at startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A stage with this name is already registered.
    #[error("stage `{0}` is already registered")]
    DuplicateName(String),

    /// Two stages would share the same `(priority, sequence)` position.
    #[error("stage `{name}` has the same order ({priority}, {sequence}) as `{existing}`")]
    AmbiguousOrder {
        /// The stage being registered.
        name: String,
        /// The stage already holding that position.
        existing: String,
        /// Shared priority.
        priority: i32,
        /// Shared sequence number.
        sequence: u64,
    },

    /// A path pattern did not parse.
    #[error("stage `{name}`: {source}")]
    InvalidPredicate {
        /// The stage whose pattern was rejected.
        name: String,
        /// Parse failure.
        #[source]
        source: PredicateError,
    },

    /// A stage name was empty.
    #[error("stage name must not be empty")]
    EmptyName,

    /// No sequence number is left after this one.
    #[error("stage `{name}`: sequence {sequence} leaves no room for later stages")]
    SequenceExhausted {
        /// The stage being registered.
        name: String,
        /// The sequence it asked for.
        sequence: u64,
    },
}

/// A registered stage with its activation rules.
#[derive(Clone)]
pub struct StageDescriptor {
    name: String,
    predicate: PathPredicate,
    priority: i32,
    sequence: u64,
    timeout: Option<Duration>,
    stage: Arc<dyn Stage>,
}

impl StageDescriptor {
    /// Starts building a descriptor.
    pub fn builder(name: impl Into<String>, stage: impl Stage) -> StageDescriptorBuilder {
        StageDescriptorBuilder::new(name.into(), Arc::new(stage))
    }

    /// Starts building a descriptor around a shared stage.
    pub fn builder_shared(name: impl Into<String>, stage: Arc<dyn Stage>) -> StageDescriptorBuilder {
        StageDescriptorBuilder::new(name.into(), stage)
    }

    /// Returns the unique stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the path predicate.
    #[must_use]
    pub const fn predicate(&self) -> &PathPredicate {
        &self.predicate
    }

    /// Returns the priority. Lower runs first.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns the registration sequence number.
    ///
    /// Zero until the descriptor is registered.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the per-stage timeout override.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the stage.
    #[must_use]
    pub fn stage(&self) -> &dyn Stage {
        self.stage.as_ref()
    }

    /// Returns `true` if the stage applies to `path`.
    #[must_use]
    pub fn applies_to(&self, path: &str) -> bool {
        self.predicate.matches(path)
    }

    const fn order_key(&self) -> (i32, u64) {
        (self.priority, self.sequence)
    }
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field("predicate", &self.predicate)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`StageDescriptor`].
///
/// Patterns are parsed in [`build`](Self::build), so malformed patterns are
/// reported as [`RegistryError::InvalidPredicate`].
pub struct StageDescriptorBuilder {
    name: String,
    patterns: Vec<String>,
    predicate: Option<PathPredicate>,
    priority: i32,
    timeout: Option<Duration>,
    stage: Arc<dyn Stage>,
}

impl StageDescriptorBuilder {
    fn new(name: String, stage: Arc<dyn Stage>) -> Self {
        Self {
            name,
            patterns: Vec::new(),
            predicate: None,
            priority: DEFAULT_PRIORITY,
            timeout: None,
            stage,
        }
    }

    /// Adds a path pattern. With no patterns the stage applies everywhere.
    #[must_use]
    pub fn path(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// Adds several path patterns.
    #[must_use]
    pub fn paths<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Uses an already-built predicate instead of patterns.
    #[must_use]
    pub fn predicate(mut self, predicate: PathPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Sets the priority. Lower runs first.
    #[must_use]
    pub const fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Overrides the executor's stage timeout for this stage.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the descriptor.
    pub fn build(self) -> Result<StageDescriptor, RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let predicate = match (self.predicate, self.patterns.is_empty()) {
            (Some(predicate), true) => predicate,
            (None, true) => PathPredicate::Any,
            (explicit, false) => {
                let parsed = PathPredicate::parse_all(&self.patterns).map_err(|source| {
                    RegistryError::InvalidPredicate {
                        name: self.name.clone(),
                        source,
                    }
                })?;
                match explicit {
                    Some(PathPredicate::AnyOf(mut inner)) => {
                        inner.push(parsed);
                        PathPredicate::AnyOf(inner)
                    }
                    Some(other) => PathPredicate::AnyOf(vec![other, parsed]),
                    None => parsed,
                }
            }
        };

        Ok(StageDescriptor {
            name: self.name,
            predicate,
            priority: self.priority,
            sequence: 0,
            timeout: self.timeout,
            stage: self.stage,
        })
    }
}

/// An immutable, ordered view of the registry.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    stages: Vec<Arc<StageDescriptor>>,
    next_sequence: u64,
}

impl RegistrySnapshot {
    /// Returns every stage applying to `path`, in execution order.
    #[must_use]
    pub fn resolve(&self, path: &str) -> ResolvedChain {
        ResolvedChain {
            stages: self
                .stages
                .iter()
                .filter(|d| d.applies_to(path))
                .cloned()
                .collect(),
        }
    }

    /// Returns all registered stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Arc<StageDescriptor>] {
        &self.stages
    }

    /// Returns the number of registered stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if no stage is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn with(&self, descriptor: StageDescriptor) -> Result<Self, RegistryError> {
        if self.stages.iter().any(|d| d.name == descriptor.name) {
            return Err(RegistryError::DuplicateName(descriptor.name));
        }
        if let Some(existing) = self
            .stages
            .iter()
            .find(|d| d.order_key() == descriptor.order_key())
        {
            return Err(RegistryError::AmbiguousOrder {
                name: descriptor.name,
                existing: existing.name.clone(),
                priority: descriptor.priority,
                sequence: descriptor.sequence,
            });
        }

        let Some(following) = descriptor.sequence.checked_add(1) else {
            return Err(RegistryError::SequenceExhausted {
                name: descriptor.name,
                sequence: descriptor.sequence,
            });
        };
        let next_sequence = self.next_sequence.max(following);
        let mut stages = self.stages.clone();
        let position = stages.partition_point(|d| d.order_key() < descriptor.order_key());
        stages.insert(position, Arc::new(descriptor));

        Ok(Self {
            stages,
            next_sequence,
        })
    }
}

/// The ordered stages applying to one request.
#[derive(Debug, Clone, Default)]
pub struct ResolvedChain {
    stages: Vec<Arc<StageDescriptor>>,
}

impl ResolvedChain {
    /// Returns the stage names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|d| d.name()).collect()
    }

    /// Iterates the stages in execution order.
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<StageDescriptor>> {
        self.stages.iter()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if no stage applies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl<'a> IntoIterator for &'a ResolvedChain {
    type Item = &'a Arc<StageDescriptor>;
    type IntoIter = std::slice::Iter<'a, Arc<StageDescriptor>>;

    fn into_iter(self) -> Self::IntoIter {
        self.stages.iter()
    }
}

/// The set of registered stages.
///
/// Shared by reference across all in-flight requests.
#[derive(Debug, Default)]
pub struct StageRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    frozen: AtomicBool,
}

impl StageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stage, assigning it the next sequence number.
    pub fn register(&self, mut descriptor: StageDescriptor) -> Result<(), RegistryError> {
        let mut current = self.current.write();
        descriptor.sequence = current.next_sequence;
        self.swap(&mut current, descriptor)
    }

    /// Registers a stage at an explicit sequence number.
    ///
    /// Used when merging stage sets whose relative order was fixed elsewhere.
    /// Fails with [`RegistryError::AmbiguousOrder`] if another stage already
    /// holds the same `(priority, sequence)` position.
    pub fn register_with_sequence(
        &self,
        mut descriptor: StageDescriptor,
        sequence: u64,
    ) -> Result<(), RegistryError> {
        let mut current = self.current.write();
        descriptor.sequence = sequence;
        self.swap(&mut current, descriptor)
    }

    fn swap(
        &self,
        current: &mut Arc<RegistrySnapshot>,
        descriptor: StageDescriptor,
    ) -> Result<(), RegistryError> {
        let name = descriptor.name.clone();
        let (priority, sequence) = descriptor.order_key();
        *current = Arc::new(current.with(descriptor)?);

        if self.frozen.load(Ordering::Acquire) {
            tracing::warn!(stage = %name, priority, sequence, "stage registered while serving");
        } else {
            tracing::debug!(stage = %name, priority, sequence, "stage registered");
        }
        Ok(())
    }

    /// Marks the registry as serving traffic.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Returns `true` once [`freeze`](Self::freeze) has been called.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Returns every stage applying to `path`, sorted by `(priority, sequence)`.
    #[must_use]
    pub fn resolve(&self, path: &str) -> ResolvedChain {
        self.snapshot().resolve(path)
    }

    /// Returns all stage names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.snapshot()
            .stages()
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    /// Returns the number of registered stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns `true` if no stage is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{stage_fn, Decision};

    fn descriptor(name: &str, priority: i32, pattern: &str) -> StageDescriptor {
        StageDescriptor::builder(name, stage_fn(|_| Decision::Continue))
            .path(pattern)
            .priority(priority)
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolve_orders_by_priority_then_sequence() {
        let registry = StageRegistry::new();
        registry.register(descriptor("c", 20, "/**")).unwrap();
        registry.register(descriptor("a", 10, "/**")).unwrap();
        registry.register(descriptor("b", 20, "/**")).unwrap();
        registry.register(descriptor("first", -5, "/**")).unwrap();

        assert_eq!(registry.resolve("/x").names(), vec!["first", "a", "c", "b"]);
        assert_eq!(registry.names(), vec!["first", "a", "c", "b"]);
    }

    #[test]
    fn test_resolve_filters_by_path() {
        let registry = StageRegistry::new();
        registry.register(descriptor("log", 0, "/**")).unwrap();
        registry.register(descriptor("api-key", 10, "/api/**")).unwrap();
        registry.register(descriptor("bearer", 10, "/info")).unwrap();

        assert_eq!(registry.resolve("/api/data").names(), vec!["log", "api-key"]);
        assert_eq!(registry.resolve("/info").names(), vec!["log", "bearer"]);
        assert_eq!(registry.resolve("/public").names(), vec!["log"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = StageRegistry::new();
        registry.register(descriptor("auth", 10, "/**")).unwrap();

        let err = registry.register(descriptor("auth", 20, "/api/**")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(ref n) if n == "auth"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_explicit_sequence_collision_is_ambiguous() {
        let registry = StageRegistry::new();
        registry
            .register_with_sequence(descriptor("a", 10, "/**"), 7)
            .unwrap();

        let err = registry
            .register_with_sequence(descriptor("b", 10, "/**"), 7)
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::AmbiguousOrder { ref existing, priority: 10, sequence: 7, .. } if existing == "a"
        ));

        // Same sequence at another priority is still a total order.
        registry
            .register_with_sequence(descriptor("c", 11, "/**"), 7)
            .unwrap();
        // Automatic numbering continues past explicit sequences.
        registry.register(descriptor("d", 10, "/**")).unwrap();
        assert_eq!(registry.snapshot().stages()[1].sequence(), 8);
        assert_eq!(registry.names(), vec!["a", "d", "c"]);
    }

    #[test]
    fn test_last_sequence_is_rejected() {
        let registry = StageRegistry::new();
        let err = registry
            .register_with_sequence(descriptor("tail", 10, "/**"), u64::MAX)
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::SequenceExhausted { ref name, sequence: u64::MAX } if name == "tail"
        ));
        assert!(registry.is_empty());

        registry
            .register_with_sequence(descriptor("near-tail", 10, "/**"), u64::MAX - 1)
            .unwrap();
        // Automatic numbering has nowhere left to go.
        let err = registry.register(descriptor("late", 10, "/**")).unwrap_err();
        assert!(matches!(err, RegistryError::SequenceExhausted { .. }));
        assert_eq!(registry.names(), vec!["near-tail"]);
    }

    #[test]
    fn test_invalid_predicate() {
        let err = StageDescriptor::builder("broken", stage_fn(|_| Decision::Continue))
            .path("api/**")
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPredicate { ref name, .. } if name == "broken"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = StageDescriptor::builder("  ", stage_fn(|_| Decision::Continue))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::EmptyName));
    }

    #[test]
    fn test_builder_defaults() {
        let d = StageDescriptor::builder("any", stage_fn(|_| Decision::Continue))
            .build()
            .unwrap();
        assert_eq!(d.priority(), DEFAULT_PRIORITY);
        assert_eq!(d.predicate(), &PathPredicate::Any);
        assert!(d.timeout().is_none());
        assert!(d.applies_to("/anything"));
    }

    #[test]
    fn test_snapshot_is_stable_across_registration() {
        let registry = StageRegistry::new();
        registry.register(descriptor("a", 10, "/**")).unwrap();

        let before = registry.snapshot();
        registry.register(descriptor("b", 5, "/**")).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn test_freeze() {
        let registry = StageRegistry::new();
        assert!(!registry.is_frozen());
        registry.freeze();
        assert!(registry.is_frozen());
        // Late registration still lands.
        registry.register(descriptor("late", 10, "/**")).unwrap();
        assert_eq!(registry.len(), 1);
    }
}
