//! Knowledge bases: compiled rules shared by many sessions.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use reticle_foundation::{Result, Value, ValueKind};
use reticle_memory::{FieldId, LogicalTypeId, TypeRegistry};

use crate::condition::{ClosureCompiler, ExpressionCompiler};
use crate::config::EngineConfig;
use crate::coordinator::ExecutionCoordinator;
use crate::network::Network;
use crate::rule::RuleDefinition;
use crate::session::Session;

/// Collects types, rules and configuration, then compiles them.
///
/// ```
/// use std::sync::Arc;
/// use reticle_engine::{KnowledgeBuilder, RuleDefinition, field};
/// use reticle_foundation::{Value, ValueKind};
///
/// struct Player { secret: i64 }
///
/// let mut builder = KnowledgeBuilder::new();
/// builder.declare_type("Player");
/// builder
///     .declare_typed_field("Player", "secret", ValueKind::Numeric, |p: &Player| {
///         Value::Int(p.secret)
///     })
///     .unwrap();
/// builder.add_rule(
///     RuleDefinition::new("lucky")
///         .for_each("$p", "Player")
///         .when(field("$p.secret").equals(7)),
/// );
///
/// let kb = builder.build().unwrap();
/// let mut session = kb.new_session();
/// session.insert("Player", Arc::new(Player { secret: 7 })).unwrap();
/// assert_eq!(session.activation_count(), 1);
/// ```
pub struct KnowledgeBuilder {
    registry: TypeRegistry,
    rules: Vec<RuleDefinition>,
    config: EngineConfig,
    compiler: Arc<dyn ExpressionCompiler>,
}

impl Default for KnowledgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeBuilder {
    /// Creates an empty builder using the closure compiler and default config.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: TypeRegistry::new(),
            rules: Vec::new(),
            config: EngineConfig::default(),
            compiler: Arc::new(ClosureCompiler),
        }
    }

    /// Declares a logical type.
    pub fn declare_type(&mut self, name: &str) -> LogicalTypeId {
        self.registry.declare_type(name)
    }

    /// Declares a field over any payload.
    ///
    /// # Errors
    /// Same as [`TypeRegistry::declare_field`].
    pub fn declare_field<F>(
        &mut self,
        type_name: &str,
        field: &str,
        kind: ValueKind,
        extractor: F,
    ) -> Result<FieldId>
    where
        F: Fn(&(dyn Any + Send + Sync)) -> Value + Send + Sync + 'static,
    {
        self.registry.declare_field(type_name, field, kind, extractor)
    }

    /// Declares a field over a concrete payload type.
    ///
    /// # Errors
    /// Same as [`TypeRegistry::declare_field`].
    pub fn declare_typed_field<T, F>(
        &mut self,
        type_name: &str,
        field: &str,
        kind: ValueKind,
        extractor: F,
    ) -> Result<FieldId>
    where
        T: Any,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        self.registry
            .declare_typed_field(type_name, field, kind, extractor)
    }

    /// Direct access to the registry being built.
    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    /// Adds a rule.
    pub fn add_rule(&mut self, rule: RuleDefinition) -> &mut Self {
        self.rules.push(rule);
        self
    }

    /// Builder method to add a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: RuleDefinition) -> Self {
        self.rules.push(rule);
        self
    }

    /// Builder method to set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder method to replace the expression compiler.
    #[must_use]
    pub fn with_compiler(mut self, compiler: Arc<dyn ExpressionCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Compiles the rules into a knowledge base.
    ///
    /// # Errors
    /// Returns the first rule compilation error, or an error if the worker
    /// pool cannot be started.
    pub fn build(&self) -> Result<KnowledgeBase> {
        let network = Network::compile(&self.registry, &self.rules, self.compiler.as_ref())?;
        let coordinator = ExecutionCoordinator::new(&self.config)?;
        debug!(
            rules = network.rules().len(),
            alpha_nodes = network.alpha_count(),
            workers = coordinator.workers(),
            "knowledge base built"
        );
        Ok(KnowledgeBase {
            network: Arc::new(network),
            registry: self.registry.clone(),
            config: Arc::new(self.config.clone()),
            coordinator: Arc::new(coordinator),
            compiler: Arc::clone(&self.compiler),
        })
    }
}

impl fmt::Debug for KnowledgeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeBuilder")
            .field("types", &self.registry.len())
            .field("rules", &self.rules)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// An immutable, compiled rule set.
///
/// Cloning is cheap. Sessions created from it share the network, registry
/// and worker pool, and may run concurrently on different threads.
#[derive(Clone)]
pub struct KnowledgeBase {
    network: Arc<Network>,
    registry: TypeRegistry,
    config: Arc<EngineConfig>,
    coordinator: Arc<ExecutionCoordinator>,
    compiler: Arc<dyn ExpressionCompiler>,
}

impl KnowledgeBase {
    /// Creates an empty session.
    #[must_use]
    pub fn new_session(&self) -> Session {
        Session::new(
            Arc::clone(&self.network),
            self.registry.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.compiler),
        )
    }

    /// Names of the compiled rules, in definition order.
    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.network.rules().iter().map(|r| r.name())
    }

    /// The compiled network.
    #[must_use]
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// The registry the rules were compiled against.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// The frozen configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("rules", &self.network.rules().len())
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}
