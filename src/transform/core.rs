//! Core transformation loop
//!
//! [`RuleBasedGraphTransformer`] walks the graph in topological order and
//! offers every node to each registered [`RewriteRule`], repeating whole
//! passes until nothing changes.

use crate::error::OnnxResult;
use crate::graph::query::{for_all_mutable_subgraphs, is_supported_provider};
use crate::graph::{Graph, NodeIndex};
use crate::proto::ModelProto;
use crate::traits::RewriteRule;

/// Transform configuration
#[derive(Debug, Clone)]
pub struct TransformConfig {
    /// Maximum passes to prevent infinite loops
    pub max_iterations: usize,
    /// Whether to log and skip rule errors instead of aborting
    pub continue_on_error: bool,
    /// Whether to drop unreferenced initializers after the last pass
    pub cleanup_unused_initializers: bool,
    /// Whether to rewrite nested subgraphs too
    pub recurse_into_subgraphs: bool,
    /// Execution providers whose nodes may be rewritten; empty means all
    pub compatible_providers: Vec<String>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            continue_on_error: false,
            cleanup_unused_initializers: true,
            recurse_into_subgraphs: true,
            compatible_providers: Vec::new(),
        }
    }
}

impl TransformConfig {
    /// Set the pass limit
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set whether rule errors are skipped
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Set whether unused initializers are dropped
    pub fn with_cleanup_unused_initializers(mut self, cleanup: bool) -> Self {
        self.cleanup_unused_initializers = cleanup;
        self
    }

    /// Set whether subgraphs are rewritten
    pub fn with_recurse_into_subgraphs(mut self, recurse: bool) -> Self {
        self.recurse_into_subgraphs = recurse;
        self
    }

    /// Restrict rewriting to nodes assigned to these providers
    pub fn with_compatible_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compatible_providers = providers.into_iter().map(Into::into).collect();
        self
    }
}

/// Statistics from a transform run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransformStats {
    /// Number of passes performed
    pub iterations: usize,
    /// Number of rule applications that changed the graph
    pub rules_applied: usize,
    /// Number of nodes removed
    pub nodes_removed: usize,
    /// Number of initializers dropped by cleanup
    pub initializers_removed: usize,
    /// Number of rule errors skipped under `continue_on_error`
    pub errors_skipped: usize,
}

/// Rule-driven graph rewriter
pub struct RuleBasedGraphTransformer {
    name: String,
    rules: Vec<Box<dyn RewriteRule>>,
    config: TransformConfig,
}

impl RuleBasedGraphTransformer {
    /// Create a transformer with no rules and the default configuration
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rules: Vec::new(),
            config: TransformConfig::default(),
        }
    }

    /// Configure the transformer
    pub fn with_config(mut self, config: TransformConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a rule
    pub fn with_rule<R: RewriteRule + 'static>(mut self, rule: R) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Register a boxed rule
    pub fn register(&mut self, rule: Box<dyn RewriteRule>) {
        self.rules.push(rule);
    }

    /// Transformer name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration
    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Names of registered rules, in registration order
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Rewrite a graph until no rule applies or the pass limit is reached
    #[tracing::instrument(skip_all, fields(transformer = %self.name))]
    pub fn apply(&self, graph: &mut Graph) -> OnnxResult<TransformStats> {
        let mut stats = TransformStats::default();

        while stats.iterations < self.config.max_iterations {
            stats.iterations += 1;
            let modified = self.apply_pass(graph, &mut stats)?;
            tracing::debug!(
                iteration = stats.iterations,
                modified,
                nodes = graph.node_count(),
                "pass finished"
            );
            if !modified {
                break;
            }
        }

        if self.config.cleanup_unused_initializers {
            stats.initializers_removed += graph.remove_unused_initializers();
            if self.config.recurse_into_subgraphs {
                for_all_mutable_subgraphs(graph, &mut |subgraph: &mut Graph| {
                    stats.initializers_removed += subgraph.remove_unused_initializers();
                    Ok(())
                })?;
            }
        }

        tracing::debug!(
            iterations = stats.iterations,
            rules_applied = stats.rules_applied,
            nodes_removed = stats.nodes_removed,
            "transform finished"
        );
        Ok(stats)
    }

    /// Rewrite the main graph of a model, returning the updated model
    pub fn apply_to_model(&self, model: &ModelProto) -> OnnxResult<(ModelProto, TransformStats)> {
        let mut graph = Graph::from_model(model)?;
        let stats = self.apply(&mut graph)?;
        Ok((graph.to_model(model), stats))
    }

    /// One pass over every subgraph and then the graph itself
    fn apply_pass(&self, graph: &mut Graph, stats: &mut TransformStats) -> OnnxResult<bool> {
        let mut modified = false;

        if self.config.recurse_into_subgraphs {
            for_all_mutable_subgraphs(graph, &mut |subgraph: &mut Graph| {
                modified |= self.apply_rules(subgraph, stats)?;
                Ok(())
            })?;
        }
        modified |= self.apply_rules(graph, stats)?;

        Ok(modified)
    }

    /// Offer every node of one graph to every rule, in topological order
    fn apply_rules(&self, graph: &mut Graph, stats: &mut TransformStats) -> OnnxResult<bool> {
        let mut modified = false;

        for index in graph.topological_order() {
            for rule in &self.rules {
                if !self.accepts(graph, index, rule.as_ref()) {
                    continue;
                }
                if !rule.satisfy_condition(graph, index) {
                    tracing::trace!(rule = rule.name(), node = %index, "condition not met");
                    continue;
                }

                let before = graph.node_count();
                match rule.apply(graph, index) {
                    Ok(effect) => {
                        if effect.modified() {
                            modified = true;
                            stats.rules_applied += 1;
                            stats.nodes_removed += before.saturating_sub(graph.node_count());
                            tracing::debug!(rule = rule.name(), node = %index, ?effect, "rule applied");
                        }
                        if effect.deleted() {
                            break;
                        }
                    }
                    Err(e) if self.config.continue_on_error => {
                        stats.errors_skipped += 1;
                        tracing::warn!(rule = rule.name(), node = %index, error = %e, "rule failed, skipping");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(modified)
    }

    /// Node is live, assigned to a compatible provider and targeted by the rule
    fn accepts(&self, graph: &Graph, index: NodeIndex, rule: &dyn RewriteRule) -> bool {
        let Some(node) = graph.node(index) else {
            return false;
        };
        let targets = rule.target_op_types();
        (targets.is_empty() || targets.iter().any(|t| *t == node.op_type()))
            && is_supported_provider(node, &self.config.compatible_providers)
    }
}

impl std::fmt::Debug for RuleBasedGraphTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleBasedGraphTransformer")
            .field("name", &self.name)
            .field("rules", &self.rule_names())
            .field("config", &self.config)
            .finish()
    }
}
