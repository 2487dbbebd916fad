//! Named algorithm providers: which predicates and priorities a scheduler
//! runs with.

use std::sync::Arc;

use crate::predicates::{
    FitPredicate, MatchNodeSelector, NoDiskConflict, NodeLabelPresence, PodFitsHost, PodFitsPorts,
    PodFitsResources,
};
use crate::priorities::{Equal, LeastRequested, PriorityConfig, ServiceAffinity, Spreading};

pub const DEFAULT_PROVIDER: &str = "default";

/// Label keys a deployment requires on (or bans from) every candidate
/// node, layered onto whichever provider is selected.
#[derive(Clone, Debug, Default)]
pub struct NodeLabelConfig {
    pub labels: Vec<String>,
    pub presence: bool,
}

pub fn default_predicates() -> Vec<Arc<dyn FitPredicate>> {
    vec![
        Arc::new(PodFitsPorts),
        Arc::new(PodFitsResources),
        Arc::new(NoDiskConflict),
        Arc::new(MatchNodeSelector),
        Arc::new(PodFitsHost),
    ]
}

pub fn default_priorities() -> Vec<PriorityConfig> {
    vec![
        PriorityConfig {
            function: Arc::new(LeastRequested),
            weight: 1,
        },
        PriorityConfig {
            function: Arc::new(Spreading),
            weight: 1,
        },
    ]
}

/// The active set for a named provider, or `None` for an unknown name.
/// A non-empty `node_labels` configuration appends the label-presence
/// predicate to the selected set.
pub fn provider(
    name: &str,
    node_labels: Option<NodeLabelConfig>,
) -> Option<(Vec<Arc<dyn FitPredicate>>, Vec<PriorityConfig>)> {
    let (mut predicates, priorities) = match name {
        DEFAULT_PROVIDER => (default_predicates(), default_priorities()),
        "affinity" => {
            let mut priorities = default_priorities();
            priorities.push(PriorityConfig {
                function: Arc::new(ServiceAffinity::new(Vec::new())),
                weight: 2,
            });
            (default_predicates(), priorities)
        }
        "baseline" => (
            default_predicates(),
            vec![PriorityConfig {
                function: Arc::new(Equal),
                weight: 1,
            }],
        ),
        _ => return None,
    };

    if let Some(config) = node_labels.filter(|c| !c.labels.is_empty()) {
        predicates.push(Arc::new(NodeLabelPresence::new(
            config.labels,
            config.presence,
        )));
    }
    Some((predicates, priorities))
}
