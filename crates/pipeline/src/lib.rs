//! kube-events pipeline: fan-in of watch streams and the predicate chain that
//! decides which notifications are worth classifying.

#![forbid(unsafe_code)]

use std::sync::Arc;

use kevents_rules::ClassificationRuleSet;

pub mod dedup;
pub mod filter;
pub mod merge;
pub mod predicates;

pub use dedup::GenerationFilter;
pub use filter::{predicate, FilterPipeline, FnPredicate, Predicate};
pub use merge::merge;
pub use predicates::{parse_quantity, ErrorFilter, EventFilter, ParsedQuantity, PvcFilter, ResourceQuotaFilter};

/// The standard chain. Kind-specific predicates pass foreign kinds untouched;
/// the generation filter runs last so only otherwise-accepted Deployments
/// advance the stored generation.
pub fn standard_predicates(
    rules: Arc<ClassificationRuleSet>,
    permit_errors: bool,
    generations: Arc<GenerationFilter>,
) -> Vec<Box<dyn Predicate>> {
    vec![
        Box::new(ErrorFilter { permit_errors }),
        Box::new(ResourceQuotaFilter),
        Box::new(PvcFilter),
        Box::new(EventFilter::new(rules)),
        Box::new(generations),
    ]
}
