//! Selection of the chain to summarize next.

use std::collections::BTreeSet;

use log::debug;

use crate::abstraction::finder::{self, Chain};
use crate::abstraction::template::{self, NodeComparison, NodeTemplate};
use crate::error::Result;
use crate::options::AbstractionThresholds;
use crate::path::MemoryPath;
use crate::state::SmgState;

/// A chain that is long enough to be summarized, with its folded template.
#[derive(Debug, Clone)]
pub struct AbstractionCandidate {
    pub chain: Chain,
    pub template: NodeTemplate,
}

impl AbstractionCandidate {
    pub fn length(&self) -> usize {
        self.chain.len()
    }
}

/// The minimum chain length for nodes that compare as `comparison`.
pub fn threshold(thresholds: &AbstractionThresholds, comparison: NodeComparison) -> usize {
    match comparison {
        NodeComparison::Equal => thresholds.equality,
        NodeComparison::Entailed => thresholds.entailment,
        NodeComparison::Incomparable => thresholds.incomparable,
    }
}

/// The longest chain that can be summarized.
///
/// Chains starting at an object whose memory path is in `blocked` are
/// skipped. Ties are broken by the smaller start object.
pub fn best_candidate(state: &SmgState, blocked: &BTreeSet<MemoryPath>) -> Result<Option<AbstractionCandidate>> {
    let thresholds = state.context().options().thresholds;
    let paths = if blocked.is_empty() {
        Default::default()
    } else {
        state.memory().object_paths()
    };

    let mut best: Option<AbstractionCandidate> = None;
    for chain in finder::find_chains(state)? {
        state.context().check_shutdown()?;
        if paths.get(&chain.first()).is_some_and(|path| blocked.contains(path)) {
            debug!("best_candidate: chain at {} is blocked", chain.first());
            continue;
        }
        let Some(template) = template::fold_chain(state, &chain) else {
            continue;
        };
        let required = threshold(&thresholds, template.comparison);
        if chain.len() < required {
            debug!(
                "best_candidate: chain at {} too short ({} < {})",
                chain.first(),
                chain.len(),
                required
            );
            continue;
        }
        let better = match &best {
            None => true,
            Some(current) => {
                chain.len() > current.length()
                    || (chain.len() == current.length() && chain.first() < current.chain.first())
            }
        };
        if better {
            best = Some(AbstractionCandidate { chain, template });
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_threshold_selection() {
        let t = AbstractionThresholds::default();
        assert_eq!(threshold(&t, NodeComparison::Equal), 2);
        assert_eq!(threshold(&t, NodeComparison::Entailed), 2);
        assert_eq!(threshold(&t, NodeComparison::Incomparable), 3);
    }
}
