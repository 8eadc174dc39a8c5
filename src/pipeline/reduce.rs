//! Reduce stage: level-by-level tree merging of chunk summaries.
//!
//! Level 0 holds the chunk summaries in index order. While the concatenation of a level
//! exceeds the context budget, its nodes are packed greedily into order-preserving groups of
//! at most `group_size` nodes (and, when possible, within the budget); each group is merged by
//! one model call and the merged nodes form the next level. Groups of a level are merged
//! concurrently; levels run strictly in sequence.

use crate::completion::CompletionPurpose;
use crate::config::ReduceConfig;
use crate::processing::TokenEstimator;
use futures_util::{StreamExt, TryStreamExt, stream};

use super::error::{PipelineError, ServiceError};
use super::events::EventSink;
use super::prompts::build_merge_prompt;
use super::services::Completer;
use super::types::{ChunkSummary, DocumentSummary};

const SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone)]
struct ReduceNode {
    text: String,
    provenance: Vec<usize>,
    tokens: usize,
}

/// Merges ordered chunk summaries into one [`DocumentSummary`].
pub struct ReduceMerger {
    completer: Completer,
    tokens: TokenEstimator,
    config: ReduceConfig,
    max_in_flight: usize,
}

impl ReduceMerger {
    /// Build a merger for the given budget and grouping parameters.
    pub fn new(
        completer: Completer,
        tokens: TokenEstimator,
        config: ReduceConfig,
        max_in_flight: usize,
    ) -> Self {
        Self {
            completer,
            tokens,
            config,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Reduce `summaries` (any order; sorted by chunk index first).
    ///
    /// When the concatenation already fits the budget it is returned without a model call.
    pub async fn reduce(
        &self,
        summaries: &[ChunkSummary],
        events: &EventSink,
    ) -> Result<DocumentSummary, PipelineError> {
        if summaries.is_empty() {
            return Err(PipelineError::SummarizationFailed {
                skipped: 0,
                total: 0,
            });
        }

        let mut ordered: Vec<&ChunkSummary> = summaries.iter().collect();
        ordered.sort_by_key(|summary| summary.index);
        let mut level: Vec<ReduceNode> = ordered
            .into_iter()
            .map(|summary| ReduceNode {
                text: summary.text.clone(),
                provenance: vec![summary.index],
                tokens: summary.token_estimate,
            })
            .collect();
        let mut tree_shape = vec![level.len()];

        loop {
            let joined = join_texts(&level);
            let joined_tokens = self.tokens.estimate(&joined);
            if joined_tokens <= self.config.context_budget {
                let mut provenance: Vec<usize> = level
                    .into_iter()
                    .flat_map(|node| node.provenance)
                    .collect();
                provenance.sort_unstable();
                tracing::info!(
                    levels = tree_shape.len() - 1,
                    tokens = joined_tokens,
                    chunks = provenance.len(),
                    "Reduce stage finished"
                );
                return Ok(DocumentSummary {
                    text: joined,
                    provenance,
                    tree_shape,
                    token_estimate: joined_tokens,
                });
            }

            let depth = tree_shape.len();
            if depth > self.config.max_levels {
                return Err(PipelineError::ReduceDidNotConverge {
                    levels: self.config.max_levels,
                });
            }
            if events.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let groups = group_nodes(level, self.config.group_size, self.config.context_budget);
            tracing::info!(
                level = depth,
                nodes = tree_shape[depth - 1],
                groups = groups.len(),
                tokens = joined_tokens,
                budget = self.config.context_budget,
                "Merging reduce level"
            );

            level = stream::iter(groups)
                .map(|group| self.merge_group(group))
                .buffered(self.max_in_flight)
                .map_err(|source| PipelineError::Reduce {
                    level: depth,
                    source,
                })
                .try_collect()
                .await?;
            tree_shape.push(level.len());
        }
    }

    async fn merge_group(&self, group: Vec<ReduceNode>) -> Result<ReduceNode, ServiceError> {
        let parts: Vec<&str> = group.iter().map(|node| node.text.as_str()).collect();
        let text = self
            .completer
            .complete(CompletionPurpose::Merge, build_merge_prompt(&parts))
            .await?;
        let provenance = group.into_iter().flat_map(|node| node.provenance).collect();
        Ok(ReduceNode {
            tokens: self.tokens.estimate(&text),
            text,
            provenance,
        })
    }
}

fn join_texts(nodes: &[ReduceNode]) -> String {
    nodes
        .iter()
        .map(|node| node.text.as_str())
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

/// Pack nodes into consecutive groups of at most `group_size`, starting a new group when the
/// next node would push the group over `budget`.
fn group_nodes(nodes: Vec<ReduceNode>, group_size: usize, budget: usize) -> Vec<Vec<ReduceNode>> {
    let mut groups = Vec::new();
    let mut current: Vec<ReduceNode> = Vec::new();
    let mut current_tokens = 0usize;

    for node in nodes {
        let over_budget = !current.is_empty() && current_tokens + node.tokens > budget;
        if current.len() >= group_size || over_budget {
            groups.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += node.tokens;
        current.push(node);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}
