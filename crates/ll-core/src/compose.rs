//! Budget-aware context composition.
//!
//! Three layers compete for one token budget: persistent project memory,
//! recent session history, and on-demand entity retrieval. Each layer gets
//! an independent fraction of the budget and reports its own accounting
//! (budget, spend, truncation) so a downstream consumer can see exactly why
//! the payload looks the way it does. Over-budget input truncates; it never
//! fails the request.
//!
//! Token costs use the character-per-token proxy from [`crate::tokens`].

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use serde::Serialize;

use crate::scope::{ContextScope, OutputFormat};
use crate::tokens::{clip_to_budget, estimate_tokens};

/// Boxed error for the source contracts; storage backends surface their own
/// error types through it.
pub type SourceError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// How many turns to pull from a history source before budgeting.
const HISTORY_FETCH_CAP: usize = 256;

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9][A-Za-z0-9_\-]*)").unwrap());

/// One interaction turn from session history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
    pub ts_ms: i64,
}

/// Recent interaction history, newest first.
pub trait HistorySource {
    fn recent_turns(&self, limit: usize) -> Result<Vec<HistoryTurn>, SourceError>;
}

/// Persistent always-on facts and decisions: global entries plus entries
/// matching the scope.
pub trait MemorySource {
    fn render_memories(&self, scope: &ContextScope) -> Result<Vec<String>, SourceError>;
}

/// Result of resolving explicit entity references.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub sections: Vec<String>,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

/// On-demand entity retrieval, driven by `@mentions` in the request.
pub trait RetrievalSource {
    fn resolve(&self, scope: &ContextScope, mentions: &[String])
    -> Result<RetrievalOutcome, SourceError>;
}

/// Optional external template collaborator. `None` from `render` means the
/// template is unknown; composition falls back to the sectioned format.
pub trait TemplateRenderer {
    fn render(&self, template: &str, sections: &BTreeMap<String, String>) -> Option<String>;
}

/// Budget fractions per layer. Must be treated as independent ceilings, not
/// a redistribution scheme — an empty layer's budget is not reassigned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerBudgets {
    pub memory: f64,
    pub history: f64,
    pub retrieval: f64,
}

impl Default for LayerBudgets {
    fn default() -> Self {
        Self { memory: 0.10, history: 0.60, retrieval: 0.30 }
    }
}

impl LayerBudgets {
    /// Split a total token budget into per-layer ceilings.
    pub fn split(&self, total: usize) -> (usize, usize, usize) {
        let part = |frac: f64| (total as f64 * frac).floor() as usize;
        (part(self.memory), part(self.history), part(self.retrieval))
    }
}

/// Glass-box accounting for one layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerReport {
    pub budget_tokens: usize,
    pub used_tokens: usize,
    /// Entries the source offered before budgeting.
    pub offered: usize,
    pub truncated: bool,
}

/// The final token-bounded payload. Never persisted.
#[derive(Debug, Clone)]
pub struct ContextResult {
    pub text: String,
    pub format: OutputFormat,
    pub memory: LayerReport,
    pub history: LayerReport,
    pub retrieval: LayerReport,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub elapsed_ms: u64,
}

impl ContextResult {
    pub fn total_tokens(&self) -> usize {
        self.memory.used_tokens + self.history.used_tokens + self.retrieval.used_tokens
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / lookups as f64
    }

    pub fn any_truncated(&self) -> bool {
        self.memory.truncated || self.history.truncated || self.retrieval.truncated
    }
}

/// Extract unique `@mention` names from a request, in order of appearance.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    MENTION
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Compose a context payload from the configured layers.
///
/// Retrieval only runs when the scope's semantic query carries `@mentions`
/// and a retrieval source is wired; everything else about an absent layer is
/// an empty report, not an error.
pub fn compile_context(
    scope: &ContextScope,
    budgets: &LayerBudgets,
    history: &dyn HistorySource,
    memory: &dyn MemorySource,
    retrieval: Option<&dyn RetrievalSource>,
    template: Option<&dyn TemplateRenderer>,
) -> Result<ContextResult, SourceError> {
    let started = Instant::now();
    let (memory_budget, history_budget, retrieval_budget) = budgets.split(scope.token_budget);

    // Memory layer: flat list, clipped by character proxy if it overflows.
    let entries = memory.render_memories(scope)?;
    let memory_block = entries
        .iter()
        .map(|entry| format!("- {entry}"))
        .collect::<Vec<_>>()
        .join("\n");
    let (memory_text, memory_clipped) = clip_to_budget(&memory_block, memory_budget);
    let memory_report = LayerReport {
        budget_tokens: memory_budget,
        used_tokens: estimate_tokens(&memory_text),
        offered: entries.len(),
        truncated: memory_clipped,
    };

    // History layer: walk newest -> oldest, stop before the budget would be
    // exceeded. Recency wins over completeness.
    let turns = history.recent_turns(HISTORY_FETCH_CAP)?;
    let mut kept: Vec<String> = Vec::new();
    let mut history_used = 0usize;
    let mut history_truncated = false;
    for turn in &turns {
        let line = format!("{}: {}", turn.role, turn.content);
        let cost = estimate_tokens(&line);
        if history_used + cost > history_budget {
            history_truncated = true;
            break;
        }
        history_used += cost;
        kept.push(line);
    }
    kept.reverse(); // render oldest -> newest
    let history_text = kept.join("\n");
    let history_report = LayerReport {
        budget_tokens: history_budget,
        used_tokens: history_used,
        offered: turns.len(),
        truncated: history_truncated,
    };

    // Retrieval layer: only when the request names entities explicitly.
    let mentions = scope
        .semantic_query
        .as_deref()
        .map(extract_mentions)
        .unwrap_or_default();
    let (retrieval_text, retrieval_report, cache_hits, cache_misses) =
        match (retrieval, mentions.is_empty()) {
            (Some(source), false) => {
                let outcome = source.resolve(scope, &mentions)?;
                let block = outcome.sections.join("\n\n");
                let (text, clipped) = clip_to_budget(&block, retrieval_budget);
                let report = LayerReport {
                    budget_tokens: retrieval_budget,
                    used_tokens: estimate_tokens(&text),
                    offered: outcome.sections.len(),
                    truncated: clipped,
                };
                (text, report, outcome.cache_hits, outcome.cache_misses)
            }
            _ => (
                String::new(),
                LayerReport { budget_tokens: retrieval_budget, ..Default::default() },
                0,
                0,
            ),
        };

    let mut sections = BTreeMap::new();
    if !memory_text.is_empty() {
        sections.insert("memory".to_string(), memory_text);
    }
    if !history_text.is_empty() {
        sections.insert("history".to_string(), history_text);
    }
    if !retrieval_text.is_empty() {
        sections.insert("retrieval".to_string(), retrieval_text);
    }

    let text = render(scope, &sections, &memory_report, &history_report, &retrieval_report, template)?;

    Ok(ContextResult {
        text,
        format: scope.format,
        memory: memory_report,
        history: history_report,
        retrieval: retrieval_report,
        cache_hits,
        cache_misses,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

fn render(
    scope: &ContextScope,
    sections: &BTreeMap<String, String>,
    memory: &LayerReport,
    history: &LayerReport,
    retrieval: &LayerReport,
    template: Option<&dyn TemplateRenderer>,
) -> Result<String, SourceError> {
    match scope.format {
        OutputFormat::Sectioned => Ok(render_sectioned(sections)),
        OutputFormat::Raw => {
            let value = serde_json::json!({
                "purpose": scope.purpose,
                "sections": sections,
                "reports": {
                    "memory": memory,
                    "history": history,
                    "retrieval": retrieval,
                },
            });
            Ok(serde_json::to_string_pretty(&value)?)
        }
        OutputFormat::Templated => match template.and_then(|t| t.render(&scope.purpose, sections)) {
            Some(rendered) => Ok(rendered),
            None => Ok(render_sectioned(sections)),
        },
    }
}

fn render_sectioned(sections: &BTreeMap<String, String>) -> String {
    let mut parts = Vec::new();
    for (key, header) in [
        ("memory", "PROJECT MEMORY:"),
        ("history", "RECENT HISTORY:"),
        ("retrieval", "REFERENCED LORE:"),
    ] {
        if let Some(body) = sections.get(key) {
            parts.push(format!("{header}\n{body}"));
        }
    }
    parts.join("\n\n")
}

// -- Compaction --

/// Accounting for one history compaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactionReport {
    pub summarized: usize,
    pub kept: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

impl CompactionReport {
    pub fn tokens_saved(&self) -> usize {
        self.tokens_before.saturating_sub(self.tokens_after)
    }
}

const DIGEST_LINE_CHARS: usize = 96;

/// Condense all but the most recent `keep_recent` turns into one digest.
///
/// Turns arrive oldest first. Returns the digest text (None when nothing
/// needs summarizing) and the token accounting. The digest is deterministic:
/// one clipped line per summarized turn, no model involved.
pub fn compact_turns(turns: &[HistoryTurn], keep_recent: usize) -> (Option<String>, CompactionReport) {
    let tokens_before: usize = turns
        .iter()
        .map(|t| estimate_tokens(&format!("{}: {}", t.role, t.content)))
        .sum();

    if turns.len() <= keep_recent {
        return (
            None,
            CompactionReport {
                summarized: 0,
                kept: turns.len(),
                tokens_before,
                tokens_after: tokens_before,
            },
        );
    }

    let split = turns.len() - keep_recent;
    let (older, recent) = turns.split_at(split);

    let mut digest = format!("Condensed history of {} earlier turns:", older.len());
    for turn in older {
        let first_line = turn.content.lines().next().unwrap_or("");
        let clipped: String = first_line.chars().take(DIGEST_LINE_CHARS).collect();
        digest.push_str(&format!("\n- {}: {}", turn.role, clipped));
    }

    let tokens_after = estimate_tokens(&digest)
        + recent
            .iter()
            .map(|t| estimate_tokens(&format!("{}: {}", t.role, t.content)))
            .sum::<usize>();

    (
        Some(digest),
        CompactionReport {
            summarized: older.len(),
            kept: recent.len(),
            tokens_before,
            tokens_after,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::AccessLevel;

    struct VecHistory(Vec<HistoryTurn>);

    impl HistorySource for VecHistory {
        fn recent_turns(&self, limit: usize) -> Result<Vec<HistoryTurn>, SourceError> {
            // Newest first, like a real store query
            let mut turns = self.0.clone();
            turns.reverse();
            turns.truncate(limit);
            Ok(turns)
        }
    }

    struct VecMemory(Vec<String>);

    impl MemorySource for VecMemory {
        fn render_memories(&self, _scope: &ContextScope) -> Result<Vec<String>, SourceError> {
            Ok(self.0.clone())
        }
    }

    struct StubRetrieval;

    impl RetrievalSource for StubRetrieval {
        fn resolve(
            &self,
            _scope: &ContextScope,
            mentions: &[String],
        ) -> Result<RetrievalOutcome, SourceError> {
            Ok(RetrievalOutcome {
                sections: mentions.iter().map(|m| format!("{m} [character]\n  bio: stub")).collect(),
                cache_hits: 1,
                cache_misses: 1,
            })
        }
    }

    fn turn(role: &str, content: &str) -> HistoryTurn {
        HistoryTurn { role: role.into(), content: content.into(), ts_ms: 0 }
    }

    fn scope_with_budget(budget: usize) -> ContextScope {
        let mut scope = ContextScope::new("draft_scene", AccessLevel::Privileged);
        scope.token_budget = budget;
        scope
    }

    #[test]
    fn test_budget_split_defaults() {
        let (m, h, r) = LayerBudgets::default().split(1000);
        assert_eq!((m, h, r), (100, 600, 300));
    }

    #[test]
    fn test_compile_empty_sources() {
        let result = compile_context(
            &scope_with_budget(1000),
            &LayerBudgets::default(),
            &VecHistory(vec![]),
            &VecMemory(vec![]),
            None,
            None,
        )
        .unwrap();
        assert!(result.text.is_empty());
        assert_eq!(result.total_tokens(), 0);
        assert!(!result.any_truncated());
    }

    #[test]
    fn test_memory_layer_respects_budget() {
        let entries: Vec<String> = (0..50).map(|i| format!("decision {i}: {}", "x".repeat(80))).collect();
        let scope = scope_with_budget(100); // memory ceiling: 10 tokens
        let result = compile_context(
            &scope,
            &LayerBudgets::default(),
            &VecHistory(vec![]),
            &VecMemory(entries),
            None,
            None,
        )
        .unwrap();
        assert!(result.memory.used_tokens <= result.memory.budget_tokens);
        assert!(result.memory.truncated);
        assert!(result.any_truncated());
    }

    #[test]
    fn test_history_prefers_recent() {
        let turns: Vec<HistoryTurn> =
            (0..20).map(|i| turn("user", &format!("turn {i} {}", "y".repeat(40)))).collect();
        let scope = scope_with_budget(100); // history ceiling: 60 tokens
        let result = compile_context(
            &scope,
            &LayerBudgets::default(),
            &VecHistory(turns),
            &VecMemory(vec![]),
            None,
            None,
        )
        .unwrap();
        assert!(result.history.truncated);
        // The newest turn survives, the oldest does not
        assert!(result.text.contains("turn 19"));
        assert!(!result.text.contains("turn 0 "));
        assert!(result.history.used_tokens <= result.history.budget_tokens);
    }

    #[test]
    fn test_history_renders_oldest_first() {
        let turns = vec![turn("user", "first"), turn("assistant", "second")];
        let result = compile_context(
            &scope_with_budget(1000),
            &LayerBudgets::default(),
            &VecHistory(turns),
            &VecMemory(vec![]),
            None,
            None,
        )
        .unwrap();
        let first = result.text.find("first").unwrap();
        let second = result.text.find("second").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_retrieval_skipped_without_mentions() {
        let mut scope = scope_with_budget(1000);
        scope.semantic_query = Some("how does the opening land?".into());
        let result = compile_context(
            &scope,
            &LayerBudgets::default(),
            &VecHistory(vec![]),
            &VecMemory(vec![]),
            Some(&StubRetrieval),
            None,
        )
        .unwrap();
        assert_eq!(result.retrieval.used_tokens, 0);
        assert_eq!(result.retrieval.offered, 0);
    }

    #[test]
    fn test_retrieval_resolves_mentions() {
        let mut scope = scope_with_budget(1000);
        scope.semantic_query = Some("what would @zara say to @brix?".into());
        let result = compile_context(
            &scope,
            &LayerBudgets::default(),
            &VecHistory(vec![]),
            &VecMemory(vec![]),
            Some(&StubRetrieval),
            None,
        )
        .unwrap();
        assert_eq!(result.retrieval.offered, 2);
        assert!(result.text.contains("zara [character]"));
        assert_eq!(result.cache_hits, 1);
        assert_eq!(result.cache_misses, 1);
    }

    #[test]
    fn test_raw_format_is_json() {
        let mut scope = scope_with_budget(1000);
        scope.format = OutputFormat::Raw;
        let result = compile_context(
            &scope,
            &LayerBudgets::default(),
            &VecHistory(vec![turn("user", "hello")]),
            &VecMemory(vec!["the fox is silver".into()]),
            None,
            None,
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&result.text).unwrap();
        assert_eq!(value["purpose"], "draft_scene");
        assert!(value["sections"]["memory"].as_str().unwrap().contains("silver"));
    }

    #[test]
    fn test_templated_falls_back_without_renderer() {
        let mut scope = scope_with_budget(1000);
        scope.format = OutputFormat::Templated;
        let result = compile_context(
            &scope,
            &LayerBudgets::default(),
            &VecHistory(vec![]),
            &VecMemory(vec!["fact".into()]),
            None,
            None,
        )
        .unwrap();
        assert!(result.text.contains("PROJECT MEMORY:"));
    }

    #[test]
    fn test_templated_uses_renderer() {
        struct Fixed;
        impl TemplateRenderer for Fixed {
            fn render(&self, template: &str, _sections: &BTreeMap<String, String>) -> Option<String> {
                Some(format!("tpl:{template}"))
            }
        }
        let mut scope = scope_with_budget(1000);
        scope.format = OutputFormat::Templated;
        let result = compile_context(
            &scope,
            &LayerBudgets::default(),
            &VecHistory(vec![]),
            &VecMemory(vec![]),
            None,
            Some(&Fixed),
        )
        .unwrap();
        assert_eq!(result.text, "tpl:draft_scene");
    }

    #[test]
    fn test_extract_mentions_dedup_ordered() {
        let mentions = extract_mentions("@zara meets @brix, then @zara leaves");
        assert_eq!(mentions, vec!["zara", "brix"]);
    }

    #[test]
    fn test_extract_mentions_none() {
        assert!(extract_mentions("no references here").is_empty());
        assert!(extract_mentions("mail me @ noon").is_empty());
    }

    #[test]
    fn test_compact_noop_when_short() {
        let turns = vec![turn("user", "a"), turn("assistant", "b")];
        let (digest, report) = compact_turns(&turns, 5);
        assert!(digest.is_none());
        assert_eq!(report.summarized, 0);
        assert_eq!(report.kept, 2);
        assert_eq!(report.tokens_saved(), 0);
    }

    #[test]
    fn test_compact_reduces_tokens() {
        let turns: Vec<HistoryTurn> =
            (0..20).map(|i| turn("user", &format!("turn {i}: {}", "z".repeat(400)))).collect();
        let (digest, report) = compact_turns(&turns, 3);
        let digest = digest.unwrap();
        assert_eq!(report.summarized, 17);
        assert_eq!(report.kept, 3);
        assert!(report.tokens_after < report.tokens_before);
        assert!(report.tokens_saved() > 0);
        assert!(digest.starts_with("Condensed history of 17 earlier turns:"));
    }

    #[test]
    fn test_compact_digest_clips_lines() {
        let turns = vec![
            turn("user", &"long ".repeat(100)),
            turn("user", "recent one"),
        ];
        let (digest, _) = compact_turns(&turns, 1);
        let digest = digest.unwrap();
        let body_line = digest.lines().nth(1).unwrap();
        assert!(body_line.chars().count() <= DIGEST_LINE_CHARS + "- user: ".len());
    }
}
