//! Result compaction — shrinks raw tool results to a serialized byte
//! budget before they enter the transcript.
//!
//! Diagnostic backends happily return megabytes (log lines, search
//! hits, ticket threads); the model only needs the head of that.
//! Compaction is tool-aware and staged: list payloads are capped to an
//! item count first, individual text fields are truncated next
//! (structure preserved), and only then is the serialized form cut at
//! the budget with an explicit marker appended.

use serde_json::Value;
use std::collections::HashMap;

/// Appended whenever whole-payload truncation drops data. Downstream
/// consumers (and the model) match on this literal substring to detect
/// partial data.
pub const TRUNCATION_MARKER: &str = "results truncated, additional data may exist";

/// Default serialized-size budget per tool result.
pub const DEFAULT_BYTE_BUDGET: usize = 8_000;

/// Bytes reserved below the budget for the marker and JSON escaping.
const SAFETY_MARGIN: usize = 128;

/// Suffix marking a field-level cut.
const ELLIPSIS: &str = "…";

/// Field-pruning rule for one tool's payload shape.
#[derive(Debug, Clone)]
pub struct CompactionRule {
    /// Maximum items kept in list-shaped payloads.
    pub max_items: usize,

    /// Maximum byte length of an individual string field.
    pub max_field_len: usize,
}

impl Default for CompactionRule {
    fn default() -> Self {
        Self {
            max_items: 20,
            max_field_len: 2_000,
        }
    }
}

/// Compacts tool results to a byte budget using per-tool rules.
#[derive(Debug, Clone)]
pub struct ResultCompactor {
    byte_budget: usize,
    default_rule: CompactionRule,
    rules: HashMap<String, CompactionRule>,
}

impl ResultCompactor {
    pub fn new(byte_budget: usize) -> Self {
        Self {
            byte_budget,
            default_rule: CompactionRule::default(),
            rules: HashMap::new(),
        }
    }

    /// Override the pruning rule for one tool.
    pub fn with_rule(mut self, tool_name: impl Into<String>, rule: CompactionRule) -> Self {
        self.rules.insert(tool_name.into(), rule);
        self
    }

    /// Override the default rule applied to tools without their own.
    pub fn with_default_rule(mut self, rule: CompactionRule) -> Self {
        self.default_rule = rule;
        self
    }

    pub fn byte_budget(&self) -> usize {
        self.byte_budget
    }

    fn rule_for(&self, tool_name: &str) -> &CompactionRule {
        self.rules.get(tool_name).unwrap_or(&self.default_rule)
    }

    /// Compact `raw` to the byte budget.
    ///
    /// Returns the compacted value and whether any truncation fired.
    /// Payloads already under budget pass through unchanged; compaction
    /// at a fixed budget is idempotent.
    pub fn compact(&self, tool_name: &str, raw: &Value) -> (Value, bool) {
        if serialized_len(raw) <= self.byte_budget {
            return (raw.clone(), false);
        }

        let rule = self.rule_for(tool_name);
        let mut pruned = raw.clone();
        let changed = prune_value(&mut pruned, rule);

        if serialized_len(&pruned) <= self.byte_budget {
            return (pruned, changed);
        }

        // Field-level pruning was not enough: cut the serialized form
        // at the budget minus the safety margin and mark the cut.
        let flat = match serde_json::to_string(&pruned) {
            Ok(s) => s,
            Err(_) => pruned.to_string(),
        };
        let mut keep = self
            .byte_budget
            .saturating_sub(SAFETY_MARGIN + TRUNCATION_MARKER.len());
        loop {
            let cut = truncate_at_char_boundary(&flat, keep);
            let candidate = Value::String(format!("{cut} [{TRUNCATION_MARKER}]"));
            let len = serialized_len(&candidate);
            if len <= self.byte_budget || keep == 0 {
                return (candidate, true);
            }
            // JSON escaping inflated the string; shave off the overage.
            keep = keep.saturating_sub(len - self.byte_budget);
        }
    }
}

impl Default for ResultCompactor {
    fn default() -> Self {
        Self::new(DEFAULT_BYTE_BUDGET)
    }
}

fn serialized_len(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(usize::MAX)
}

/// Apply item caps and field truncation in place. Returns whether
/// anything changed.
fn prune_value(value: &mut Value, rule: &CompactionRule) -> bool {
    match value {
        Value::Array(items) => {
            let mut changed = false;
            if items.len() > rule.max_items {
                items.truncate(rule.max_items);
                changed = true;
            }
            for item in items.iter_mut() {
                changed |= prune_value(item, rule);
            }
            changed
        }
        Value::Object(map) => {
            let mut changed = false;
            for (_, v) in map.iter_mut() {
                changed |= prune_value(v, rule);
            }
            changed
        }
        Value::String(s) => {
            if s.len() > rule.max_field_len {
                let keep = rule.max_field_len.saturating_sub(ELLIPSIS.len());
                let cut = truncate_at_char_boundary(s, keep);
                *s = format!("{cut}{ELLIPSIS}");
                true
            } else {
                false
            }
        }
        _ => false,
    }
}

/// Longest prefix of `s` that is at most `max_bytes` long and ends on a
/// char boundary.
fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn under_budget_passes_through_unchanged() {
        let compactor = ResultCompactor::new(8_000);
        let raw = json!({"lines": ["a", "b"], "total": 2});
        let (out, truncated) = compactor.compact("log_search", &raw);
        assert_eq!(out, raw);
        assert!(!truncated);
    }

    #[test]
    fn oversized_payload_fits_budget_with_marker() {
        let compactor = ResultCompactor::new(8_000);
        // Fifty 1,000-byte fields: every field is under the field cap,
        // so pruning cannot help and the serialized form has to be cut.
        let fields: serde_json::Map<String, Value> = (0..50)
            .map(|i| (format!("chunk_{i:02}"), Value::String("x".repeat(1_000))))
            .collect();
        let raw = Value::Object(fields);
        let (out, truncated) = compactor.compact("trace_fetch", &raw);

        assert!(truncated);
        assert!(serialized_len(&out) <= 8_000);
        assert!(out.as_str().unwrap().contains(TRUNCATION_MARKER));
    }

    #[test]
    fn list_payloads_are_capped_first() {
        let compactor = ResultCompactor::new(2_000)
            .with_rule("log_search", CompactionRule { max_items: 5, max_field_len: 2_000 });
        let lines: Vec<String> = (0..200).map(|i| format!("line {i}: connection reset")).collect();
        let raw = json!({ "lines": lines });

        let (out, truncated) = compactor.compact("log_search", &raw);
        assert!(truncated);
        assert_eq!(out["lines"].as_array().unwrap().len(), 5);
        // Structure survived — no whole-payload cut was needed.
        assert!(out.is_object());
    }

    #[test]
    fn long_fields_truncated_in_place() {
        let compactor = ResultCompactor::new(1_000)
            .with_default_rule(CompactionRule { max_items: 20, max_field_len: 100 });
        let raw = json!({
            "ticket": "INC-2041",
            "description": "d".repeat(5_000)
        });

        let (out, truncated) = compactor.compact("ticket_lookup", &raw);
        assert!(truncated);
        // Field truncated, structure preserved.
        assert_eq!(out["ticket"], "INC-2041");
        let desc = out["description"].as_str().unwrap();
        assert!(desc.len() <= 100);
        assert!(desc.ends_with(ELLIPSIS));
    }

    #[test]
    fn compaction_is_idempotent() {
        let compactor = ResultCompactor::new(1_000);
        let raw = json!({
            "hits": (0..100).map(|i| json!({"msg": format!("hit {i} {}", "y".repeat(200))})).collect::<Vec<_>>()
        });

        let (once, first) = compactor.compact("code_search", &raw);
        assert!(first);
        let (twice, second) = compactor.compact("code_search", &once);
        assert_eq!(once, twice);
        assert!(!second, "already-compacted payload is under budget");
    }

    #[test]
    fn multibyte_strings_cut_on_char_boundary() {
        let compactor = ResultCompactor::new(500)
            .with_default_rule(CompactionRule { max_items: 20, max_field_len: 50 });
        let raw = json!({ "msg": "ступенчатый отказ сервиса ".repeat(40) });
        let (out, truncated) = compactor.compact("log_search", &raw);
        assert!(truncated);
        // Would panic on a broken boundary before getting here; also
        // verify it still serializes.
        assert!(serde_json::to_string(&out).is_ok());
    }

    #[test]
    fn scalars_never_modified() {
        let compactor = ResultCompactor::new(8_000);
        let raw = json!({"count": 12, "ratio": 0.5, "ok": true, "missing": null});
        let (out, truncated) = compactor.compact("pipeline_status", &raw);
        assert_eq!(out, raw);
        assert!(!truncated);
    }

    #[test]
    fn truncate_at_char_boundary_is_safe() {
        let s = "héllo wörld";
        for max in 0..=s.len() {
            let cut = truncate_at_char_boundary(s, max);
            assert!(cut.len() <= max);
            assert!(s.starts_with(cut));
        }
    }
}
