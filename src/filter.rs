//! Structured filter AST and evaluator (C2, §4.1).
//!
//! This crate's default vector/lexical providers (§4.3, §4.4) scan an
//! in-process chunk corpus rather than delegate to a remote store's native
//! query language, so the `toCriteria` half of §4.1's contract collapses into
//! direct evaluation: [`Filter::matches`] *is* the compiled form. A store
//! backed by an external engine with its own filter DSL would implement a
//! separate `to_criteria` translation against this same AST.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dynamic::{resolve_path, Dynamic};
use crate::error::OrchestratorError;

/// Comparison operator (§3 Filter AST).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    /// Equal (deep equality with numeric widening).
    Eq,
    /// Not equal.
    Ne,
    /// Greater than (requires Comparable operands).
    Gt,
    /// Greater than or equal.
    Ge,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Candidate value equals one element of a list value.
    In,
    /// Case-sensitive wildcard match (`%`, `_`).
    Like,
    /// Case-insensitive wildcard match.
    Ilike,
}

/// Compound boolean operator (§3 Filter AST).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompoundOp {
    /// All children must match.
    And,
    /// At least one child must match.
    Or,
    /// Exactly one child, negated.
    Not,
}

/// A filter node: either a leaf comparison or a compound of sub-filters (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    /// A leaf comparison against a dotted metadata path.
    Comparison {
        /// Dotted path into the candidate's metadata map.
        key: String,
        /// Comparison operator.
        op: CompareOp,
        /// The value to compare against.
        value: Value,
    },
    /// A boolean combination of sub-filters.
    Compound {
        /// Boolean operator.
        op: CompoundOp,
        /// Sub-filters. Must contain exactly one element when `op` is `Not`.
        filters: Vec<Filter>,
    },
}

impl Filter {
    /// Builds a scope filter restricting results to one or more vector stores (§4.5 step 1).
    ///
    /// Returns `None` when `vector_store_ids` is empty (no scoping).
    #[must_use]
    pub fn scope(vector_store_ids: &[String]) -> Option<Self> {
        match vector_store_ids {
            [] => None,
            [single] => Some(Self::Comparison {
                key: "vector_store_id".to_string(),
                op: CompareOp::Eq,
                value: Value::String(single.clone()),
            }),
            many => Some(Self::Compound {
                op: CompoundOp::Or,
                filters: many
                    .iter()
                    .map(|id| Self::Comparison {
                        key: "vector_store_id".to_string(),
                        op: CompareOp::Eq,
                        value: Value::String(id.clone()),
                    })
                    .collect(),
            }),
        }
    }

    /// Combines two optional filters under `and`, per §4.5 step 1.
    #[must_use]
    pub fn and_optional(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (None, None) => None,
            (Some(f), None) | (None, Some(f)) => Some(f),
            (Some(a), Some(b)) => Some(Self::Compound {
                op: CompoundOp::And,
                filters: vec![a, b],
            }),
        }
    }

    /// Evaluates this filter against a candidate's metadata map (§4.1).
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::FilterApplicationFailed`] for structurally
    /// invalid filters (a `not` with != 1 child, an `in`/`like` operand of the
    /// wrong JSON type) — never for a merely-missing or type-mismatched
    /// candidate value, which instead *fails closed* (does not match).
    pub fn matches(&self, metadata: &Value) -> Result<bool, OrchestratorError> {
        match self {
            Self::Comparison { key, op, value } => {
                let candidate = resolve_path(metadata, key);
                eval_comparison(*op, &candidate, value)
            }
            Self::Compound { op, filters } => match op {
                CompoundOp::And => {
                    for f in filters {
                        if !f.matches(metadata)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                CompoundOp::Or => {
                    for f in filters {
                        if f.matches(metadata)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                CompoundOp::Not => match filters.as_slice() {
                    [only] => Ok(!only.matches(metadata)?),
                    other => Err(OrchestratorError::FilterApplicationFailed(format!(
                        "`not` requires exactly one child filter, got {}",
                        other.len()
                    ))),
                },
            },
        }
    }
}

fn eval_comparison(op: CompareOp, candidate: &Dynamic, operand: &Value) -> Result<bool, OrchestratorError> {
    if candidate.is_missing() {
        // Missing keys never match any comparison (§4.1), including `ne`:
        // `ne` is "the key is present and differs", not "the key is absent".
        return Ok(false);
    }
    let candidate_value = candidate.value().unwrap_or(&Value::Null);

    match op {
        CompareOp::Eq => Ok(deep_eq_numeric(candidate_value, operand)),
        CompareOp::Ne => Ok(!deep_eq_numeric(candidate_value, operand)),
        CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le => {
            Ok(compare_ordered(op, candidate_value, operand))
        }
        CompareOp::In => {
            let list = operand.as_array().ok_or_else(|| {
                OrchestratorError::FilterApplicationFailed(
                    "`in` requires a list operand".to_string(),
                )
            })?;
            Ok(list.iter().any(|item| deep_eq_numeric(candidate_value, item)))
        }
        CompareOp::Like | CompareOp::Ilike => {
            let pattern = operand.as_str().ok_or_else(|| {
                OrchestratorError::FilterApplicationFailed(
                    "`like`/`ilike` requires a string operand".to_string(),
                )
            })?;
            let Some(text) = candidate_value.as_str() else {
                return Ok(false);
            };
            Ok(wildcard_match(text, pattern, op == CompareOp::Ilike))
        }
    }
}

/// Deep equality with numeric widening: `5` (int) equals `5.0` (float).
fn deep_eq_numeric(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return (x - y).abs() < f64::EPSILON;
    }
    a == b
}

/// Ordered comparison; fails closed (returns `false`) when operands are not
/// both-numeric or both-string, per §4.1 "otherwise the filter fails closed".
fn compare_ordered(op: CompareOp, candidate: &Value, operand: &Value) -> bool {
    let ordering = if let (Some(a), Some(b)) = (candidate.as_f64(), operand.as_f64()) {
        a.partial_cmp(&b)
    } else if let (Some(a), Some(b)) = (candidate.as_str(), operand.as_str()) {
        Some(a.cmp(b))
    } else {
        None
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::Ge => ordering.is_ge(),
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Le => ordering.is_le(),
        _ => false,
    }
}

/// Matches `text` against a SQL-style wildcard `pattern` (`%` = any run, `_` = any one char).
fn wildcard_match(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let text: Vec<char> = if case_insensitive {
        text.to_lowercase().chars().collect()
    } else {
        text.chars().collect()
    };
    let pattern: Vec<char> = if case_insensitive {
        pattern.to_lowercase().chars().collect()
    } else {
        pattern.chars().collect()
    };
    wildcard_match_chars(&text, &pattern)
}

fn wildcard_match_chars(text: &[char], pattern: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('%') => {
            // `%` matches any run (including empty); try every split point.
            (0..=text.len()).any(|i| wildcard_match_chars(&text[i..], &pattern[1..]))
        }
        Some('_') => !text.is_empty() && wildcard_match_chars(&text[1..], &pattern[1..]),
        Some(c) => text.first() == Some(c) && wildcard_match_chars(&text[1..], &pattern[1..]),
    }
}
