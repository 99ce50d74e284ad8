//! Events driving the turn state machine, including the decoded form of
//! raw pipeline updates.

use serde_json::Value;

use super::state::TimelineStep;

/// Inputs to the turn state machine.
#[derive(Debug, Clone)]
pub enum Event {
    /// The user submitted query text. The message id is generated by the
    /// caller so the transition itself stays deterministic.
    Submit { id: String, text: String },
    /// The user tore down the conversation.
    Cancel,
    /// One decoded pipeline update from the active run.
    Stage(StageEvent),
    /// The session's loading flag or message list changed; re-evaluate
    /// turn completion.
    Sync,
}

/// One pipeline update, folded into a closed set of known stages.
///
/// Updates arrive as single-key JSON objects, `{"stage_tag": payload}`.
/// Tags outside the known set land in `Unknown` with the raw value
/// preserved, so classification stays total no matter what the server
/// grows later.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    Preprocess,
    ExtractFilters { filters: FilterSet },
    RetrieveDocuments { retrieved: usize },
    GradeDocuments { graded: usize },
    Reconstruct,
    Summarize,
    CompileFinal,
    Unknown { raw: Value },
}

impl StageEvent {
    /// Decode one raw update. Tags are probed in classification order, so
    /// an update that somehow carries several recognized tags still decodes
    /// deterministically to the first one.
    pub fn from_update(raw: Value) -> Self {
        let Some(update) = raw.as_object() else {
            return Self::Unknown { raw };
        };

        if update.contains_key("preprocess_input") {
            Self::Preprocess
        } else if let Some(payload) = update.get("extract_filters") {
            Self::ExtractFilters {
                filters: FilterSet::from_payload(payload),
            }
        } else if let Some(payload) = update.get("retrieve_documents") {
            Self::RetrieveDocuments {
                retrieved: list_len(payload, "retrieved_docs"),
            }
        } else if let Some(payload) = update.get("grade_documents") {
            Self::GradeDocuments {
                graded: list_len(payload, "grade_details"),
            }
        } else if update.contains_key("reconstruct_full_text") {
            Self::Reconstruct
        } else if update.contains_key("summarize_bills") {
            Self::Summarize
        } else if update.contains_key("compile_final_research") {
            Self::CompileFinal
        } else {
            Self::Unknown { raw }
        }
    }

    /// Render this event as a timeline step, or `None` for events the
    /// timeline ignores. Total: malformed payloads have already degraded
    /// to defaulted fields during decoding.
    pub fn to_step(&self) -> Option<TimelineStep> {
        let step = match self {
            Self::Preprocess => {
                TimelineStep::new("Preprocessing", "Your query has been refined.")
            }
            Self::ExtractFilters { filters } => {
                TimelineStep::new("Filtering", filters.summary())
            }
            Self::RetrieveDocuments { retrieved } => {
                TimelineStep::new("Retrieving", format!("{retrieved} documents retrieved"))
            }
            Self::GradeDocuments { graded } => TimelineStep::new(
                "Grading",
                format!("Found {graded} relevant documents to your query"),
            ),
            Self::Reconstruct => TimelineStep::new("Reconstructing", "Reconstructing bill..."),
            Self::Summarize => TimelineStep::new("Summarizing", "Summarizing bill..."),
            Self::CompileFinal => TimelineStep::new(
                "Finalizing",
                "Composing and presenting the final answer.",
            ),
            Self::Unknown { .. } => return None,
        };
        Some(step)
    }

    /// True for the final pipeline stage; observing it arms the finalize
    /// latch.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CompileFinal)
    }
}

/// Filter fields pulled out of an `extract_filters` payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    pub year: Option<String>,
    pub bill_identifier: Option<String>,
    pub state: Option<String>,
    /// The full filter mapping as emitted, including keys that are never
    /// rendered individually. Drives the keyword-count fallback.
    pub raw: serde_json::Map<String, Value>,
}

impl FilterSet {
    fn from_payload(payload: &Value) -> Self {
        let Some(filters) = payload.get("filters").and_then(Value::as_object) else {
            return Self::default();
        };
        Self {
            year: display_field(filters.get("year")),
            bill_identifier: display_field(filters.get("bill_identifier")),
            state: display_field(filters.get("state")),
            raw: filters.clone(),
        }
    }

    /// Human-readable rendering: the present named filters in fixed order,
    /// or the key count of the raw mapping when none are present.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(year) = &self.year {
            parts.push(format!("Year: {year}"));
        }
        if let Some(bill) = &self.bill_identifier {
            parts.push(format!("Bill: {bill}"));
        }
        if let Some(state) = &self.state {
            parts.push(format!("State: {state}"));
        }
        if parts.is_empty() {
            format!("{} keywords found", self.raw.len())
        } else {
            parts.join(", ")
        }
    }
}

fn list_len(payload: &Value, key: &str) -> usize {
    payload.get(key).and_then(Value::as_array).map_or(0, Vec::len)
}

/// Renders one filter value for display, or `None` when the field should
/// count as absent (missing, null, empty string, empty list).
fn display_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) if items.is_empty() => None,
        Value::Array(items) => Some(
            items
                .iter()
                .map(element_display)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other @ Value::Object(_) => Some(other.to_string()),
    }
}

fn element_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
