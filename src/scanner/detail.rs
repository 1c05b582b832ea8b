//! DetailView: key/value rendering of one token's resolution entry
//!
//! What a widget shows when activated. Accepts every entry state:
//! - Pending → loading affordance
//! - Resolved → status, route, then any remaining fields
//! - Failed → the error, with a retry affordance

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scanner::cache::{EntryState, ResolutionEntry};
use crate::scanner::matcher::Token;

const LOADING_MESSAGE: &str = "Fetching flight data...";

/// Which affordance the detail surface should show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailState {
    Loading,
    Ready,
    Error,
}

/// Presentation-neutral detail surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailView {
    pub title: String,
    pub state: DetailState,
    pub rows: Vec<(String, String)>,
    pub message: Option<String>,
    pub can_retry: bool,
}

impl DetailView {
    /// Build the view for `token`. A missing entry renders as loading.
    pub fn from_entry(token: &Token, entry: Option<&ResolutionEntry>) -> Self {
        let title = format!("Flight: {}", token);
        let state = entry.map(|e| e.state).unwrap_or(EntryState::Pending);

        match (state, entry) {
            (EntryState::Resolved, Some(entry)) => Self {
                title,
                state: DetailState::Ready,
                rows: entry.data.as_ref().map(flight_rows).unwrap_or_default(),
                message: None,
                can_retry: false,
            },
            (EntryState::Failed, Some(entry)) => Self {
                title,
                state: DetailState::Error,
                rows: Vec::new(),
                message: Some(
                    entry
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "Unknown error".to_string()),
                ),
                can_retry: true,
            },
            _ => Self {
                title,
                state: DetailState::Loading,
                rows: Vec::new(),
                message: Some(LOADING_MESSAGE.to_string()),
                can_retry: false,
            },
        }
    }

    /// Plain-text rendering, one line per row
    pub fn to_text(&self) -> String {
        let mut lines = vec![self.title.clone()];
        lines.extend(self.rows.iter().map(|(k, v)| format!("{}: {}", k, v)));
        if let Some(message) = &self.message {
            lines.push(message.clone());
        }
        if self.can_retry {
            lines.push("[Retry]".to_string());
        }
        lines.join("\n")
    }
}

/// Status and route first, then remaining fields in key order
fn flight_rows(data: &serde_json::Map<String, Value>) -> Vec<(String, String)> {
    let mut rows = Vec::new();

    if let Some(status) = data.get("status") {
        rows.push(("Status".to_string(), display_value(status)));
    }
    match (data.get("departure"), data.get("arrival")) {
        (Some(dep), Some(arr)) => {
            rows.push(("Route".to_string(), format!("{} → {}", display_value(dep), display_value(arr))));
        }
        (Some(dep), None) => rows.push(("Departure".to_string(), display_value(dep))),
        (None, Some(arr)) => rows.push(("Arrival".to_string(), display_value(arr))),
        (None, None) => {}
    }

    for (key, value) in data {
        if matches!(key.as_str(), "status" | "departure" | "arrival") {
            continue;
        }
        rows.push((key.clone(), display_value(value)));
    }

    rows
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::cache::{Record, ResolutionError};
    use serde_json::json;

    fn entry(state: EntryState, data: Option<Value>, error: Option<ResolutionError>) -> ResolutionEntry {
        ResolutionEntry {
            token: Token::from("BA249"),
            state,
            data: data.and_then(|v| v.as_object().cloned()),
            error,
            attempts: 1,
        }
    }

    #[test]
    fn test_missing_entry_is_loading() {
        let view = DetailView::from_entry(&Token::from("BA249"), None);
        assert_eq!(view.state, DetailState::Loading);
        assert_eq!(view.title, "Flight: BA249");
        assert_eq!(view.message.as_deref(), Some(LOADING_MESSAGE));
    }

    #[test]
    fn test_pending_is_loading() {
        let e = entry(EntryState::Pending, None, None);
        let view = DetailView::from_entry(&e.token, Some(&e));
        assert_eq!(view.state, DetailState::Loading);
        assert!(!view.can_retry);
    }

    #[test]
    fn test_resolved_rows() {
        let e = entry(
            EntryState::Resolved,
            Some(json!({ "status": "On time", "departure": "LHR", "arrival": "JFK", "gate": 22 })),
            None,
        );
        let view = DetailView::from_entry(&e.token, Some(&e));

        assert_eq!(view.state, DetailState::Ready);
        assert_eq!(
            view.rows,
            vec![
                ("Status".to_string(), "On time".to_string()),
                ("Route".to_string(), "LHR → JFK".to_string()),
                ("gate".to_string(), "22".to_string()),
            ]
        );
        assert!(view.message.is_none());
    }

    #[test]
    fn test_resolved_empty_record() {
        let mut e = entry(EntryState::Resolved, None, None);
        e.data = Some(Record::new());
        let view = DetailView::from_entry(&e.token, Some(&e));
        assert_eq!(view.state, DetailState::Ready);
        assert!(view.rows.is_empty());
    }

    #[test]
    fn test_failed_offers_retry() {
        let e = entry(EntryState::Failed, None, Some(ResolutionError::Timeout));
        let view = DetailView::from_entry(&e.token, Some(&e));

        assert_eq!(view.state, DetailState::Error);
        assert!(view.can_retry);
        assert_eq!(view.message.as_deref(), Some("Fetch timed out"));
        assert!(view.to_text().ends_with("[Retry]"));
    }

    #[test]
    fn test_to_text() {
        let e = entry(EntryState::Resolved, Some(json!({ "status": "Delayed" })), None);
        let view = DetailView::from_entry(&e.token, Some(&e));
        assert_eq!(view.to_text(), "Flight: BA249\nStatus: Delayed");
    }
}
