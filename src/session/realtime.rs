//! Realtime-context items derived from persisted turns

use serde::Serialize;

use crate::conversation::Turn;
use crate::timeline::Role;

/// Content part of a realtime conversation item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeContent {
    /// User-authored text
    InputText { text: String },
    /// Assistant-authored text
    Text { text: String },
}

impl RealtimeContent {
    /// Text of this part
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::InputText { text } | Self::Text { text } => text,
        }
    }
}

/// One history item handed to the realtime model at connect time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: &'static str,
    pub role: Role,
    pub content: Vec<RealtimeContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_item_id: Option<String>,
}

/// Map turns into chronologically ordered, linked realtime items
///
/// Blank halves are skipped. A turn with both halves yields the user item
/// first, then the assistant item. Each item's `previous_item_id` names the
/// item before it.
#[must_use]
pub fn map_history_to_items(turns: &[Turn]) -> Vec<RealtimeItem> {
    let mut ordered: Vec<&Turn> = turns.iter().collect();
    ordered.sort_by_key(|t| t.timestamp);

    let mut items: Vec<RealtimeItem> = Vec::with_capacity(ordered.len() * 2);
    for turn in ordered {
        let halves = [
            turn.user_text().map(|text| {
                (
                    Role::User,
                    RealtimeContent::InputText {
                        text: text.to_string(),
                    },
                )
            }),
            turn.assistant_text().map(|text| {
                (
                    Role::Assistant,
                    RealtimeContent::Text {
                        text: text.to_string(),
                    },
                )
            }),
        ];

        for (role, content) in halves.into_iter().flatten() {
            let previous_item_id = items.last().map(|item| item.id.clone());
            items.push(RealtimeItem {
                id: format!("hist_{}", items.len()),
                item_type: "message",
                role,
                content: vec![content],
                previous_item_id,
            });
        }
    }
    items
}
