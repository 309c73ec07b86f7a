use crate::app_error::{AppError, AppResult};
use crate::local_store::{Collection, LocalState, LocalStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SNAPSHOT_VERSION: &str = "1.0.0";

/// The whole synchronizable state as one JSON document. Every collection
/// field is required when parsing; a document missing one is rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub logs: Vec<Value>,
    pub todos: Vec<Value>,
    pub categories: Vec<Value>,
    pub todo_categories: Vec<Value>,
    pub scopes: Vec<Value>,
    pub goals: Vec<Value>,
    pub auto_link_rules: Vec<Value>,
    pub review_templates: Vec<Value>,
    pub daily_reviews: Vec<Value>,
    pub weekly_reviews: Vec<Value>,
    pub monthly_reviews: Vec<Value>,
    pub custom_narrative_templates: Vec<Value>,
    #[serde(default)]
    pub user_personal_info: String,
    pub filters: Vec<Value>,
    #[serde(default = "default_version")]
    pub version: String,
    pub timestamp: i64,
}

fn default_version() -> String {
    SNAPSHOT_VERSION.to_string()
}

impl Snapshot {
    pub fn collection(&self, collection: Collection) -> &Vec<Value> {
        match collection {
            Collection::Logs => &self.logs,
            Collection::Todos => &self.todos,
            Collection::Categories => &self.categories,
            Collection::TodoCategories => &self.todo_categories,
            Collection::Scopes => &self.scopes,
            Collection::Goals => &self.goals,
            Collection::AutoLinkRules => &self.auto_link_rules,
            Collection::ReviewTemplates => &self.review_templates,
            Collection::DailyReviews => &self.daily_reviews,
            Collection::WeeklyReviews => &self.weekly_reviews,
            Collection::MonthlyReviews => &self.monthly_reviews,
            Collection::CustomNarrativeTemplates => &self.custom_narrative_templates,
            Collection::Filters => &self.filters,
        }
    }

    fn collection_mut(&mut self, collection: Collection) -> &mut Vec<Value> {
        match collection {
            Collection::Logs => &mut self.logs,
            Collection::Todos => &mut self.todos,
            Collection::Categories => &mut self.categories,
            Collection::TodoCategories => &mut self.todo_categories,
            Collection::Scopes => &mut self.scopes,
            Collection::Goals => &mut self.goals,
            Collection::AutoLinkRules => &mut self.auto_link_rules,
            Collection::ReviewTemplates => &mut self.review_templates,
            Collection::DailyReviews => &mut self.daily_reviews,
            Collection::WeeklyReviews => &mut self.weekly_reviews,
            Collection::MonthlyReviews => &mut self.monthly_reviews,
            Collection::CustomNarrativeTemplates => &mut self.custom_narrative_templates,
            Collection::Filters => &mut self.filters,
        }
    }

    /// Builds a snapshot from state, refusing when any collection was never
    /// initialized.
    pub fn from_state(state: &LocalState, timestamp: i64) -> AppResult<Self> {
        let missing = state.missing_collections();
        if !missing.is_empty() {
            return Err(AppError::new(
                "LT_LOCAL_STATE_INVALID",
                "local_store",
                "local state is missing required collections",
                false,
                serde_json::json!({
                    "missing": missing.iter().map(|c| c.key()).collect::<Vec<_>>()
                }),
            ));
        }
        let mut snapshot = Snapshot {
            logs: Vec::new(),
            todos: Vec::new(),
            categories: Vec::new(),
            todo_categories: Vec::new(),
            scopes: Vec::new(),
            goals: Vec::new(),
            auto_link_rules: Vec::new(),
            review_templates: Vec::new(),
            daily_reviews: Vec::new(),
            weekly_reviews: Vec::new(),
            monthly_reviews: Vec::new(),
            custom_narrative_templates: Vec::new(),
            user_personal_info: state.user_personal_info.clone().unwrap_or_default(),
            filters: Vec::new(),
            version: SNAPSHOT_VERSION.to_string(),
            timestamp,
        };
        for (collection, items) in &state.collections {
            *snapshot.collection_mut(*collection) = items.clone();
        }
        Ok(snapshot)
    }

    pub fn to_state(&self) -> LocalState {
        LocalState {
            collections: Collection::ALL
                .into_iter()
                .map(|c| (c, self.collection(c).clone()))
                .collect(),
            user_personal_info: Some(self.user_personal_info.clone()).filter(|s| !s.is_empty()),
        }
    }
}

/// Reads the in-memory state, never the database, so writes that just
/// happened are always included.
pub fn produce_snapshot(store: &LocalStore, now_ms: i64) -> AppResult<Snapshot> {
    Snapshot::from_state(&store.state()?, now_ms)
}

/// Replaces every collection in one step without recording the restore as a
/// local edit.
pub fn apply_snapshot(store: &LocalStore, snapshot: &Snapshot, now_ms: i64) -> AppResult<()> {
    store.skip_next_timestamp_update();
    let applied = store.replace_all(snapshot.to_state(), now_ms);
    if applied.is_err() {
        store.clear_skip_timestamp_update();
    }
    applied
}

pub fn encode_snapshot(snapshot: &Snapshot) -> AppResult<Vec<u8>> {
    serde_json::to_vec_pretty(snapshot).map_err(|e| {
        AppError::new(
            "LT_SYNC_FORMAT_INVALID",
            "sync",
            "failed encoding snapshot",
            false,
            serde_json::json!({ "error": e.to_string() }),
        )
    })
}

pub fn parse_snapshot(bytes: &[u8]) -> AppResult<Snapshot> {
    serde_json::from_slice(bytes).map_err(|e| {
        AppError::new(
            "LT_SYNC_FORMAT_INVALID",
            "sync",
            "document is not a valid snapshot",
            false,
            serde_json::json!({ "error": e.to_string(), "line": e.line(), "column": e.column() }),
        )
    })
}

pub fn snapshot_fingerprint(bytes: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(bytes).to_hex())
}
