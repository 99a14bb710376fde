use std::sync::Arc;

use cadence_core::{
    DateResolver, EngineError, Habit, LifecycleEvent, LifecycleProcessor,
    TargetLifecycleMigrator, Viewer, daily_view, needs_grace_review,
};
use cadence_store::{CadenceConfig, Store, StoreError};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct CadenceServer {
    state: Arc<Mutex<ServerState>>,
    tool_router: ToolRouter<Self>,
}

struct ServerState {
    store: Store,
    config: CadenceConfig,
    user: String,
    tz_override: Option<String>,
}

impl ServerState {
    fn resolver(&self) -> Result<DateResolver, McpError> {
        self.store
            .resolver(&self.user, &self.config, self.tz_override.as_deref())
            .map_err(engine_error)
    }

    /// Catch up every habit, so single-habit tools act on today's state.
    fn refresh(&self, resolver: &DateResolver) -> Result<cadence_core::ProcessReport, McpError> {
        LifecycleProcessor::run(&self.store, &self.user, resolver.today()).map_err(engine_error)
    }

    fn find(&self, needle: &str) -> Result<Habit, McpError> {
        self.store.find_habit(&self.user, needle).map_err(store_error)
    }
}

impl CadenceServer {
    pub fn new(
        store: Store,
        config: CadenceConfig,
        user: String,
        tz_override: Option<String>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                store,
                config,
                user,
                tz_override,
            })),
            tool_router: Self::tool_router(),
        }
    }

    async fn user_event(&self, needle: &str, event: LifecycleEvent) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let resolver = state.resolver()?;
        state.refresh(&resolver)?;
        let today = resolver.today();
        let habit = state.find(needle)?;

        if event == LifecycleEvent::UserComplete
            && needs_grace_review(&habit, today).map_err(engine_error)?
        {
            return Err(McpError::invalid_params(
                format!(
                    "'{}' still has a pending grace decision for yesterday: answer the grace prompt first",
                    habit.name
                ),
                None,
            ));
        }
        let updated =
            LifecycleProcessor::apply(&state.store, &habit, event, today).map_err(engine_error)?;
        json_result(&updated)
    }
}

fn engine_error(e: EngineError) -> McpError {
    match e {
        EngineError::InvalidTransition { .. } | EngineError::UnknownTimeZone(_) => {
            McpError::invalid_params(e.to_string(), None)
        }
        _ => McpError::internal_error(e.to_string(), None),
    }
}

fn store_error(e: StoreError) -> McpError {
    match e {
        StoreError::NotFound(_) => McpError::invalid_params(e.to_string(), None),
        _ => McpError::internal_error(e.to_string(), None),
    }
}

fn json_result<T: serde::Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

// --- Tool parameter types ---

#[derive(Debug, Deserialize, JsonSchema)]
struct HabitRequest {
    /// Habit id, unique id prefix, or exact name
    habit: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ResolveRequest {
    /// Habit id, unique id prefix, or exact name
    habit: String,
    /// "done" if yesterday was completed after all, "missed" otherwise
    outcome: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ActionsRequest {
    /// "owner" (default) for the full list, "visitor" for public items only
    viewer: Option<String>,
}

#[tool_router]
impl CadenceServer {
    #[tool(
        description = "Bring every habit up to date for today. Days that passed without a visit are resolved as misses automatically. Returns the habits whose outcome for yesterday still needs an answer (grace prompts), plus any per-habit failures."
    )]
    async fn cadence_process(&self) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let resolver = state.resolver()?;
        let report = state.refresh(&resolver)?;

        json_result(&serde_json::json!({
            "today": resolver.today(),
            "processed_count": report.processed_count,
            "grace_habits": report.grace_habits,
            "failures": report.failures,
        }))
    }

    #[tool(
        description = "Mark a habit done for today. Fails if it is already done today, or if yesterday's grace prompt for it has not been answered yet."
    )]
    async fn cadence_complete(
        &self,
        Parameters(req): Parameters<HabitRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.user_event(&req.habit, LifecycleEvent::UserComplete).await
    }

    #[tool(description = "Revert today's completion of a habit, restoring its previous streak.")]
    async fn cadence_undo(
        &self,
        Parameters(req): Parameters<HabitRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.user_event(&req.habit, LifecycleEvent::UserUndo).await
    }

    #[tool(
        description = "Answer a grace prompt: was the habit done yesterday? outcome is \"done\" or \"missed\". Only valid for habits listed as needing grace today."
    )]
    async fn cadence_resolve(
        &self,
        Parameters(req): Parameters<ResolveRequest>,
    ) -> Result<CallToolResult, McpError> {
        let done = match req.outcome.to_lowercase().as_str() {
            "done" => true,
            "missed" => false,
            other => {
                return Err(McpError::invalid_params(
                    format!("outcome must be 'done' or 'missed', got '{other}'"),
                    None,
                ));
            }
        };

        let state = self.state.lock().await;
        let resolver = state.resolver()?;
        state.refresh(&resolver)?;
        let today = resolver.today();
        let habit = state.find(&req.habit)?;

        if !needs_grace_review(&habit, today).map_err(engine_error)? {
            return Err(McpError::invalid_params(
                format!("'{}' has no pending grace decision", habit.name),
                None,
            ));
        }
        let updated = if done {
            LifecycleProcessor::resolve_habit_complete(&state.store, &habit, today)
        } else {
            LifecycleProcessor::resolve_habit_incomplete(&state.store, &habit, today)
        }
        .map_err(engine_error)?;
        json_result(&updated)
    }

    #[tool(
        description = "List all habits with state, streaks, and whether each still needs a grace answer today."
    )]
    async fn cadence_habits(&self) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let resolver = state.resolver()?;
        state.refresh(&resolver)?;
        let today = resolver.today();

        let records = state.store.list_habits(&state.user).map_err(store_error)?;
        let mut entries = Vec::with_capacity(records.len());
        let mut unreadable = Vec::new();
        for record in records {
            match record {
                Ok(habit) => {
                    let needs_grace = needs_grace_review(&habit, today).map_err(engine_error)?;
                    entries.push(serde_json::json!({
                        "habit": habit,
                        "needs_grace": needs_grace,
                    }));
                }
                Err(bad) => unreadable.push(serde_json::json!({
                    "habit_id": bad.habit_id,
                    "name": bad.name,
                    "error": bad.error.to_string(),
                })),
            }
        }
        json_result(&serde_json::json!({
            "today": today,
            "habits": entries,
            "unreadable": unreadable,
        }))
    }

    #[tool(
        description = "Carry last month's unfinished targets into the current month. Safe to call repeatedly; already-migrated targets are skipped."
    )]
    async fn cadence_migrate(&self) -> Result<CallToolResult, McpError> {
        let state = self.state.lock().await;
        let today = state.resolver()?.today();
        let report =
            TargetLifecycleMigrator::run(&state.store, &state.user, today).map_err(engine_error)?;
        json_result(&report)
    }

    #[tool(
        description = "Today's action tree. Items finished before today are cleared. The visitor view keeps only public items and reports how many private ones were hidden."
    )]
    async fn cadence_actions(
        &self,
        Parameters(req): Parameters<ActionsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let viewer = match req.viewer.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("owner") => Viewer::Owner,
            Some("visitor") => Viewer::Visitor,
            Some(other) => {
                return Err(McpError::invalid_params(
                    format!("viewer must be 'owner' or 'visitor', got '{other}'"),
                    None,
                ));
            }
        };

        let state = self.state.lock().await;
        let start = state.resolver()?.start_of_day().map_err(engine_error)?;
        let forest = state
            .store
            .fetch_action_tree(&state.user)
            .map_err(store_error)?;
        json_result(&daily_view(&forest, start, viewer))
    }
}

#[tool_handler]
impl ServerHandler for CadenceServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Habit tracker with streaks and monthly targets.\n\n\
                 DAILY FLOW:\n\
                 1. Call cadence_process once at the start of a session. It advances every habit to today.\n\
                 2. For each habit in grace_habits, ask the user whether they did it yesterday, \
                    then call cadence_resolve with outcome \"done\" or \"missed\".\n\
                 3. Use cadence_complete when the user reports doing a habit today, \
                    cadence_undo to take it back.\n\
                 4. At the start of a month, call cadence_migrate to carry unfinished targets forward."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
