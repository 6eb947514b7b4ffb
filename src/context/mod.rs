// ============================================================================
// Caller Context
// ============================================================================
//
// Attribution data shared by the retry engine and the transaction monitor.
// The host application scopes a `ContextSlot` per request and both subsystems
// read it when they build their records.
//
// ============================================================================

use serde::Serialize;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// HTTP request attribution. Every field is optional and only set when the
/// work runs on behalf of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallerContext {
    pub method: Option<String>,
    pub route_name: Option<String>,
    pub url: Option<String>,
    pub user_id: Option<String>,
}

impl CallerContext {
    pub fn request(method: &str, url: &str) -> Self {
        Self {
            method: Some(method.to_string()),
            url: Some(url.to_string()),
            ..Self::default()
        }
    }

    pub fn route(mut self, route_name: &str) -> Self {
        self.route_name = Some(route_name.to_string());
        self
    }

    pub fn user(mut self, user_id: impl ToString) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.method.is_none()
            && self.route_name.is_none()
            && self.url.is_none()
            && self.user_id.is_none()
    }
}

#[derive(Debug, Clone, Default)]
struct SlotState {
    label: Option<String>,
    caller: Option<CallerContext>,
}

tokio::task_local! {
    static SCOPED: RefCell<SlotState>;
}

/// Well-known slot holding the current transaction label and caller.
///
/// Inside [`ContextSlot::scope_label`] or [`ContextSlot::scope_caller`] the
/// values live in a task-local scope, so concurrent invocations never see each
/// other's label or caller and nothing survives the scope. Outside any scope
/// the setters write the slot's process default, which every clone shares.
#[derive(Debug, Clone, Default)]
pub struct ContextSlot {
    defaults: Arc<Mutex<SlotState>>,
}

impl ContextSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        let label = label.into();
        self.update(|state| state.label = Some(label));
    }

    pub fn clear_label(&self) {
        self.update(|state| state.label = None);
    }

    pub fn label(&self) -> Option<String> {
        self.snapshot().label
    }

    pub fn set_caller(&self, caller: CallerContext) {
        self.update(|state| state.caller = Some(caller));
    }

    pub fn clear_caller(&self) {
        self.update(|state| state.caller = None);
    }

    pub fn caller(&self) -> Option<CallerContext> {
        self.snapshot().caller
    }

    pub fn is_scoped(&self) -> bool {
        SCOPED.try_with(|_| ()).is_ok()
    }

    /// Runs `fut` with `label` as the current label. `None` keeps the label
    /// visible at the call site. The caller is inherited.
    pub async fn scope_label<F: Future>(&self, label: Option<String>, fut: F) -> F::Output {
        let mut state = self.snapshot();
        if label.is_some() {
            state.label = label;
        }
        SCOPED.scope(RefCell::new(state), fut).await
    }

    /// Runs `fut` on behalf of `caller`, typically one request.
    pub async fn scope_caller<F: Future>(&self, caller: CallerContext, fut: F) -> F::Output {
        let mut state = self.snapshot();
        state.caller = Some(caller);
        SCOPED.scope(RefCell::new(state), fut).await
    }

    fn snapshot(&self) -> SlotState {
        match SCOPED.try_with(|cell| cell.borrow().clone()) {
            Ok(state) => state,
            Err(_) => self
                .defaults
                .lock()
                .map(|state| state.clone())
                .unwrap_or_default(),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut SlotState)) {
        if self.is_scoped() {
            SCOPED.with(|cell| apply(&mut cell.borrow_mut()));
        } else if let Ok(mut state) = self.defaults.lock() {
            apply(&mut state);
        }
    }
}

/// Captures the current call stack as at most `depth` frame lines.
pub fn capture_stack(depth: usize) -> Vec<String> {
    if depth == 0 {
        return Vec::new();
    }
    let rendered = Backtrace::force_capture().to_string();
    truncate_frames(&rendered, depth)
}

fn truncate_frames(rendered: &str, depth: usize) -> Vec<String> {
    rendered
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("at "))
        .take(depth)
        .map(str::to_string)
        .collect()
}
