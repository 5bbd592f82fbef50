use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use auth::CredentialProvider;
use shared::{
    domain::RecordId,
    protocol::{Record, SelectionChanged},
};
use webapi::{CollectionFetcher, FetchError, FilterExpr};

pub use auth::Credential;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadePhase {
    Unauthenticated,
    Authenticating,
    Ready,
    LoadingChildren,
    ParentSelected,
}

/// The empty string id means nothing is chosen at that level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub parent_id: RecordId,
    pub parent_name: String,
    pub child_id: RecordId,
    pub child_name: String,
}

#[derive(Debug, Clone)]
pub struct CascadeSnapshot {
    pub phase: CascadePhase,
    pub parents: Vec<Record>,
    pub children: Vec<Record>,
    pub selection: Selection,
    pub parent_error: Option<String>,
    pub child_error: Option<String>,
}

impl CascadeSnapshot {
    pub fn child_selector_enabled(&self) -> bool {
        !self.selection.parent_id.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum CascadeEvent {
    StateChanged(CascadeSnapshot),
    SelectionChanged(SelectionChanged),
}

#[derive(Debug, Clone)]
pub struct CascadeConfig {
    pub parent_entity: String,
    pub child_entity: String,
    pub filter_field: String,
}

/// Seam between the controller and the data endpoint.
#[async_trait]
pub trait CollectionSource: Send + Sync {
    async fn collect(
        &self,
        entity: &str,
        filter: Option<FilterExpr>,
        credential: &Credential,
    ) -> Result<Vec<Record>, FetchError>;
}

#[async_trait]
impl CollectionSource for CollectionFetcher {
    async fn collect(
        &self,
        entity: &str,
        filter: Option<FilterExpr>,
        credential: &Credential,
    ) -> Result<Vec<Record>, FetchError> {
        self.fetch(entity, filter.as_ref(), credential).await
    }
}

struct CascadeState {
    phase: CascadePhase,
    parents: Vec<Record>,
    children: Vec<Record>,
    selection: Selection,
    child_epoch: u64,
    parent_error: Option<String>,
    child_error: Option<String>,
}

impl CascadeState {
    fn snapshot(&self) -> CascadeSnapshot {
        CascadeSnapshot {
            phase: self.phase,
            parents: self.parents.clone(),
            children: self.children.clone(),
            selection: self.selection.clone(),
            parent_error: self.parent_error.clone(),
            child_error: self.child_error.clone(),
        }
    }
}

/// All mutation happens under one lock, never across a network await.
pub struct CascadeController {
    provider: CredentialProvider,
    source: Arc<dyn CollectionSource>,
    config: CascadeConfig,
    inner: Mutex<CascadeState>,
    events: broadcast::Sender<CascadeEvent>,
}

impl CascadeController {
    pub fn new(
        provider: CredentialProvider,
        source: Arc<dyn CollectionSource>,
        config: CascadeConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            provider,
            source,
            config,
            inner: Mutex::new(CascadeState {
                phase: CascadePhase::Unauthenticated,
                parents: Vec::new(),
                children: Vec::new(),
                selection: Selection::default(),
                child_epoch: 0,
                parent_error: None,
                child_error: None,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CascadeEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> CascadeSnapshot {
        self.inner.lock().await.snapshot()
    }

    /// Acquire a credential, then load the parent collection. Failures
    /// degrade state instead of propagating; a call while one is already
    /// authenticating is a no-op.
    pub async fn initialize(&self) {
        let (snapshot, had_selection) = {
            let mut state = self.inner.lock().await;
            if state.phase == CascadePhase::Authenticating {
                debug!("cascade: initialize already in progress");
                return;
            }
            let had_selection = !state.selection.parent_id.is_empty();
            state.phase = CascadePhase::Authenticating;
            state.parents.clear();
            state.children.clear();
            state.selection = Selection::default();
            state.child_epoch += 1;
            state.parent_error = None;
            state.child_error = None;
            (state.snapshot(), had_selection)
        };
        self.emit_state(snapshot);
        if had_selection {
            self.emit_selection(&Selection::default());
        }

        let credential = match self.provider.get_token().await {
            Ok(credential) => credential,
            Err(err) => {
                warn!("cascade: activation failed during sign-in: {err}");
                let snapshot = {
                    let mut state = self.inner.lock().await;
                    state.phase = CascadePhase::Unauthenticated;
                    state.parent_error = Some(err.to_string());
                    state.snapshot()
                };
                self.emit_state(snapshot);
                return;
            }
        };

        let snapshot = match self
            .source
            .collect(&self.config.parent_entity, None, &credential)
            .await
        {
            Ok(parents) => {
                info!(records = parents.len(), "cascade: parent collection loaded");
                let mut state = self.inner.lock().await;
                state.phase = CascadePhase::Ready;
                state.parents = parents;
                state.parent_error = None;
                state.snapshot()
            }
            Err(err) => {
                warn!("cascade: parent collection fetch failed: {err}");
                self.note_unauthorized(&err).await;
                let mut state = self.inner.lock().await;
                state.phase = CascadePhase::Ready;
                state.parent_error = Some(err.to_string());
                state.snapshot()
            }
        };
        self.emit_state(snapshot);
    }

    /// Everything downstream of the parent is cleared under the lock before
    /// the replacement fetch is issued; an empty id clears the cascade
    /// without fetching at all. A fetch overtaken by a newer selection has
    /// its result discarded on resolution.
    pub async fn select_parent(self: &Arc<Self>, new_id: RecordId, new_name: impl Into<String>) {
        let new_name = new_name.into();
        let (snapshot, selection, epoch) = {
            let mut state = self.inner.lock().await;
            state.selection.parent_id = new_id.clone();
            state.selection.parent_name = new_name;
            state.selection.child_id = RecordId::empty();
            state.selection.child_name = String::new();
            state.children.clear();
            state.child_error = None;
            state.child_epoch += 1;
            state.phase = if new_id.is_empty() {
                CascadePhase::Ready
            } else {
                CascadePhase::LoadingChildren
            };
            (state.snapshot(), state.selection.clone(), state.child_epoch)
        };
        self.emit_state(snapshot);
        self.emit_selection(&selection);

        if new_id.is_empty() {
            debug!("cascade: parent cleared, child fetch skipped");
            return;
        }

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.load_children(new_id, epoch).await;
        });
    }

    /// Ignored unless a parent is chosen and the id names a record of the
    /// current child collection whose parent reference matches.
    pub async fn select_child(&self, new_id: RecordId, new_name: impl Into<String>) {
        let new_name = new_name.into();
        let (snapshot, selection) = {
            let mut state = self.inner.lock().await;
            if state.selection.parent_id.is_empty() {
                warn!("cascade: child selection ignored, no parent chosen");
                return;
            }
            if new_id.is_empty() {
                state.selection.child_id = RecordId::empty();
                state.selection.child_name = String::new();
            } else {
                let Some(record) = state.children.iter().find(|record| record.id == new_id)
                else {
                    warn!(
                        child = %new_id,
                        "cascade: child selection ignored, not in the current collection"
                    );
                    return;
                };
                if let Some(parent_ref) = &record.parent_ref {
                    if *parent_ref != state.selection.parent_id {
                        warn!(
                            child = %new_id,
                            "cascade: child selection ignored, parent reference mismatch"
                        );
                        return;
                    }
                }
                state.selection.child_id = new_id;
                state.selection.child_name = new_name;
            }
            (state.snapshot(), state.selection.clone())
        };
        self.emit_state(snapshot);
        self.emit_selection(&selection);
    }

    async fn load_children(&self, parent_id: RecordId, epoch: u64) {
        let outcome = match self.provider.get_token().await {
            Ok(credential) => {
                let filter = FilterExpr::eq(self.config.filter_field.as_str(), &parent_id);
                match self
                    .source
                    .collect(&self.config.child_entity, Some(filter), &credential)
                    .await
                {
                    Ok(children) => Ok(children),
                    Err(err) => {
                        self.note_unauthorized(&err).await;
                        Err(err.to_string())
                    }
                }
            }
            Err(err) => Err(err.to_string()),
        };

        let snapshot = {
            let mut state = self.inner.lock().await;
            if state.child_epoch != epoch {
                debug!(
                    epoch,
                    current = state.child_epoch,
                    parent = %parent_id,
                    "cascade: superseded child fetch dropped"
                );
                return;
            }
            match outcome {
                Ok(children) => {
                    info!(
                        records = children.len(),
                        parent = %parent_id,
                        "cascade: child collection loaded"
                    );
                    state.children = children;
                    state.child_error = None;
                }
                Err(message) => {
                    warn!(
                        parent = %parent_id,
                        "cascade: child collection fetch failed: {message}"
                    );
                    state.children.clear();
                    state.child_error = Some(message);
                }
            }
            state.phase = CascadePhase::ParentSelected;
            state.snapshot()
        };
        self.emit_state(snapshot);
    }

    async fn note_unauthorized(&self, err: &FetchError) {
        if err.status() == Some(401) {
            info!("cascade: data endpoint rejected the token, invalidating cache");
            self.provider.invalidate().await;
        }
    }

    fn emit_state(&self, snapshot: CascadeSnapshot) {
        let _ = self.events.send(CascadeEvent::StateChanged(snapshot));
    }

    fn emit_selection(&self, selection: &Selection) {
        let _ = self
            .events
            .send(CascadeEvent::SelectionChanged(SelectionChanged {
                selected_parent_name: selection.parent_name.clone(),
                selected_child_name: selection.child_name.clone(),
            }));
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
