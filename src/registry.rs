use crate::debounce::Debouncer;
use crate::error::GenerateError;
use crate::ollama::{Model, OllamaClient, Timeouts};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Checking,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Checking => "Checking...",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
        }
    }
}

/// Session settings the registry starts from.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    pub base_url: String,
    pub selected_model: String,
    pub timeouts: Timeouts,
    pub debounce: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: crate::ollama::DEFAULT_BASE_URL.to_string(),
            selected_model: String::new(),
            timeouts: Timeouts::default(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Read-only copy of the registry state handed to renderers.
#[derive(Clone, Debug)]
pub struct RegistrySnapshot {
    pub base_url: String,
    pub models: Vec<Model>,
    pub selected_model: String,
    pub connection: ConnectionState,
    pub loading_models: bool,
}

struct RegistryState {
    base_url: String,
    models: Vec<Model>,
    selected_model: String,
    connection: ConnectionState,
    // Refreshes in flight that asked for the loading indicator.
    loading_requests: usize,
    // Bumped on every base URL change; results tagged with an older epoch are dropped.
    epoch: u64,
}

struct Inner {
    client: OllamaClient,
    state: Mutex<RegistryState>,
    debouncer: Debouncer,
    debounce: Duration,
}

/// Owns the server URL, the model list, the selection and the connection
/// state. Every call to the inference server goes through here.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn new(config: RegistryConfig, runtime: Handle) -> Result<Self> {
        let client = OllamaClient::new(config.timeouts)?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                state: Mutex::new(RegistryState {
                    base_url: config.base_url,
                    models: Vec::new(),
                    selected_model: config.selected_model,
                    connection: ConnectionState::Checking,
                    loading_requests: 0,
                    epoch: 0,
                }),
                debouncer: Debouncer::new(runtime),
                debounce: config.debounce,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `update` only if no base URL change happened since `epoch`.
    fn apply_if_current(&self, epoch: u64, update: impl FnOnce(&mut RegistryState)) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch {
            debug!(epoch, current = state.epoch, "discarding stale server response");
            return false;
        }
        update(&mut state);
        true
    }

    pub fn state(&self) -> RegistrySnapshot {
        let state = self.lock();
        RegistrySnapshot {
            base_url: state.base_url.clone(),
            models: state.models.clone(),
            selected_model: state.selected_model.clone(),
            connection: state.connection,
            loading_models: state.loading_requests > 0,
        }
    }

    pub fn base_url(&self) -> String {
        self.lock().base_url.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock().connection
    }

    pub fn selected_model(&self) -> String {
        self.lock().selected_model.clone()
    }

    pub fn models(&self) -> Vec<Model> {
        self.lock().models.clone()
    }

    pub fn is_loading_models(&self) -> bool {
        self.lock().loading_requests > 0
    }

    /// Stores the URL and schedules a connection check once edits settle.
    pub fn set_base_url(&self, url: impl Into<String>) {
        let url = url.into();
        {
            let mut state = self.lock();
            if state.base_url == url {
                return;
            }
            state.base_url = url;
            state.epoch += 1;
            debug!(base_url = %state.base_url, epoch = state.epoch, "base url changed");
        }
        self.schedule_check();
    }

    pub fn schedule_check(&self) {
        let registry = self.clone();
        self.inner.debouncer.schedule(self.inner.debounce, async move {
            registry.check_connection().await;
        });
    }

    /// Accepts a name from the current model list, or an empty name to clear.
    pub fn select_model(&self, name: &str) -> bool {
        let mut state = self.lock();
        if state.selected_model == name {
            return false;
        }
        if !name.is_empty() && !state.models.iter().any(|model| model.name == name) {
            warn!(model = name, "ignoring selection of unknown model");
            return false;
        }
        state.selected_model = name.to_string();
        true
    }

    pub async fn check_connection(&self) {
        let (base_url, epoch) = {
            let mut state = self.lock();
            state.connection = ConnectionState::Checking;
            (state.base_url.clone(), state.epoch)
        };

        match self.inner.client.version(&base_url).await {
            Ok(version) => {
                let current = self.apply_if_current(epoch, |state| {
                    state.connection = ConnectionState::Connected;
                });
                if !current {
                    return;
                }
                info!(%base_url, version = version.as_deref().unwrap_or("unknown"), "connected to server");
                self.refresh_models(false).await;
            }
            Err(err) => {
                warn!(%base_url, "connection check failed: {err:#}");
                self.apply_if_current(epoch, |state| {
                    state.connection = ConnectionState::Disconnected;
                });
            }
        }
    }

    /// Replaces the model list. `show_loading` only drives the loading flag.
    pub async fn refresh_models(&self, show_loading: bool) {
        let (base_url, epoch) = {
            let mut state = self.lock();
            if show_loading {
                state.loading_requests += 1;
            }
            (state.base_url.clone(), state.epoch)
        };

        let result = self.inner.client.list_models(&base_url).await;

        self.apply_if_current(epoch, |state| match result {
            Ok(models) => {
                state.models = dedupe_models(models);
                state.connection = ConnectionState::Connected;
                reconcile_selection(state);
                debug!(count = state.models.len(), selected = %state.selected_model, "models refreshed");
            }
            Err(err) => {
                warn!(%base_url, "fetching models failed: {err:#}");
                state.models.clear();
                state.connection = ConnectionState::Disconnected;
            }
        });

        if show_loading {
            let mut state = self.lock();
            state.loading_requests = state.loading_requests.saturating_sub(1);
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let (base_url, model, epoch) = {
            let state = self.lock();
            (
                state.base_url.clone(),
                state.selected_model.clone(),
                state.epoch,
            )
        };

        if model.is_empty() {
            return Err(GenerateError::NoModelSelected);
        }

        match self.inner.client.generate(&base_url, &model, prompt).await {
            Ok(text) => Ok(text),
            Err(err) => {
                warn!(%base_url, %model, "generation failed: {err}");
                if err.is_connectivity() {
                    self.apply_if_current(epoch, |state| {
                        state.connection = ConnectionState::Disconnected;
                    });
                }
                Err(err)
            }
        }
    }

    /// Like [`Registry::generate`], with failures turned into displayable text.
    pub async fn generate_message(&self, prompt: &str) -> String {
        match self.generate(prompt).await {
            Ok(text) => text,
            Err(err) => err.to_string(),
        }
    }
}

fn dedupe_models(models: Vec<Model>) -> Vec<Model> {
    let mut seen = HashSet::new();
    models
        .into_iter()
        .filter(|model| !model.name.is_empty() && seen.insert(model.name.clone()))
        .collect()
}

fn reconcile_selection(state: &mut RegistryState) {
    let still_listed = state
        .models
        .iter()
        .any(|model| model.name == state.selected_model);
    if still_listed {
        return;
    }

    state.selected_model = state
        .models
        .first()
        .map(|model| model.name.clone())
        .unwrap_or_default();
}
