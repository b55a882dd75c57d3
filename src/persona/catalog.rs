//! Persisted persona catalog with an active-persona pointer

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use super::{
    DEFAULT_PERSONA_ID, PersonaDefinition, PersonaDraft, builtin_personas, is_builtin,
    minimal_default,
};
use crate::Result;

/// Notified whenever the active persona changes
///
/// Notifications are delivered in commit order while the catalog is
/// locked, so observers must not call back into the catalog.
pub trait PersonaObserver: Send + Sync {
    /// Called with the newly active persona
    fn persona_changed(&self, persona: &PersonaDefinition);
}

/// On-disk layout of the persona store
#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    default_persona: String,
    personas: BTreeMap<String, PersonaDefinition>,
}

#[derive(Debug, Clone)]
struct CatalogState {
    active: String,
    personas: HashMap<String, PersonaDefinition>,
}

impl CatalogState {
    fn builtins() -> Self {
        Self {
            active: DEFAULT_PERSONA_ID.to_string(),
            personas: builtin_personas()
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
        }
    }

    fn from_document(doc: StoreDocument) -> Self {
        let mut personas: HashMap<String, PersonaDefinition> = doc
            .personas
            .into_iter()
            .map(|(id, mut def)| {
                def.id.clone_from(&id);
                (id, def)
            })
            .collect();

        for builtin in builtin_personas() {
            personas.entry(builtin.id.clone()).or_insert(builtin);
        }

        let mut state = Self {
            active: doc.default_persona,
            personas,
        };
        state.repair_active();
        state
    }

    fn to_document(&self) -> StoreDocument {
        StoreDocument {
            default_persona: self.active.clone(),
            personas: self
                .personas
                .iter()
                .map(|(id, def)| (id.clone(), def.clone()))
                .collect(),
        }
    }

    /// Reset the active pointer to the default if it no longer resolves
    fn repair_active(&mut self) {
        if !self.personas.contains_key(&self.active) {
            tracing::warn!(
                active = %self.active,
                "active persona not in catalog, resetting to default"
            );
            self.active = DEFAULT_PERSONA_ID.to_string();
        }
    }

    fn active_definition(&self) -> PersonaDefinition {
        self.personas
            .get(&self.active)
            .or_else(|| self.personas.get(DEFAULT_PERSONA_ID))
            .cloned()
            .unwrap_or_else(minimal_default)
    }
}

/// Named personas plus the active one, persisted as YAML
///
/// Every mutation is written to disk before it becomes visible. Readers
/// always receive cloned definitions.
pub struct PersonaCatalog {
    path: PathBuf,
    state: RwLock<CatalogState>,
    observers: RwLock<Vec<Arc<dyn PersonaObserver>>>,
}

impl PersonaCatalog {
    /// Open the catalog stored at `path`
    ///
    /// A missing or unreadable store is regenerated from the built-in
    /// personas and written back.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let state = match load_document(&path) {
            Ok(Some(doc)) => {
                let state = CatalogState::from_document(doc);
                tracing::info!(
                    path = %path.display(),
                    count = state.personas.len(),
                    active = %state.active,
                    "loaded persona store"
                );
                state
            }
            Ok(None) => {
                tracing::info!(path = %path.display(), "no persona store, creating defaults");
                regenerate(&path)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "persona store unreadable, regenerating defaults"
                );
                regenerate(&path)
            }
        };

        Self {
            path,
            state: RwLock::new(state),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer for active-persona changes
    pub fn subscribe(&self, observer: Arc<dyn PersonaObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Path of the backing store
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persona ids mapped to their descriptions
    #[must_use]
    pub fn list(&self) -> BTreeMap<String, String> {
        self.read()
            .personas
            .iter()
            .map(|(id, def)| (id.clone(), def.description.clone()))
            .collect()
    }

    /// Look up a persona by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<PersonaDefinition> {
        self.read().personas.get(id).cloned()
    }

    /// The active persona
    #[must_use]
    pub fn active(&self) -> PersonaDefinition {
        self.read().active_definition()
    }

    /// Id of the active persona
    #[must_use]
    pub fn active_id(&self) -> String {
        self.read().active.clone()
    }

    /// Switch the active persona
    ///
    /// Returns false and changes nothing if `id` is unknown.
    pub fn set_active(&self, id: &str) -> bool {
        let mut state = self.write();
        if !state.personas.contains_key(id) {
            tracing::warn!(persona = id, "unknown persona");
            return false;
        }

        let mut next = state.clone();
        next.active = id.to_string();
        if !self.commit(&mut state, next) {
            return false;
        }

        tracing::info!(persona = id, "active persona changed");
        self.notify(&state.active_definition());
        true
    }

    /// Add or replace a custom persona
    ///
    /// Returns false for built-in ids and for drafts missing a required field.
    pub fn add(&self, id: &str, draft: PersonaDraft) -> bool {
        let id = id.trim();
        if id.is_empty() || is_builtin(id) {
            tracing::warn!(persona = id, "cannot add persona with reserved or empty id");
            return false;
        }

        let Some(definition) = draft.into_definition(id) else {
            tracing::warn!(persona = id, "persona draft missing required fields");
            return false;
        };

        let mut state = self.write();
        let mut next = state.clone();
        next.personas.insert(id.to_string(), definition);
        let replaced_active = next.active == id;
        if !self.commit(&mut state, next) {
            return false;
        }

        tracing::info!(persona = id, "persona added");
        if replaced_active {
            self.notify(&state.active_definition());
        }
        true
    }

    /// Remove a custom persona
    ///
    /// Returns false for built-in or unknown ids. Removing the active
    /// persona makes the default active.
    pub fn remove(&self, id: &str) -> bool {
        if is_builtin(id) {
            tracing::warn!(persona = id, "cannot remove built-in persona");
            return false;
        }

        let mut state = self.write();
        if !state.personas.contains_key(id) {
            return false;
        }

        let mut next = state.clone();
        next.personas.remove(id);
        let was_active = next.active == id;
        next.repair_active();
        if !self.commit(&mut state, next) {
            return false;
        }

        tracing::info!(persona = id, "persona removed");
        if was_active {
            self.notify(&state.active_definition());
        }
        true
    }

    /// Persist `next`, then make it the live state
    fn commit(&self, state: &mut CatalogState, next: CatalogState) -> bool {
        match save_document(&self.path, &next.to_document()) {
            Ok(()) => {
                *state = next;
                true
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to persist persona store"
                );
                false
            }
        }
    }

    fn notify(&self, persona: &PersonaDefinition) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.persona_changed(persona);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CatalogState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn regenerate(path: &Path) -> CatalogState {
    let state = CatalogState::builtins();
    if let Err(e) = save_document(path, &state.to_document()) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to write default persona store"
        );
    }
    state
}

fn load_document(path: &Path) -> Result<Option<StoreDocument>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_yaml::from_str(&content)?))
}

/// Write the store through a temp file in the same directory, then rename
fn save_document(path: &Path, doc: &StoreDocument) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let yaml = serde_yaml::to_string(doc)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(yaml.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
