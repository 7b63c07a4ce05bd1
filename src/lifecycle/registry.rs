use std::collections::HashMap;

use crate::db::models::ExamState;
use crate::db::types::StateName;
use crate::lifecycle::LifecycleError;
use crate::store::ExamStore;

/// Stable ids, matching the `exam_states` seed rows in the initial migration.
pub const SEED: [(i32, StateName); 3] =
    [(1, StateName::Active), (2, StateName::Inactive), (3, StateName::Finished)];

/// Read-only `StateName` <-> id mapping, loaded once at startup.
#[derive(Debug, Clone)]
pub struct StateRegistry {
    ids: HashMap<StateName, i32>,
    names: HashMap<i32, StateName>,
}

impl StateRegistry {
    /// Seeds missing rows, then loads the mapping. Fails if any state is absent.
    pub async fn load(store: &dyn ExamStore) -> Result<Self, LifecycleError> {
        store.seed_states(&SEED).await?;
        let rows = store.list_states().await?;
        Self::from_rows(&rows)
    }

    pub fn from_rows(rows: &[ExamState]) -> Result<Self, LifecycleError> {
        let mut ids = HashMap::new();
        let mut names = HashMap::new();

        for row in rows {
            match StateName::parse(&row.name) {
                Some(name) => {
                    ids.insert(name, row.id);
                    names.insert(row.id, name);
                }
                None => {
                    tracing::warn!(id = row.id, name = %row.name, "Ignoring unknown exam state")
                }
            }
        }

        for state in StateName::ALL {
            if !ids.contains_key(&state) {
                return Err(LifecycleError::UnknownState(state.as_str().to_string()));
            }
        }

        Ok(Self { ids, names })
    }

    pub fn id(&self, state: StateName) -> i32 {
        // `from_rows` guarantees every variant is present.
        self.ids.get(&state).copied().unwrap_or_default()
    }

    pub fn name(&self, id: i32) -> Result<StateName, LifecycleError> {
        self.names.get(&id).copied().ok_or_else(|| LifecycleError::UnknownState(id.to_string()))
    }
}
