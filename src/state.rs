use crate::cli::CommandArgs;
use crate::services::{ServerControl, ServerStore, Supervisor, SupervisorConfig};
use std::sync::Arc;

pub struct AppStateInner {
    pub store: Arc<ServerStore>,
    pub control: ServerControl,
}

pub type AppState = Arc<AppStateInner>;

pub fn new_state(args: &CommandArgs) -> AppState {
    let store = Arc::new(ServerStore::new(&args.data_file));
    let supervisor = Supervisor::new(SupervisorConfig::default());

    Arc::new(AppStateInner {
        control: ServerControl::new(store.clone(), supervisor),
        store,
    })
}

#[cfg(test)]
pub fn state_for(store: ServerStore) -> AppState {
    let store = Arc::new(store);
    Arc::new(AppStateInner {
        control: ServerControl::new(store.clone(), Supervisor::default()),
        store,
    })
}
