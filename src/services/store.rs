use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{NewServer, ServerDefinition, ServerUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed server file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server '{0}' not found")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ServerFile {
    #[serde(default)]
    servers: Vec<ServerDefinition>,
}

/// Server definitions kept in a pretty-printed JSON file.
///
/// Every operation re-reads the file under an async mutex, so edits made by
/// hand between requests are picked up and concurrent writers never interleave.
pub struct ServerStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ServerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn list(&self) -> Result<Vec<ServerDefinition>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.servers)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ServerDefinition>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.servers.into_iter().find(|s| s.id == id))
    }

    pub async fn create(&self, req: NewServer) -> Result<ServerDefinition, StoreError> {
        req.validate().map_err(StoreError::Invalid)?;

        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;

        let server = ServerDefinition {
            id: new_id(),
            name: req.name,
            description: req.description.unwrap_or_default(),
            command: req.command,
            cwd: req.cwd,
            port: req.port,
            auto_start: req.auto_start,
            shell: req.shell.unwrap_or(true),
            created_at: Utc::now(),
            updated_at: None,
        };
        file.servers.push(server.clone());
        self.write(&file).await?;

        log::info!("Created server '{}' ({})", server.name, server.id);
        Ok(server)
    }

    pub async fn update(&self, id: &str, update: ServerUpdate) -> Result<ServerDefinition, StoreError> {
        update.validate().map_err(StoreError::Invalid)?;

        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        let server = file
            .servers
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        update.apply(server);
        server.updated_at = Some(Utc::now());
        let updated = server.clone();
        self.write(&file).await?;

        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<ServerDefinition, StoreError> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        let index = file
            .servers
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let removed = file.servers.remove(index);
        self.write(&file).await?;

        log::info!("Deleted server '{}' ({})", removed.name, removed.id);
        Ok(removed)
    }

    async fn read(&self) -> Result<ServerFile, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(ServerFile::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ServerFile::default()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn write(&self, file: &ServerFile) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let data = serde_json::to_vec_pretty(file)?;
        tokio::fs::write(&self.path, data)
            .await
            .map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn new_id() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("server-{}-{}", Utc::now().timestamp_millis(), suffix)
}
