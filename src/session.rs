//! Wallet session: ownership of the connected provider handle, the shared
//! balance value, and the persisted connection URI.
//!
//! The session is the single owner of the provider handle. Connect stores
//! it, disconnect releases it (best effort) and clears everything; the
//! persisted URI survives restarts so a session can be restored once at
//! startup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::amount::{normalize_balance, Msat};
use crate::core::history::Transaction;
use crate::provider::{WalletConnector, WalletError, WalletProvider};

// ============================================================================
// URI Store
// ============================================================================

/// Storage for the single persisted value: the wallet connection URI.
/// Absence means "not connected".
pub trait UriStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, uri: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSession {
    connection_uri: String,
}

/// File-backed store: one small JSON file under the data directory.
pub struct FileUriStore {
    path: PathBuf,
}

impl FileUriStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UriStore for FileUriStore {
    fn load(&self) -> Result<Option<String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("reading session file"),
        };
        let persisted: PersistedSession =
            serde_json::from_str(&raw).context("parsing session file")?;
        Ok(Some(persisted.connection_uri))
    }

    fn save(&self, uri: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("creating data directory")?;
        }
        let persisted = PersistedSession {
            connection_uri: uri.to_string(),
        };
        fs::write(&self.path, serde_json::to_string_pretty(&persisted)?)
            .context("writing session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("removing session file"),
        }
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryUriStore {
    uri: std::sync::Mutex<Option<String>>,
}

impl MemoryUriStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uri(uri: &str) -> Self {
        Self {
            uri: std::sync::Mutex::new(Some(uri.to_string())),
        }
    }
}

impl UriStore for MemoryUriStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.uri.lock().unwrap().clone())
    }

    fn save(&self, uri: &str) -> Result<()> {
        *self.uri.lock().unwrap() = Some(uri.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.uri.lock().unwrap() = None;
        Ok(())
    }
}

// ============================================================================
// Wallet Session
// ============================================================================

struct SessionInner {
    provider: Option<Arc<dyn WalletProvider>>,
    connection_uri: String,
    balance: Option<Msat>,
    connecting: bool,
}

/// The application-wide wallet session. Cloning shares the same state.
pub struct WalletSession {
    inner: Arc<Mutex<SessionInner>>,
    connector: Arc<dyn WalletConnector>,
    store: Arc<dyn UriStore>,
}

impl Clone for WalletSession {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            connector: Arc::clone(&self.connector),
            store: Arc::clone(&self.store),
        }
    }
}

impl WalletSession {
    pub fn new(connector: Arc<dyn WalletConnector>, store: Arc<dyn UriStore>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                provider: None,
                connection_uri: String::new(),
                balance: None,
                connecting: false,
            })),
            connector,
            store,
        }
    }

    /// Connects to the wallet behind `uri` and persists the URI.
    ///
    /// The first balance read doubles as the reachability check: a wallet
    /// that cannot answer it is treated as a failed connection and the
    /// session stays disconnected. No automatic retry.
    pub async fn connect(&self, uri: &str) -> Result<(), WalletError> {
        if uri.trim().is_empty() {
            return Err(WalletError::ConnectionFailed(
                "connection URI is empty".to_string(),
            ));
        }

        {
            let mut inner = self.inner.lock().await;
            inner.connecting = true;
        }
        let result = self.connect_inner(uri).await;
        {
            let mut inner = self.inner.lock().await;
            inner.connecting = false;
        }
        result
    }

    async fn connect_inner(&self, uri: &str) -> Result<(), WalletError> {
        let provider = self
            .connector
            .connect(uri)
            .await
            .map_err(|e| WalletError::ConnectionFailed(format!("{:#}", e)))?;

        let raw = provider
            .get_balance()
            .await
            .map_err(|e| WalletError::ConnectionFailed(format!("{:#}", e)))?;
        let balance = normalize_balance(raw);

        // Replacing an existing connection releases the old handle first.
        let old = {
            let mut inner = self.inner.lock().await;
            let old = inner.provider.take();
            inner.provider = Some(provider);
            inner.connection_uri = uri.to_string();
            inner.balance = Some(balance);
            old
        };
        if let Some(old) = old {
            if let Err(e) = old.close().await {
                warn!("failed to release previous wallet handle: {:#}", e);
            }
        }

        if let Err(e) = self.store.save(uri) {
            warn!("failed to persist connection URI: {:#}", e);
        }
        info!("wallet connected, balance {}", balance);
        Ok(())
    }

    /// Releases the provider handle and clears all session state. Always
    /// succeeds from the caller's point of view; cleanup failures are
    /// logged and swallowed. Callable when already disconnected.
    pub async fn disconnect(&self) {
        let provider = {
            let mut inner = self.inner.lock().await;
            inner.connection_uri.clear();
            inner.balance = None;
            inner.provider.take()
        };

        if let Some(provider) = provider {
            if let Err(e) = provider.close().await {
                warn!("error closing wallet connection: {:#}", e);
            }
        }

        if let Err(e) = self.store.clear() {
            warn!("failed to clear persisted connection URI: {:#}", e);
        }
        info!("wallet disconnected");
    }

    /// Restores a previously persisted session, attempting the connect
    /// exactly once. A failure clears the persisted URI and leaves the
    /// session disconnected; it is not an error for the caller.
    pub async fn restore(&self) -> bool {
        let uri = match self.store.load() {
            Ok(Some(uri)) => uri,
            Ok(None) => return false,
            Err(e) => {
                warn!("failed to read persisted session: {:#}", e);
                if let Err(e) = self.store.clear() {
                    warn!("failed to clear persisted session: {:#}", e);
                }
                return false;
            }
        };

        match self.connect(&uri).await {
            Ok(()) => {
                debug!("restored wallet session from persisted URI");
                true
            }
            Err(e) => {
                warn!("failed to reconnect wallet: {}", e);
                if let Err(e) = self.store.clear() {
                    warn!("failed to clear persisted session: {:#}", e);
                }
                false
            }
        }
    }

    /// Fetches and stores a fresh balance. On failure the prior value is
    /// retained and the error returned; there is no automatic retry.
    pub async fn refresh_balance(&self) -> Result<Msat, WalletError> {
        let provider = self.provider().await.ok_or(WalletError::NotConnected)?;
        match provider.get_balance().await {
            Ok(raw) => {
                let balance = normalize_balance(raw);
                self.set_balance(balance).await;
                Ok(balance)
            }
            Err(e) => Err(WalletError::BalanceFetchFailed(format!("{:#}", e))),
        }
    }

    pub async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        let provider = self.provider().await.ok_or(WalletError::NotConnected)?;
        provider.list_transactions().await
    }

    pub async fn provider(&self) -> Option<Arc<dyn WalletProvider>> {
        self.inner.lock().await.provider.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.provider.is_some()
    }

    pub async fn is_connecting(&self) -> bool {
        self.inner.lock().await.connecting
    }

    pub async fn connection_uri(&self) -> String {
        self.inner.lock().await.connection_uri.clone()
    }

    pub async fn balance(&self) -> Option<Msat> {
        self.inner.lock().await.balance
    }

    pub(crate) async fn set_balance(&self, balance: Msat) {
        self.inner.lock().await.balance = Some(balance);
    }
}

// ============================================================================
// Tests
// ============================================================================
