//! Cached catalog connection with liveness validation.
//!
//! The client is an optimization only: it survives between uses inside
//! one process, but every [`CatalogPool::database`] call pings it before
//! handing it out and transparently reconnects when the ping fails.
//! Validity is never assumed from prior use.

use std::time::Duration;

use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use tokio::sync::Mutex;

/// Database name used when the connection URI does not carry one.
const DEFAULT_DATABASE: &str = "tourbuild";

/// How long server selection may take before a connect attempt fails.
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Ceiling on establishing a single connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the catalog connection layer.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Connecting to (or pinging) the catalog failed.
    #[error("Catalog connection failed: {0}")]
    Connection(String),

    /// A read against the catalog failed.
    #[error("Catalog query failed: {0}")]
    Query(String),
}

/// Process-owned catalog connection resource.
pub struct CatalogPool {
    uri: String,
    cached: Mutex<Option<Client>>,
}

impl CatalogPool {
    /// Create a pool for the given connection URI. No connection is
    /// established until [`database`](Self::database) is called.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            cached: Mutex::new(None),
        }
    }

    /// Return a live database handle.
    ///
    /// Reuses the cached client when it still answers a ping;
    /// reconnects otherwise. The database is the URI's default
    /// database, falling back to `tourbuild`.
    pub async fn database(&self) -> Result<Database, CatalogError> {
        let mut cached = self.cached.lock().await;

        if let Some(client) = cached.as_ref() {
            let db = Self::select_database(client);
            match db.run_command(doc! { "ping": 1 }).await {
                Ok(_) => {
                    tracing::debug!("Reusing cached catalog connection");
                    return Ok(db);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Cached catalog connection failed liveness check; reconnecting",
                    );
                    *cached = None;
                }
            }
        }

        let client = self.connect().await?;
        let db = Self::select_database(&client);

        // Fail now rather than on the first real query.
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| CatalogError::Connection(e.to_string()))?;

        tracing::info!("Connected to catalog");
        *cached = Some(client);
        Ok(db)
    }

    async fn connect(&self) -> Result<Client, CatalogError> {
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| CatalogError::Connection(e.to_string()))?;
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        options.connect_timeout = Some(CONNECT_TIMEOUT);

        Client::with_options(options).map_err(|e| CatalogError::Connection(e.to_string()))
    }

    fn select_database(client: &Client) -> Database {
        client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE))
    }
}
