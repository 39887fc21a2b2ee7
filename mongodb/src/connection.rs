//! MongoDB connection management with pool configuration

use std::time::Duration;

use bson::doc;
use mongodb::{
    options::{ClientOptions, ServerApi, ServerApiVersion},
    Client, Database,
};
use tracing::info;

use atomicdoc_common::{StoreError, StoreResult};

use crate::error::store_error;

/// Database used when the connection string names none.
pub const FALLBACK_DATABASE: &str = "test";

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed
    pub max_idle_time: Option<Duration>,
    /// Connection timeout
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(2),
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("atomicdoc".to_string()),
        }
    }
}

impl PoolConfig {
    /// Copy the configured values onto parsed client options.
    pub fn apply(&self, client_options: &mut ClientOptions) {
        if let Some(min) = self.min_pool_size {
            client_options.min_pool_size = Some(min);
        }
        if let Some(max) = self.max_pool_size {
            client_options.max_pool_size = Some(max);
        }
        if let Some(idle) = self.max_idle_time {
            client_options.max_idle_time = Some(idle);
        }
        if let Some(connect) = self.connect_timeout {
            client_options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = self.server_selection_timeout {
            client_options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = &self.app_name {
            client_options.app_name = Some(app.clone());
        }
    }
}

/// MongoDB connection manager with pooling support
#[derive(Debug, Clone)]
pub struct Connection {
    client: Client,
    database: Database,
}

impl Connection {
    /// Create a new MongoDB connection with default pool settings
    pub async fn new(connection_string: &str) -> StoreResult<Self> {
        Self::with_config(connection_string, PoolConfig::default()).await
    }

    /// Create a new MongoDB connection with custom pool configuration
    pub async fn with_config(connection_string: &str, config: PoolConfig) -> StoreResult<Self> {
        let mut client_options = ClientOptions::parse(connection_string)
            .await
            .map_err(|e| StoreError::Connection(format!("Invalid connection string: {}", e)))?;
        config.apply(&mut client_options);

        // Stable API keeps server behaviour fixed across upgrades
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let database = client
            .default_database()
            .unwrap_or_else(|| client.database(FALLBACK_DATABASE));

        info!(database = %database.name(), "MongoDB client created");

        Ok(Self { client, database })
    }

    /// Get a reference to the default database
    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get a database by name on the same client
    pub fn use_database(&self, name: &str) -> Database {
        self.client.database(name)
    }

    /// Check if the deployment answers a ping
    pub async fn ping(&self) -> StoreResult<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| match store_error(e, "") {
                StoreError::Internal(message) => StoreError::Connection(message),
                other => other,
            })
    }

    /// Close the pool. Outstanding sessions are ended first.
    pub async fn disconnect(self) {
        info!("Closing MongoDB client");
        self.client.shutdown().await;
    }
}
