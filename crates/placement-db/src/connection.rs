//! Connection to a SurrealDB server over WebSocket.

use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tracing::info;

use crate::error::DbError;

/// Where the placement database lives and how to sign in to it.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// `host:port` of the server.
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:8000".into(),
            namespace: "placement".into(),
            database: "main".into(),
            username: "root".into(),
            password: "root".into(),
        }
    }
}

/// A signed-in client with the placement schema applied.
#[derive(Clone)]
pub struct DbManager {
    db: Surreal<Client>,
}

impl DbManager {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let db = Surreal::new::<Ws>(&config.url).await?;
        db.signin(Root {
            username: config.username.clone(),
            password: config.password.clone(),
        })
        .await?;
        db.use_ns(&config.namespace).use_db(&config.database).await?;

        crate::run_migrations(&db).await?;

        info!(
            url = %config.url,
            namespace = %config.namespace,
            database = %config.database,
            "Connected to placement database"
        );
        Ok(Self { db })
    }

    pub fn client(&self) -> &Surreal<Client> {
        &self.db
    }
}
