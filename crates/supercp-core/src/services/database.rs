use std::sync::OnceLock;
use tracing::{debug, info};

use super::{ServiceContext, find, query};
use crate::agent::AgentCommand;
use crate::boundary;
use crate::error::{Result, ServiceError, ValidationError};
use crate::model::{DatabaseRecord, NewDatabase, Owner, ResourceKind, ResourceStatus};
use crate::password::hash_password;
use crate::validation;

const MAX_NAME_LEN: usize = 64;
const MIN_PASSWORD_LEN: usize = 8;
const DEFAULT_MAX_CONNECTIONS: u32 = 100;
const MAX_CONNECTIONS_LIMIT: u32 = 10_000;
const SUPPORTED_TYPE: &str = "mysql";

/// MySQL databases with one dedicated user each
#[derive(Clone, Debug)]
pub struct DatabaseService {
    ctx: ServiceContext,
}

impl DatabaseService {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Create a database and its user
    ///
    /// The user name is derived from the database name and the owner id.
    pub async fn create(
        &self,
        owner: &Owner,
        input: &NewDatabase,
    ) -> Result<DatabaseRecord, ServiceError> {
        validation::identifier("name", &input.name, MAX_NAME_LEN)?;
        validation::password("password", input.password.expose(), MIN_PASSWORD_LEN)?;
        let db_type = input.db_type.as_deref().unwrap_or(SUPPORTED_TYPE);
        if db_type != SUPPORTED_TYPE {
            return Err(ValidationError::new(
                "db_type",
                format!("unsupported database type: {db_type}"),
            )
            .into());
        }
        let max_connections = check_max_connections(
            input.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
        )?;
        let name = input.name.as_str();

        let existing = query(
            format!("Failed to look up database: {name}"),
            self.ctx.store.database_by_name(name),
        )
        .await?;
        if existing.is_some() {
            return Err(ValidationError::new("name", "Database already exists").into());
        }

        let db_user = database_user(name, owner.id);
        let created = OnceLock::new();
        let created = &created;
        let store = &self.ctx.store;

        let database = boundary::execute_with_rollback(
            format!("Failed to create database: {name}"),
            async {
                let hash = hash_password(&input.password)?;
                let database = store
                    .insert_database(
                        owner.id,
                        name,
                        &db_user,
                        &hash,
                        db_type,
                        max_connections,
                        ResourceStatus::Pending,
                    )
                    .await?;
                let _ = created.set(database.id);

                self.ctx
                    .agent
                    .send(AgentCommand::CreateDatabase {
                        name: name.to_string(),
                        user: db_user.clone(),
                        password: input.password.clone(),
                        db_type: db_type.to_string(),
                    })
                    .await?;
                info!(name = name, db_user = %db_user, "Database created on system agent");

                store
                    .set_status(ResourceKind::Database, database.id, ResourceStatus::Active)
                    .await?;
                self.reload(database.id).await
            },
            |cause| async move {
                if let Some(id) = created.get() {
                    self.ctx.mark_failed(ResourceKind::Database, *id, &cause).await;
                }
            },
        )
        .await?;

        info!(name = %database.name, user_id = owner.id, "Database created");
        Ok(database)
    }

    /// Drop on the server, then delete the row
    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        let database = self.get(id).await?;

        boundary::execute(format!("Failed to delete database: {}", database.name), async {
            self.ctx
                .agent
                .send(AgentCommand::DeleteDatabase {
                    name: database.name.clone(),
                })
                .await?;
            info!(name = %database.name, "Database deleted from system agent");

            self.ctx.store.delete_database(database.id).await
        })
        .await?;

        info!(name = %database.name, "Database deleted");
        Ok(())
    }

    /// Panel-side limit only; nothing is pushed to the server
    pub async fn update_max_connections(
        &self,
        id: i64,
        max_connections: u32,
    ) -> Result<DatabaseRecord, ServiceError> {
        let max_connections = check_max_connections(max_connections)?;
        let database = self.get(id).await?;

        let database = boundary::execute(
            format!("Failed to update database: {}", database.name),
            async {
                self.ctx
                    .store
                    .set_database_max_connections(database.id, max_connections)
                    .await?;
                self.reload(database.id).await
            },
        )
        .await?;

        info!(name = %database.name, max_connections = max_connections, "Database max connections updated");
        Ok(database)
    }

    /// Ask the server for the data plus index size and store it
    pub async fn refresh_size(&self, id: i64) -> Result<i64, ServiceError> {
        let database = self.get(id).await?;

        let size = boundary::execute(
            format!("Failed to update size for database {}", database.name),
            async {
                let size: u64 = self
                    .ctx
                    .agent
                    .send_as(AgentCommand::GetDatabaseSize {
                        name: database.name.clone(),
                    })
                    .await?;
                let size = i64::try_from(size).unwrap_or(i64::MAX);
                self.ctx.store.set_database_size(database.id, size).await?;
                Ok(size)
            },
        )
        .await?;

        debug!(name = %database.name, size_bytes = size, "Database size refreshed");
        Ok(size)
    }

    pub async fn get(&self, id: i64) -> Result<DatabaseRecord, ServiceError> {
        find(format!("database #{id}"), self.ctx.store.database(id)).await
    }

    pub async fn list(&self, owner: Option<&Owner>) -> Result<Vec<DatabaseRecord>, ServiceError> {
        query(
            "Failed to list databases".to_string(),
            self.ctx.store.list_databases(owner.map(|o| o.id)),
        )
        .await
    }

    async fn reload(&self, id: i64) -> Result<DatabaseRecord> {
        self.ctx
            .store
            .database(id)
            .await?
            .ok_or_else(|| crate::Error::not_found(format!("database #{id}")))
    }
}

/// `<first 8 chars of name>_<owner id, zero padded to 4>`
fn database_user(name: &str, owner_id: i64) -> String {
    let prefix: String = name.chars().take(8).collect();
    format!("{prefix}_{owner_id:04}")
}

fn check_max_connections(value: u32) -> Result<u32, ValidationError> {
    if (1..=MAX_CONNECTIONS_LIMIT).contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::new(
            "max_connections",
            format!("must be between 1 and {MAX_CONNECTIONS_LIMIT}"),
        ))
    }
}
