use serde_json::Value;
use tracing::info;

use super::{ServiceContext, query};
use crate::agent::AgentCommand;
use crate::boundary;
use crate::error::ServiceError;
use crate::validation;

/// File manager surface of the agent
///
/// Paths are checked for shape only; the agent enforces what may be
/// touched.
#[derive(Clone, Debug)]
pub struct FileService {
    ctx: ServiceContext,
}

impl FileService {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn list(&self, path: &str) -> Result<Value, ServiceError> {
        validation::absolute_path("path", path)?;
        query(
            format!("Failed to list files in {path}"),
            self.ctx.agent.send(AgentCommand::ListFiles {
                path: path.to_string(),
            }),
        )
        .await
    }

    pub async fn read(&self, path: &str) -> Result<String, ServiceError> {
        validation::absolute_path("path", path)?;
        query(
            format!("Failed to read file {path}"),
            self.ctx.agent.send_for_string(AgentCommand::ReadFile {
                path: path.to_string(),
            }),
        )
        .await
    }

    pub async fn write(&self, path: &str, content: &str) -> Result<(), ServiceError> {
        validation::absolute_path("path", path)?;
        boundary::execute(
            format!("Failed to write file {path}"),
            self.ctx.agent.send(AgentCommand::WriteFile {
                path: path.to_string(),
                content: content.to_string(),
            }),
        )
        .await?;

        info!(path = path, bytes = content.len(), "File written");
        Ok(())
    }

    /// Delete a file or directory
    pub async fn delete(&self, path: &str) -> Result<(), ServiceError> {
        validation::absolute_path("path", path)?;
        boundary::execute(
            format!("Failed to delete file {path}"),
            self.ctx.agent.send(AgentCommand::DeleteFile {
                path: path.to_string(),
            }),
        )
        .await?;

        info!(path = path, "File deleted");
        Ok(())
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), ServiceError> {
        validation::absolute_path("from", from)?;
        validation::absolute_path("to", to)?;
        boundary::execute(
            format!("Failed to rename file from {from} to {to}"),
            self.ctx.agent.send(AgentCommand::RenameFile {
                from: from.to_string(),
                to: to.to_string(),
            }),
        )
        .await?;

        info!(from = from, to = to, "File renamed");
        Ok(())
    }

    pub async fn create_directory(&self, path: &str) -> Result<(), ServiceError> {
        validation::absolute_path("path", path)?;
        boundary::execute(
            format!("Failed to create directory {path}"),
            self.ctx.agent.send(AgentCommand::CreateDirectory {
                path: path.to_string(),
            }),
        )
        .await?;

        info!(path = path, "Directory created");
        Ok(())
    }
}
