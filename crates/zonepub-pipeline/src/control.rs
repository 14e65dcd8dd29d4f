//! Control plane that drives the name server through its CLI (`knotc`, `rndc`).

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;
use zonepub_core::{CollaboratorError, ControlCommands, ControlPlane};

use crate::runner::{expand, CommandRunner};

#[derive(Debug, Clone)]
pub struct CommandControlPlane {
    runner: CommandRunner,
    reload: Vec<String>,
    reload_zone: Vec<String>,
    status: Vec<String>,
}

impl CommandControlPlane {
    pub fn new(commands: &ControlCommands, timeout: Option<Duration>) -> Self {
        Self {
            runner: CommandRunner::new().with_timeout(timeout),
            reload: commands.reload.clone(),
            reload_zone: commands.reload_zone.clone(),
            status: commands.status.clone(),
        }
    }

    async fn call(&self, operation: &str, argv: &[String]) -> Result<String, CollaboratorError> {
        info!(command = %argv.join(" "), "calling control plane");
        let output = self
            .runner
            .run(argv)
            .await
            .map_err(|e| e.into_collaborator(operation))?;
        if !output.success {
            return Err(CollaboratorError::failed(operation, output.message()));
        }
        Ok(output.stdout_lossy())
    }
}

#[async_trait]
impl ControlPlane for CommandControlPlane {
    async fn reload(&self) -> Result<(), CollaboratorError> {
        self.call("reload", &self.reload).await.map(|_| ())
    }

    /// One call per zone; the first failure stops the rest.
    async fn reload_zones(&self, zones: &BTreeSet<String>) -> Result<(), CollaboratorError> {
        for zone in zones {
            let argv = expand(&self.reload_zone, &[("zone", zone.as_str())]);
            self.call(&format!("reload zone {zone}"), &argv).await?;
        }
        Ok(())
    }

    async fn status(&self) -> Result<String, CollaboratorError> {
        self.call("status", &self.status).await
    }
}
