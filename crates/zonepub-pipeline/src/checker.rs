//! Structural checker backed by external tools.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use zonepub_core::{CheckOutcome, CollaboratorError, CommandTemplates, StructuralChecker};

use crate::runner::{expand, CommandRunner};

/// Runs `check_config` / `check_zone` argument templates; exit status 0 passes.
#[derive(Debug, Clone)]
pub struct CommandChecker {
    runner: CommandRunner,
    check_config: Vec<String>,
    check_zone: Vec<String>,
}

impl CommandChecker {
    pub fn new(templates: &CommandTemplates, timeout: Option<Duration>) -> Self {
        Self {
            runner: CommandRunner::new().with_timeout(timeout),
            check_config: templates.check_config.clone(),
            check_zone: templates.check_zone.clone(),
        }
    }

    async fn check(
        &self,
        operation: &str,
        argv: Vec<String>,
    ) -> Result<CheckOutcome, CollaboratorError> {
        let output = self
            .runner
            .run(&argv)
            .await
            .map_err(|e| e.into_collaborator(operation))?;
        if output.success {
            Ok(CheckOutcome::pass())
        } else {
            Ok(CheckOutcome::fail(output.message()))
        }
    }
}

#[async_trait]
impl StructuralChecker for CommandChecker {
    async fn check_config(&self, path: &Path) -> Result<CheckOutcome, CollaboratorError> {
        let path = path.to_string_lossy();
        let argv = expand(&self.check_config, &[("path", &*path)]);
        self.check("check config", argv).await
    }

    async fn check_zone(&self, zone: &str, path: &Path) -> Result<CheckOutcome, CollaboratorError> {
        let path = path.to_string_lossy();
        let argv = expand(&self.check_zone, &[("zone", zone), ("path", &*path)]);
        self.check("check zone", argv).await
    }
}
