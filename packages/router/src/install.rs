// ABOUTME: Installer backend that dispatches ledger requests through the sandbox driver
// ABOUTME: apt goes through the staged helper script, pip straight to the package manager

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use buildforge_ledger::{InstallRunner, InstallTool, PackageRequest};
use buildforge_sandbox::{ExecRequest, SandboxDriver};
use buildforge_trace::RecordKind;

/// Dispatches installs as mutating sandbox commands, recorded as installer
/// records so recipe synthesis can re-render them.
pub struct DriverInstallRunner<'a> {
    driver: &'a mut (dyn SandboxDriver + Send),
    install_timeout: Duration,
}

impl<'a> DriverInstallRunner<'a> {
    pub fn new(driver: &'a mut (dyn SandboxDriver + Send), install_timeout: Duration) -> Self {
        Self {
            driver,
            install_timeout,
        }
    }
}

/// Shell line for one install dispatch.
pub fn install_command(request: &PackageRequest, tool: InstallTool) -> String {
    match tool {
        InstallTool::Apt => match request.constraint.as_deref() {
            Some(constraint) => format!(
                "bash /home/tools/apt_install.sh {} \"{}\"",
                request.name, constraint
            ),
            None => format!("bash /home/tools/apt_install.sh {}", request.name),
        },
        InstallTool::Pip => format!("pip install \"{}\"", request.display_name()),
    }
}

#[async_trait]
impl InstallRunner for DriverInstallRunner<'_> {
    async fn install(&mut self, request: &PackageRequest, tool: InstallTool) -> (bool, String) {
        let command = install_command(request, tool);
        debug!(%command, "dispatching installer");
        let exec = ExecRequest::shell(command, true)
            .with_kind(RecordKind::Installer {
                tool: tool.to_string(),
                package: request.name.clone(),
                constraint: request.constraint.clone(),
            })
            .with_timeout(self.install_timeout);

        match self.driver.execute(exec).await {
            Ok(outcome) => (outcome.status.is_success(), outcome.text),
            // Fold transport errors into a failing output; the drain's
            // retry classifier treats them like any other failure text.
            Err(e) => (false, format!("installer dispatch failed: {e}")),
        }
    }
}
