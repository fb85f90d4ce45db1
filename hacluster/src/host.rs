//! External collaborators for host-level side effects.
//!
//! Package installation and local service control are outside the core
//! algorithm; the pipeline drives them through these traits and the system
//! implementations stay thin wrappers over the platform tools.

use std::path::Path;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;

use crate::error::{HaError, HaResult};

/// Installs OS packages idempotently
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install a package if not already present
    async fn ensure_installed(&self, package: &str) -> HaResult<()>;
}

/// Controls local init-managed services
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Remove the service from init-managed startup
    async fn disable(&self, service: &str) -> HaResult<()>;

    /// Restore the service to init-managed startup
    async fn enable(&self, service: &str) -> HaResult<()>;

    /// Start the service
    async fn start(&self, service: &str) -> HaResult<()>;

    /// Stop the service
    async fn stop(&self, service: &str) -> HaResult<()>;

    /// Restart the service
    async fn restart(&self, service: &str) -> HaResult<()>;

    /// Whether the service is currently running
    async fn is_running(&self, service: &str) -> HaResult<bool>;
}

/// Package installer backed by apt
#[derive(Debug, Default)]
pub struct AptInstaller;

impl AptInstaller {
    /// Create a new apt-backed installer
    pub fn new() -> Self {
        AptInstaller
    }
}

#[async_trait]
impl PackageInstaller for AptInstaller {
    async fn ensure_installed(&self, package: &str) -> HaResult<()> {
        log::info!("Ensuring package {} is installed", package);
        let output = Command::new("apt-get")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .args(["--yes", "--quiet", "install", package])
            .output()
            .await?;
        if !output.status.success() {
            return Err(HaError::PackageInstall(format!(
                "{}: {}",
                package,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Service control backed by `service` and `update-rc.d`
#[derive(Debug, Default)]
pub struct SysvServices;

impl SysvServices {
    /// Create a new SysV-style service controller
    pub fn new() -> Self {
        SysvServices
    }

    async fn run(&self, program: &str, args: &[&str]) -> HaResult<std::process::Output> {
        Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| HaError::ServiceControl(format!("failed to spawn {}: {}", program, e)))
    }

    async fn run_checked(&self, program: &str, args: &[&str]) -> HaResult<()> {
        let output = self.run(program, args).await?;
        if !output.status.success() {
            return Err(HaError::ServiceControl(format!(
                "{} {} failed: {}",
                program,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceControl for SysvServices {
    async fn disable(&self, service: &str) -> HaResult<()> {
        log::info!("Disabling init management of service {}", service);
        self.run_checked("update-rc.d", &["-f", service, "remove"]).await
    }

    async fn enable(&self, service: &str) -> HaResult<()> {
        log::info!("Enabling init management of service {}", service);
        self.run_checked("update-rc.d", &[service, "defaults"]).await
    }

    async fn start(&self, service: &str) -> HaResult<()> {
        self.run_checked("service", &[service, "start"]).await
    }

    async fn stop(&self, service: &str) -> HaResult<()> {
        self.run_checked("service", &[service, "stop"]).await
    }

    async fn restart(&self, service: &str) -> HaResult<()> {
        self.run_checked("service", &[service, "restart"]).await
    }

    async fn is_running(&self, service: &str) -> HaResult<bool> {
        let output = self.run("service", &[service, "status"]).await?;
        Ok(output.status.success())
    }
}

/// Install a bundled file to a destination if the destination is missing.
///
/// Used for resource-agent scripts shipped alongside the charm that are not
/// yet packaged for the target platform.
pub async fn ensure_file_installed(source: &Path, dest: &Path) -> HaResult<()> {
    if fs::try_exists(dest).await? {
        return Ok(());
    }
    if !fs::try_exists(source).await? {
        log::warn!(
            "Bundled file {} missing, cannot install {}",
            source.display(),
            dest.display()
        );
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::copy(source, dest).await?;
    log::info!("Installed {} to {}", source.display(), dest.display());
    Ok(())
}
