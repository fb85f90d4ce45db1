//! Messaging-layer bootstrap: corosync configuration and restart sequencing.
//!
//! All files are replaced atomically (temp file in the destination directory
//! plus rename) so no partially written state is ever visible, and the
//! authentication key is written with owner-only permissions.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::time;

use crate::error::{HaError, HaResult};
use crate::host::ServiceControl;

/// Default path of the corosync configuration file
pub const COROSYNC_CONF: &str = "/etc/corosync/corosync.conf";

/// Default path of the corosync default-enablement file
pub const COROSYNC_DEFAULT: &str = "/etc/default/corosync";

/// Default path of the corosync authentication key
pub const COROSYNC_AUTHKEY: &str = "/etc/corosync/authkey";

/// Pause between restarting corosync and starting pacemaker under the
/// split-service scheme
const PACEMAKER_START_DELAY: Duration = Duration::from_secs(2);

/// The quorum-relevant connection tuple assembled from peer and local data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorosyncSettings {
    /// Network address corosync binds its totem interface to
    pub bind_address: String,
    /// Multicast port for the totem protocol
    pub mcast_port: u16,
    /// Multicast group address
    pub mcast_address: String,
    /// Pacemaker service scheme version
    pub pcmk_version: u32,
}

impl CorosyncSettings {
    /// Render the corosync configuration file contents
    pub fn render(&self) -> String {
        format!(
            "# Managed by the hacluster charm; local changes will be overwritten.\n\
             totem {{\n\
             \tversion: 2\n\
             \ttoken: 3000\n\
             \ttoken_retransmits_before_loss_const: 10\n\
             \tjoin: 60\n\
             \tconsensus: 3600\n\
             \tvsftype: none\n\
             \tmax_messages: 20\n\
             \tclear_node_high_bit: yes\n\
             \tsecauth: on\n\
             \tthreads: 0\n\
             \trrp_mode: none\n\
             \tinterface {{\n\
             \t\tringnumber: 0\n\
             \t\tbindnetaddr: {bind}\n\
             \t\tmcastaddr: {mcast}\n\
             \t\tmcastport: {port}\n\
             \t}}\n\
             }}\n\
             \n\
             amf {{\n\
             \tmode: disabled\n\
             }}\n\
             \n\
             service {{\n\
             \tver: {ver}\n\
             \tname: pacemaker\n\
             }}\n\
             \n\
             logging {{\n\
             \tfileline: off\n\
             \tto_stderr: yes\n\
             \tto_logfile: no\n\
             \tto_syslog: yes\n\
             \tsyslog_facility: daemon\n\
             \tdebug: off\n\
             \ttimestamp: on\n\
             }}\n",
            bind = self.bind_address,
            mcast = self.mcast_address,
            port = self.mcast_port,
            ver = self.pcmk_version,
        )
    }
}

/// Writes the corosync bootstrap artifacts and sequences restarts
#[derive(Debug, Clone)]
pub struct CorosyncLayer {
    conf_path: PathBuf,
    default_path: PathBuf,
    authkey_path: PathBuf,
}

impl Default for CorosyncLayer {
    fn default() -> Self {
        CorosyncLayer {
            conf_path: PathBuf::from(COROSYNC_CONF),
            default_path: PathBuf::from(COROSYNC_DEFAULT),
            authkey_path: PathBuf::from(COROSYNC_AUTHKEY),
        }
    }
}

impl CorosyncLayer {
    /// Create a layer writing to the standard system paths
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a layer rooted at an alternate directory (used by tests)
    pub fn rooted_at(root: &Path) -> Self {
        CorosyncLayer {
            conf_path: root.join("corosync.conf"),
            default_path: root.join("default-corosync"),
            authkey_path: root.join("authkey"),
        }
    }

    /// Path of the rendered configuration file
    pub fn conf_path(&self) -> &Path {
        &self.conf_path
    }

    /// Write the corosync configuration from the given settings
    pub fn emit_conf(&self, settings: &CorosyncSettings) -> HaResult<()> {
        atomic_write(&self.conf_path, settings.render().as_bytes(), 0o644)?;
        log::info!("Wrote {}", self.conf_path.display());
        Ok(())
    }

    /// Write the default-enablement file
    pub fn emit_base(&self, enabled: bool) -> HaResult<()> {
        let contents = format!(
            "# Managed by the hacluster charm; local changes will be overwritten.\n\
             START={}\n",
            if enabled { "yes" } else { "no" }
        );
        atomic_write(&self.default_path, contents.as_bytes(), 0o644)
    }

    /// Decode and write the authentication key with owner-only permissions
    pub fn write_authkey(&self, key_b64: &str) -> HaResult<()> {
        let key = base64::engine::general_purpose::STANDARD.decode(key_b64.trim())?;
        atomic_write(&self.authkey_path, &key, 0o600)
    }

    /// Restart the messaging layer so all nodes share one communication
    /// domain. Under the split-service scheme pacemaker is stopped first and
    /// started again once corosync is back.
    pub async fn restart(
        &self,
        services: &dyn ServiceControl,
        pcmk_version: u32,
    ) -> HaResult<()> {
        if pcmk_version == 1 {
            if services.is_running("pacemaker").await? {
                services.stop("pacemaker").await?;
            }
            services.restart("corosync").await?;
            time::sleep(PACEMAKER_START_DELAY).await;
            services.start("pacemaker").await?;
        } else {
            services.restart("corosync").await?;
        }
        Ok(())
    }
}

/// Replace `path` atomically with `contents`, applying `mode` before the
/// rename so the final permissions are never widened mid-write.
pub fn atomic_write(path: &Path, contents: &[u8], mode: u32) -> HaResult<()> {
    let dir = path.parent().ok_or_else(|| {
        HaError::Configuration(format!("{} has no parent directory", path.display()))
    })?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file()
        .set_permissions(std::fs::Permissions::from_mode(mode))?;
    tmp.persist(path).map_err(|e| HaError::Io(e.error))?;
    Ok(())
}
