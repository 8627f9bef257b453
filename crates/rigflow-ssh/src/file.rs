//! Remote file access through an existing client

use crate::client::SshClient;
use crate::command::ExecOptions;
use crate::env::shell_escape;
use crate::error::Result;

/// A path on the remote host
///
/// Every operation goes through the owning client, so no second session is
/// opened.
pub struct RemoteFile<'a> {
    client: &'a SshClient,
    path: String,
}

impl<'a> RemoteFile<'a> {
    pub(crate) fn new(client: &'a SshClient, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    fn escaped(&self) -> String {
        shell_escape(&self.path)
    }

    pub async fn exists(&self) -> Result<bool> {
        self.client
            .exec_bool(&format!("sudo test -e {}", self.escaped()), ExecOptions::default())
            .await
    }

    pub async fn read(&self) -> Result<String> {
        self.client
            .exec_or_fail(&format!("sudo cat -- {}", self.escaped()), ExecOptions::default())
            .await
    }

    /// Replace the file content
    pub async fn write(&self, content: &str) -> Result<()> {
        self.client
            .exec_or_fail(
                &format!("sudo tee -- {} > /dev/null", self.escaped()),
                ExecOptions::default().with_stdin(content),
            )
            .await?;
        Ok(())
    }

    pub async fn unlink(&self) -> Result<()> {
        self.client
            .exec_or_fail(&format!("sudo rm -f -- {}", self.escaped()), ExecOptions::default())
            .await?;
        Ok(())
    }

    pub async fn chmod(&self, mode: &str) -> Result<()> {
        self.client
            .exec_or_fail(
                &format!("sudo chmod {} -- {}", shell_escape(mode), self.escaped()),
                ExecOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Move the file, returning a handle to the new path
    pub async fn move_to(self, target: &str) -> Result<RemoteFile<'a>> {
        self.client
            .exec_or_fail(
                &format!("sudo mv -- {} {}", self.escaped(), shell_escape(target)),
                ExecOptions::default(),
            )
            .await?;
        Ok(RemoteFile::new(self.client, target))
    }

    /// Canonical target of a symlink
    pub async fn readlink(&self) -> Result<String> {
        let out = self
            .client
            .exec_or_fail(&format!("readlink -f -- {}", self.escaped()), ExecOptions::default())
            .await?;
        Ok(out.trim().to_string())
    }
}

impl std::fmt::Display for RemoteFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.client.target().address, self.path)
    }
}
