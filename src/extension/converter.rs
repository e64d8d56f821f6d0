//! Dex to jar conversion for the desktop runtime

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::config::RuntimeConfig;
use crate::core::error::{BridgeError, Result};

/// Converts a dex container into a module the desktop runtime can load
#[async_trait]
pub trait BytecodeConverter: Send + Sync {
    async fn convert(&self, dex_path: &Path, output: &Path) -> Result<()>;
}

/// Runs the `dex2jar` command line tool
#[derive(Debug, Clone)]
pub struct Dex2JarCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl Dex2JarCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.converter_program.clone(), config.converter_args.clone())
    }
}

#[async_trait]
impl BytecodeConverter for Dex2JarCommand {
    async fn convert(&self, dex_path: &Path, output: &Path) -> Result<()> {
        tracing::debug!(
            program = %self.program.display(),
            dex = %dex_path.display(),
            output = %output.display(),
            "Running dex2jar"
        );

        let result = Command::new(&self.program)
            .args(&self.args)
            .arg("-o")
            .arg(output)
            .arg(dex_path)
            .stdin(Stdio::null())
            .output()
            .await;

        let out = match result {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BridgeError::Conversion(format!(
                    "dex2jar converter not found: {}",
                    self.program.display()
                )));
            }
            Err(e) => {
                return Err(BridgeError::Conversion(format!(
                    "Failed to run {}: {}",
                    self.program.display(),
                    e
                )));
            }
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(BridgeError::Conversion(format!(
                "dex2jar conversion failed (exit code: {}): {}",
                out.status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()),
                stderr.trim()
            )));
        }

        if !output.exists() {
            return Err(BridgeError::Conversion(format!(
                "dex2jar produced no output at {}",
                output.display()
            )));
        }

        Ok(())
    }
}
