//! `python_exec` — run Python code inside the sandbox microVM.
//!
//! The host talks to the guest exec agent over the VM's vsock unix socket:
//! a `CONNECT <port>` handshake, then one JSON request line (`{code}`) and
//! one JSON response line (`{stdout, stderr, files}`). The VM has no
//! network access; produced files come back base64-encoded and are
//! re-hosted on the upload service.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use marvin_core::config::SandboxConfig;

use crate::uploads::FileUploader;

use super::{Caller, Tool, ToolReply};

const VM_BOOT_ATTEMPTS: usize = 10;
const VM_BOOT_BACKOFF: Duration = Duration::from_secs(2);

pub struct SandboxExecTool {
    sandbox: SandboxConfig,
    timeout: Duration,
    uploader: FileUploader,
}

#[derive(Deserialize)]
struct Input {
    code: String,
}

#[derive(Deserialize, Default)]
struct ExecResult {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    files: Vec<ExecFile>,
}

#[derive(Deserialize)]
struct ExecFile {
    name: String,
    /// Base64-encoded content.
    data: String,
}

impl SandboxExecTool {
    pub fn new(sandbox: SandboxConfig, timeout_secs: u64, uploader: FileUploader) -> Self {
        Self {
            sandbox,
            timeout: Duration::from_secs(timeout_secs),
            uploader,
        }
    }

    /// Connect to the guest, booting the VM first when the socket is dead
    /// and a start script is configured.
    async fn connect(&self) -> Result<UnixStream, String> {
        match self.handshake().await {
            Ok(stream) => return Ok(stream),
            Err(first_err) => {
                let Some(ref script) = self.sandbox.start_script else {
                    return Err(first_err);
                };
                info!("sandbox VM not reachable, starting it");
                let status = tokio::process::Command::new(script)
                    .status()
                    .await
                    .map_err(|e| format!("could not run VM start script: {e}"))?;
                if !status.success() {
                    return Err(format!("VM start script exited with {status}"));
                }
            }
        }

        let mut last_err = String::new();
        for _ in 0..VM_BOOT_ATTEMPTS {
            tokio::time::sleep(VM_BOOT_BACKOFF).await;
            match self.handshake().await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = e,
            }
        }
        Err(format!("sandbox VM did not come up: {last_err}"))
    }

    /// Open the host-side socket and complete the vsock CONNECT exchange.
    async fn handshake(&self) -> Result<UnixStream, String> {
        let mut stream = UnixStream::connect(&self.sandbox.vsock_path)
            .await
            .map_err(|e| format!("vsock connect failed: {e}"))?;

        stream
            .write_all(format!("CONNECT {}\n", self.sandbox.vsock_port).as_bytes())
            .await
            .map_err(|e| format!("vsock handshake write failed: {e}"))?;

        let mut reader = BufReader::new(&mut stream);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| format!("vsock handshake read failed: {e}"))?;
        if !line.starts_with("OK") {
            return Err(format!("vsock handshake rejected: {}", line.trim()));
        }
        Ok(stream)
    }

    async fn run_code(&self, code: &str) -> Result<ExecResult, String> {
        let mut stream = self.connect().await?;

        let request = serde_json::to_string(&json!({ "code": code }))
            .map_err(|e| format!("request encoding failed: {e}"))?;
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| format!("sandbox write failed: {e}"))?;
        stream
            .write_all(b"\n")
            .await
            .map_err(|e| format!("sandbox write failed: {e}"))?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| format!("sandbox read failed: {e}"))?;
        if line.trim().is_empty() {
            return Err("sandbox closed the connection without a response".to_string());
        }
        serde_json::from_str(&line).map_err(|e| format!("sandbox response unreadable: {e}"))
    }
}

#[async_trait]
impl Tool for SandboxExecTool {
    fn name(&self) -> &str {
        "python_exec"
    }

    fn description(&self) -> &str {
        "Execute Python code in a secure sandboxed microVM. Full Python 3.12 with \
         matplotlib, numpy, pandas, Pillow, scipy, sympy, networkx, seaborn and \
         friends. The sandbox has NO internet access. Use for calculations, data \
         analysis, charts, diagrams, and image manipulation. Use print() for output; \
         files saved to the current directory are uploaded and returned as URLs."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python code to execute. Use print() for output. Save files to the current directory for retrieval."
                }
            },
            "required": ["code"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _caller: &Caller) -> ToolReply {
        let input: Input = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };

        debug!(code_len = input.code.len(), "sandbox execution");
        let result = match tokio::time::timeout(self.timeout, self.run_code(&input.code)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return ToolReply::error(format!("Error: {e}")),
            Err(_) => {
                warn!("sandbox execution timed out");
                return ToolReply::error(format!(
                    "Error: execution timed out after {} seconds",
                    self.timeout.as_secs()
                ));
            }
        };

        let mut out = String::new();
        if !result.stdout.is_empty() {
            out.push_str(result.stdout.trim_end());
        }
        if !result.stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("[stderr]\n");
            out.push_str(result.stderr.trim_end());
        }

        for file in result.files {
            let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(&file.data) else {
                warn!(name = %file.name, "sandbox file had undecodable data");
                continue;
            };
            match self.uploader.upload(bytes, &file.name).await {
                Ok(url) => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(&format!("File {}: {url}", file.name));
                }
                Err(e) => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(&format!("File {} upload failed: {e}", file.name));
                }
            }
        }

        if out.is_empty() {
            out = "(no output)".to_string();
        }
        ToolReply::text(out)
    }
}
