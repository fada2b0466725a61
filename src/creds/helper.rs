//! Docker credential helpers (`docker-credential-<name> get`)

use crate::creds::Credential;
use crate::error::{PackError, PackResult};
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const TOKEN_USERNAME: &str = "<token>";

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperResponse {
    username: String,
    secret: String,
}

/// Ask `docker-credential-<helper>` for the credential of `server_url`
///
/// A helper that is not installed, or has nothing stored, yields `None`.
pub async fn get(helper: &str, server_url: &str) -> PackResult<Option<Credential>> {
    let binary = format!("docker-credential-{}", helper);
    debug!("Querying {} for {}", binary, server_url);

    let mut child = match Command::new(&binary)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Credential helper {} is not installed", binary);
            return Ok(None);
        }
        Err(e) => return Err(PackError::command_failed(&binary, e)),
    };

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(server_url.as_bytes())
            .await
            .map_err(|e| PackError::command_failed(&binary, e))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| PackError::command_failed(&binary, e))?;

    if !output.status.success() {
        let message = String::from_utf8_lossy(&output.stdout).to_string()
            + &String::from_utf8_lossy(&output.stderr);
        if message.to_lowercase().contains("credentials not found") {
            return Ok(None);
        }
        return Err(PackError::CredentialHelper {
            helper: binary,
            reason: message.trim().to_string(),
        });
    }

    parse_response(&output.stdout).map_err(|reason| PackError::CredentialHelper {
        helper: binary,
        reason,
    })
}

fn parse_response(stdout: &[u8]) -> Result<Option<Credential>, String> {
    let response: HelperResponse = serde_json::from_slice(stdout).map_err(|e| e.to_string())?;
    if response.secret.is_empty() {
        return Ok(None);
    }
    Ok(Some(if response.username == TOKEN_USERNAME {
        Credential::IdentityToken(response.secret)
    } else {
        Credential::basic(response.username, response.secret)
    }))
}
