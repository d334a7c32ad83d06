//! Network liveness probes used by the UI smoke phase.

use std::time::Duration;

use super::PlatformError;

/// Cap on probe body bytes kept in memory.
const MAX_PROBE_BODY_BYTES: usize = 256 * 1024;

/// Result of an HTTP liveness probe.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    pub status: u16,
    pub body: String,
}

impl HttpProbe {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub(crate) fn http_get_host(url: &str, timeout: Duration) -> Result<HttpProbe, PlatformError> {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();
    let agent = ureq::Agent::new_with_config(config);
    let mut response = agent
        .get(url)
        .call()
        .map_err(|err| PlatformError::Http {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
    let status = response.status().as_u16();
    let mut body = response
        .body_mut()
        .read_to_string()
        .unwrap_or_default();
    if body.len() > MAX_PROBE_BODY_BYTES {
        body.truncate(MAX_PROBE_BODY_BYTES);
    }
    Ok(HttpProbe { status, body })
}
