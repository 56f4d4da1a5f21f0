use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tia_core::error::AppError;

/// POST a JSON body and decode a JSON reply, mapping every failure to `BACKEND_*`.
pub(crate) fn post_json<B: Serialize, T: DeserializeOwned>(
    backend: &str,
    url: &str,
    headers: &[(&str, &str)],
    body: &B,
    timeout: Duration,
) -> Result<T, AppError> {
    let body = serde_json::to_value(body).map_err(|e| {
        AppError::new("BACKEND_REQUEST_ENCODE_FAILED", "Failed to encode backend request")
            .with_details(format!("backend={backend}; err={e}"))
    })?;

    let mut req = ureq::post(url).timeout(timeout);
    for (name, value) in headers {
        req = req.set(name, value);
    }

    match req.send_json(body) {
        Ok(r) if r.status() == 200 => r.into_json::<T>().map_err(|e| {
            AppError::new("BACKEND_BAD_RESPONSE", "Failed to decode backend response")
                .with_details(format!("backend={backend}; err={e}"))
        }),
        Ok(r) => Err(AppError::backend_unavailable("Backend request failed")
            .with_details(format!("backend={backend}; status={}", r.status()))),
        Err(ureq::Error::Status(code, r)) => {
            let body = r.into_string().unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            Err(AppError::backend_unavailable("Backend request failed")
                .with_details(format!("backend={backend}; status={code}; body={snippet}"))
                .with_retryable(code == 429 || code >= 500))
        }
        Err(e) => Err(AppError::backend_unavailable("Failed to reach backend")
            .with_details(format!("backend={backend}; err={e}"))),
    }
}

pub(crate) fn non_empty(backend: &str, text: Option<String>) -> Result<String, AppError> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t),
        _ => Err(AppError::new("BACKEND_EMPTY_RESPONSE", "Backend returned no text")
            .with_details(format!("backend={backend}"))),
    }
}
