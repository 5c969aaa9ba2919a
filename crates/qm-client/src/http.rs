use reqwest::{Method, StatusCode};
use serde_json::Value;

use crate::error::ClientError;

const VERSION: &str = "1.0";

/// A reservation as handed back by the server: the raw device blobs (each
/// one a driver-specific config plus `driver`/`name`/`host_address`, per
/// `qm-api::handlers::devices_json`), the `use_password`, and the URLs
/// needed for the refresh/cancel loop. Grounded on `client.py`'s
/// `Reservation` NamedTuple.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub devices: Vec<Value>,
    pub use_password: String,
    pub resource_url: String,
    pub reservation_url: String,
    pub auth_token: Option<String>,
}

pub fn build_http_client(disable_validation: bool) -> Result<reqwest::Client, ClientError> {
    Ok(reqwest::Client::builder()
        .danger_accept_invalid_certs(disable_validation)
        .timeout(std::time::Duration::from_secs(10))
        .build()?)
}

async fn quartermaster_request(
    client: &reqwest::Client,
    url: &str,
    method: Method,
    token: Option<&str>,
    form_body: Option<&[(&str, &str)]>,
) -> Result<(StatusCode, String, String), ClientError> {
    let mut req = client
        .request(method, url)
        .header("Accept", "application/json")
        .header("Quartermaster_client_version", VERSION);

    if let Some(token) = token {
        req = req.header("Authorization", format!("Bearer {token}"));
    }
    if let Some(form_body) = form_body {
        req = req.form(form_body);
    }

    let response = req.send().await?;
    let status = response.status();
    let final_url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(%status, %final_url, "quartermaster server response");
    Ok((status, body, final_url))
}

/// POSTs for a reservation: the server creates one, or returns the caller's
/// already-active reservation if it has one. Grounded on
/// `get_quartermaster_reservation`.
pub async fn get_quartermaster_reservation(
    client: &reqwest::Client,
    url: &str,
    message: Option<&str>,
    auth_token: Option<&str>,
) -> Result<Reservation, ClientError> {
    let form: Vec<(&str, &str)> = message.map(|m| vec![("used_for", m)]).unwrap_or_default();
    let (status, body, final_url) =
        quartermaster_request(client, url, Method::POST, auth_token, Some(&form)).await?;

    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::ReservationNotFound { url: url.to_string() });
    }
    if status != StatusCode::OK && status != StatusCode::CREATED {
        return Err(ClientError::UnexpectedStatus { url: url.to_string(), status: status.as_u16(), body });
    }

    let decoded: Value = serde_json::from_str(&body)
        .map_err(|e| ClientError::UnexpectedStatus { url: url.to_string(), status: status.as_u16(), body: e.to_string() })?;

    let devices = decoded["devices"].as_array().cloned().unwrap_or_default();
    let use_password = decoded["use_password"].as_str().unwrap_or_default().to_string();

    Ok(Reservation {
        devices,
        use_password,
        resource_url: final_url,
        reservation_url: url.to_string(),
        auth_token: auth_token.map(str::to_string),
    })
}

/// PATCHes the reservation to keep it alive. Returns `false` (rather than an
/// error) on a 404, since an expired/released reservation is an expected
/// outcome the caller reacts to by tearing down. Grounded on
/// `refresh_reservation`.
pub async fn refresh_reservation(
    client: &reqwest::Client,
    url: &str,
    auth_token: Option<&str>,
) -> Result<bool, ClientError> {
    let (status, body, _) = quartermaster_request(client, url, Method::PATCH, auth_token, None).await?;
    if status == StatusCode::NOT_FOUND {
        return Ok(false);
    }
    if status != StatusCode::ACCEPTED {
        return Err(ClientError::UnexpectedStatus { url: url.to_string(), status: status.as_u16(), body });
    }
    Ok(true)
}

/// DELETEs the reservation. Grounded on `cancel_reservation`.
pub async fn cancel_reservation(
    client: &reqwest::Client,
    url: &str,
    auth_token: Option<&str>,
) -> Result<(), ClientError> {
    let (status, body, _) = quartermaster_request(client, url, Method::DELETE, auth_token, None).await?;
    if status != StatusCode::NO_CONTENT {
        return Err(ClientError::UnexpectedStatus { url: url.to_string(), status: status.as_u16(), body });
    }
    Ok(())
}
