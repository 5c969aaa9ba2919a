use serde::Deserialize;
use serde_json::Value;

use crate::error::CiError;

const BLOCKED_JOB_PREFIX: &str = "Build is waiting for the following resource to become available: ";

#[derive(Debug, Clone, Deserialize)]
pub struct QueuedBuild {
    pub id: i64,
    #[serde(rename = "waitReason", default)]
    pub wait_reason: Option<String>,
}

/// Thin REST client for the build-queue and quota endpoints. Grounded on
/// `Teamcity/tc_allocator.py`'s `teamcity_request` (shared `requests.Session`
/// with Basic auth, same two content-type headers, any 2xx accepted).
#[derive(Clone)]
pub struct TeamCityClient {
    http: reqwest::Client,
    host: String,
    user: String,
    password: String,
}

impl TeamCityClient {
    pub fn new(host: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), host: host.into(), user: user.into(), password: password.into() }
    }

    async fn get(&self, url: &str) -> Result<Value, CiError> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.user, Some(&self.password))
            .header("Accept", "application/json")
            .send()
            .await?;
        ok_json(response).await
    }

    async fn put(&self, url: &str, body: &Value) -> Result<Value, CiError> {
        let response = self
            .http
            .put(url)
            .basic_auth(&self.user, Some(&self.password))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;
        ok_json(response).await
    }

    pub async fn job_is_done(&self, job_id: i64) -> Result<bool, CiError> {
        let url = format!("{}/app/rest/2018.1/builds/id:{job_id}/?fields=state", self.host);
        let body = self.get(&url).await?;
        Ok(body.get("state").and_then(Value::as_str) == Some("finished"))
    }

    pub async fn blocked_jobs(&self) -> Result<Vec<(QueuedBuild, String)>, CiError> {
        let url = format!("{}/app/rest/2018.1/buildQueue?fields=build(id,waitReason)", self.host);
        let body = self.get(&url).await?;
        let builds: Vec<QueuedBuild> = serde_json::from_value(body.get("build").cloned().unwrap_or(Value::Array(vec![])))
            .unwrap_or_default();
        Ok(builds
            .into_iter()
            .filter_map(|b| {
                let reason = b.wait_reason.clone()?;
                let pool_name = reason.strip_prefix(BLOCKED_JOB_PREFIX)?.to_string();
                Some((b, pool_name))
            })
            .collect())
    }

    pub async fn get_quota(&self, shared_resource_url: &str) -> Result<Value, CiError> {
        self.get(&format!("{shared_resource_url}/properties/quota")).await
    }

    pub async fn put_quota(&self, shared_resource_url: &str, quota: &Value) -> Result<(), CiError> {
        self.put(&format!("{shared_resource_url}/properties/quota"), quota).await?;
        Ok(())
    }
}

async fn ok_json(response: reqwest::Response) -> Result<Value, CiError> {
    let status = response.status();
    if status.is_success() {
        Ok(response.json().await?)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(CiError::UnexpectedStatus { status: status.as_u16(), body })
    }
}
