use crate::error::FetchError;
use crate::protocol::ExecutionId;
use crate::status::ExecutionStatus;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

const ACCOUNT_HEADER: &str = "x-user-email";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetOrigin {
    Uploaded,
    Generated,
}

/// A file attached to an execution, either uploaded or produced by the
/// pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(skip_deserializing, default = "default_origin")]
    pub origin: AssetOrigin,
}

fn default_origin() -> AssetOrigin {
    AssetOrigin::Uploaded
}

/// State returned by the one-shot fetch issued when a subscription opens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSnapshot {
    pub status: Option<ExecutionStatus>,
    pub workflow_name: Option<String>,
    pub uploaded: Vec<Asset>,
    pub generated: Vec<Asset>,
    /// Only set when the backend answered with the older case shape.
    pub legacy: Option<LegacyFlags>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyFlags {
    #[serde(default)]
    pub has_demands: bool,
    #[serde(default)]
    pub has_agreements: bool,
}

/// Source of the initial execution state.
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    async fn fetch(&self, execution_id: &ExecutionId) -> Result<ExecutionSnapshot, FetchError>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatusBody {
    Execution {
        status: ExecutionStatus,
        #[serde(default)]
        workflow: Option<WorkflowRef>,
    },
    Legacy(LegacyFlags),
}

#[derive(Debug, Deserialize)]
struct WorkflowRef {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AssetsBody {
    #[serde(default)]
    uploaded: Vec<Asset>,
    #[serde(default)]
    generated: Vec<Asset>,
}

/// [`StatusSource`] backed by the REST API.
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    base_url: Url,
    account: Option<String>,
    http: Client,
}

impl HttpStatusSource {
    pub fn new(base_url: Url, account: Option<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| FetchError::Request {
                url: base_url.to_string(),
                source,
            })?;
        Ok(Self {
            base_url,
            account,
            http,
        })
    }

    fn execution_url(&self, execution_id: &ExecutionId, tail: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "workflow-execution", execution_id.as_str()])
            .extend(tail);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let mut request = self.http.get(url.clone());
        if let Some(account) = &self.account {
            request = request.header(ACCOUNT_HEADER, account);
        }
        let response = request.send().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_str(&body).map_err(|err| FetchError::Decode {
            url: url.to_string(),
            reason: err.to_string(),
        })
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self, execution_id: &ExecutionId) -> Result<ExecutionSnapshot, FetchError> {
        let status_url = self.execution_url(execution_id, &[])?;
        let assets_url = self.execution_url(execution_id, &["assets"])?;
        let (status, assets) = tokio::join!(
            self.get_json::<StatusBody>(status_url),
            self.get_json::<AssetsBody>(assets_url),
        );
        let status = status?;
        // Case-era backends have no assets route.
        let assets = match assets {
            Ok(assets) => assets,
            Err(FetchError::Status { status: 404, .. }) => AssetsBody::default(),
            Err(err) => return Err(err),
        };

        let mut snapshot = ExecutionSnapshot {
            uploaded: tag_origin(assets.uploaded, AssetOrigin::Uploaded),
            generated: tag_origin(assets.generated, AssetOrigin::Generated),
            ..ExecutionSnapshot::default()
        };
        match status {
            StatusBody::Execution { status, workflow } => {
                snapshot.status = Some(status);
                snapshot.workflow_name = workflow.and_then(|workflow| workflow.name);
            }
            StatusBody::Legacy(flags) => snapshot.legacy = Some(flags),
        }
        debug!(
            execution_id = %execution_id,
            status = ?snapshot.status,
            uploaded = snapshot.uploaded.len(),
            generated = snapshot.generated.len(),
            "fetched execution snapshot"
        );
        Ok(snapshot)
    }
}

fn tag_origin(assets: Vec<Asset>, origin: AssetOrigin) -> Vec<Asset> {
    assets
        .into_iter()
        .map(|asset| Asset { origin, ..asset })
        .collect()
}
