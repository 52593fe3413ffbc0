use async_trait::async_trait;
use focuslist_core::{
    protocol::{
        AckResponse, CreateTaskRequest, CreateTaskResponse, ErrorResponse, TaskListResponse,
        UpdateTaskRequest, TASKS_SEGMENTS,
    },
    SyncError, SyncResult, Task,
};
use reqwest::{header, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::{ClientError, ClientResult};

/// The CRUD contract the engine consumes. Network failures, timeouts and
/// unparseable bodies surface as transient errors; non-2xx statuses as
/// [`SyncError::RemoteStatus`].
#[async_trait]
pub trait RemoteTaskStore: Send + Sync {
    async fn create(&self, request: &CreateTaskRequest) -> SyncResult<Task>;
    async fn update(&self, id: &str, request: &UpdateTaskRequest) -> SyncResult<()>;
    async fn delete(&self, id: &str) -> SyncResult<()>;
    async fn list(&self) -> SyncResult<Vec<Task>>;
}

pub struct HttpTaskStore {
    client: reqwest::Client,
    base_url: Url,
    session_token: Option<String>,
}

impl HttpTaskStore {
    pub fn new(base_url: &str, session_token: Option<String>, timeout: Duration) -> ClientResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Config(format!("invalid server URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Config(format!(
                "server URL {} cannot carry a path",
                base_url
            )));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            session_token,
        })
    }

    /// The collection URL, or the URL of one task when `id` is given. Ids
    /// are percent-encoded as a single path segment.
    fn url(&self, id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(TASKS_SEGMENTS);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        url
    }

    fn request(&self, method: Method, id: Option<&str>) -> RequestBuilder {
        let builder = self.client.request(method, self.url(id));
        match &self.session_token {
            Some(token) => builder.header(header::COOKIE, format!("session={}", token)),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> SyncResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => status.canonical_reason().unwrap_or("unknown").to_string(),
        };
        Err(SyncError::RemoteStatus {
            status: status.as_u16(),
            message,
        })
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::NetworkError(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| SyncError::MalformedResponse(e.to_string()))
    }

    async fn acknowledge(response: Response) -> SyncResult<()> {
        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::NetworkError(e.to_string()))?;
        if body.is_empty() {
            return Ok(());
        }
        let ack: AckResponse = serde_json::from_slice(&body)
            .map_err(|e| SyncError::MalformedResponse(e.to_string()))?;
        match ack.success {
            Some(false) => Err(SyncError::MalformedResponse(
                "remote store reported success=false".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteTaskStore for HttpTaskStore {
    async fn create(&self, request: &CreateTaskRequest) -> SyncResult<Task> {
        let response = self
            .send(self.request(Method::POST, None).json(request))
            .await?;
        let created: CreateTaskResponse = Self::parse(response).await?;
        Ok(created.todo.into())
    }

    async fn update(&self, id: &str, request: &UpdateTaskRequest) -> SyncResult<()> {
        let response = self
            .send(self.request(Method::PUT, Some(id)).json(request))
            .await?;
        Self::acknowledge(response).await
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        let response = self.send(self.request(Method::DELETE, Some(id))).await?;
        Self::acknowledge(response).await
    }

    async fn list(&self) -> SyncResult<Vec<Task>> {
        let response = self.send(self.request(Method::GET, None)).await?;
        let listed: TaskListResponse = Self::parse(response).await?;
        Ok(listed.todos.into_iter().map(Task::from).collect())
    }
}
