//! REST client for the remote project store.

use std::time::Duration;

use {
    async_trait::async_trait,
    reqwest::{Client, RequestBuilder, Response, StatusCode},
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    tracing::{debug, warn},
    url::Url,
};

use crate::{
    Error, Result,
    remote::{GitApi, HealthCheck, ProjectApi},
    types::{FileSystem, GitStatus, NewProject, ProjectContext, ProjectMeta, SaveOutcome},
};

/// Body of a `412 Precondition Failed` answer to a conditional file write.
#[derive(Debug, Deserialize)]
struct ConflictBody {
    version: u64,
}

#[derive(Debug, Deserialize)]
struct SavedBody {
    version: u64,
}

#[derive(Serialize)]
struct FilesBody<'a> {
    files: &'a FileSystem,
}

#[derive(Serialize)]
struct DuplicateBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct CommitBody<'a> {
    message: &'a str,
    files: &'a FileSystem,
}

/// Talks to the store over HTTP.
pub struct HttpRemote {
    client: Client,
    base_url: Url,
}

impl HttpRemote {
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|source| Error::unavailable("client", source))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::message(format!("invalid store path {path}: {e}")))
    }

    async fn send(&self, operation: &'static str, req: RequestBuilder) -> Result<Response> {
        let resp = req
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|source| {
                warn!(operation, error = %source, "remote store request failed");
                Error::unavailable(operation, source)
            })?;
        debug!(operation, status = %resp.status(), "remote store responded");
        Ok(resp)
    }

    /// Map a non-success response into the error taxonomy.
    async fn reject(operation: &'static str, id: Option<&str>, resp: Response) -> Error {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND
            && let Some(id) = id
        {
            return Error::not_found(id);
        }
        let body = resp.text().await.unwrap_or_default();
        Error::rejected(operation, status.as_u16(), body)
    }

    async fn json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        id: Option<&str>,
        req: RequestBuilder,
    ) -> Result<T> {
        let resp = self.send(operation, req).await?;
        if !resp.status().is_success() {
            return Err(Self::reject(operation, id, resp).await);
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|source| Error::unavailable(operation, source))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn empty(
        &self,
        operation: &'static str,
        id: Option<&str>,
        req: RequestBuilder,
    ) -> Result<()> {
        let resp = self.send(operation, req).await?;
        if !resp.status().is_success() {
            return Err(Self::reject(operation, id, resp).await);
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectApi for HttpRemote {
    async fn create(&self, project: NewProject) -> Result<ProjectMeta> {
        let req = self.client.post(self.url("api/projects")?).json(&project);
        self.json("create", None, req).await
    }

    async fn get(&self, id: &str) -> Result<ProjectMeta> {
        let req = self.client.get(self.url(&format!("api/projects/{id}"))?);
        self.json("get", Some(id), req).await
    }

    async fn list(&self) -> Result<Vec<ProjectMeta>> {
        let req = self.client.get(self.url("api/projects")?);
        self.json("list", None, req).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let req = self.client.delete(self.url(&format!("api/projects/{id}"))?);
        self.empty("delete", Some(id), req).await
    }

    async fn duplicate(&self, id: &str, name: Option<&str>) -> Result<ProjectMeta> {
        let req = self
            .client
            .post(self.url(&format!("api/projects/{id}/duplicate"))?)
            .json(&DuplicateBody { name });
        self.json("duplicate", Some(id), req).await
    }

    async fn update_files(
        &self,
        id: &str,
        files: &FileSystem,
        if_version: Option<u64>,
    ) -> Result<SaveOutcome> {
        let mut req = self
            .client
            .put(self.url(&format!("api/projects/{id}/files"))?)
            .json(&FilesBody { files });
        if let Some(version) = if_version {
            req = req.header("If-Match", format!("\"{version}\""));
        }
        let resp = self.send("update_files", req).await?;
        match resp.status() {
            StatusCode::PRECONDITION_FAILED => {
                let body: ConflictBody = resp
                    .json()
                    .await
                    .map_err(|source| Error::unavailable("update_files", source))?;
                Ok(SaveOutcome::Conflict {
                    remote_version: body.version,
                })
            },
            s if s.is_success() => {
                let body: SavedBody = resp
                    .json()
                    .await
                    .map_err(|source| Error::unavailable("update_files", source))?;
                Ok(SaveOutcome::Saved {
                    version: body.version,
                })
            },
            _ => Err(Self::reject("update_files", Some(id), resp).await),
        }
    }

    async fn save_context(&self, id: &str, patch: &ProjectContext) -> Result<()> {
        let req = self
            .client
            .patch(self.url(&format!("api/projects/{id}/context"))?)
            .json(patch);
        self.empty("save_context", Some(id), req).await
    }

    async fn get_context(&self, id: &str) -> Result<Option<ProjectContext>> {
        let req = self
            .client
            .get(self.url(&format!("api/projects/{id}/context"))?);
        let resp = self.send("get_context", req).await?;
        match resp.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            s if s.is_success() => {
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|source| Error::unavailable("get_context", source))?;
                Ok(serde_json::from_slice(&bytes)?)
            },
            _ => Err(Self::reject("get_context", Some(id), resp).await),
        }
    }
}

#[async_trait]
impl GitApi for HttpRemote {
    async fn status(&self, id: &str) -> Result<GitStatus> {
        let req = self.client.get(self.url(&format!("api/git/{id}/status"))?);
        self.json("git_status", Some(id), req).await
    }

    async fn init(&self, id: &str, files: &FileSystem) -> Result<()> {
        let req = self
            .client
            .post(self.url(&format!("api/git/{id}/init"))?)
            .json(&FilesBody { files });
        self.empty("git_init", Some(id), req).await
    }

    async fn commit(&self, id: &str, message: &str, files: &FileSystem) -> Result<()> {
        let req = self
            .client
            .post(self.url(&format!("api/git/{id}/commit"))?)
            .json(&CommitBody { message, files });
        self.empty("git_commit", Some(id), req).await
    }
}

#[async_trait]
impl HealthCheck for HttpRemote {
    async fn check_health(&self) -> bool {
        let Ok(url) = self.url("api/health") else {
            return false;
        };
        match self.client.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "health check failed");
                false
            },
        }
    }
}
