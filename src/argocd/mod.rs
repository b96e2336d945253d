use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

pub mod applications;
pub mod applicationsets;
pub mod clusters;
pub mod projects;
pub mod repositories;

pub use applications::ApplicationService;
pub use applicationsets::ApplicationSetService;
pub use clusters::ClusterService;
pub use projects::ProjectService;
pub use repositories::RepositoryService;

/// Failure of a single call against the ArgoCD API, classified so that the engine
/// can tell absence, authorization and conflicts apart from everything else.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected with {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "NotFound",
            ServiceError::PermissionDenied(_) => "PermissionDenied",
            ServiceError::AlreadyExists(_) => "AlreadyExists",
            ServiceError::Unavailable(_) => "Unavailable",
            ServiceError::Rejected { .. } => "Rejected",
            ServiceError::Transport(_) => "Transport",
            ServiceError::InvalidResponse(_) => "InvalidResponse",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Rejected { status, .. } => *status >= 500,
            ServiceError::InvalidResponse(_) => false,
            _ => true,
        }
    }

    /// Classify a non-success gateway response.
    ///
    /// The gateway body carries the gRPC status code, which is more precise than the
    /// HTTP status (ArgoCD answers 403 for objects the caller may not see, existing or not).
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        #[derive(Deserialize, Default)]
        struct GatewayError {
            #[serde(default)]
            code: i32,
            #[serde(default)]
            message: String,
            #[serde(default)]
            error: String,
        }

        let parsed: GatewayError = serde_json::from_str(body).unwrap_or_default();
        let message = match (parsed.message.is_empty(), parsed.error.is_empty()) {
            (false, _) => parsed.message,
            (true, false) => parsed.error,
            (true, true) => body.trim().to_string(),
        };

        match (parsed.code, status) {
            (5, _) | (_, StatusCode::NOT_FOUND) => ServiceError::NotFound(message),
            (7, _) | (_, StatusCode::FORBIDDEN) => ServiceError::PermissionDenied(message),
            (6, _) | (_, StatusCode::CONFLICT) => ServiceError::AlreadyExists(message),
            (14, _)
            | (4, _)
            | (_, StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT) => {
                ServiceError::Unavailable(message)
            }
            _ => ServiceError::Rejected {
                status: status.as_u16(),
                message,
            },
        }
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Connection settings for the ArgoCD API server
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// host[:port] of the ArgoCD API server, or a full URL
    pub server: String,
    /// Use http instead of https
    pub plaintext: bool,
    /// Skip TLS certificate verification
    pub insecure: bool,
}

impl ClientConfig {
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        if self.server.contains("://") {
            return Url::parse(&self.server);
        }
        let scheme = if self.plaintext { "http" } else { "https" };
        Url::parse(&format!("{scheme}://{}", self.server))
    }

    /// Build the pooled HTTP client. It is shared by every controller and released on drop.
    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .danger_accept_invalid_certs(self.insecure)
            .build()
    }
}

/// An authenticated handle to the ArgoCD REST API.
///
/// One is connected per reconcile pass so that a rotated auth token is picked up;
/// the underlying connection pool is shared.
#[derive(Clone, Debug)]
pub struct ArgoClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ArgoClient {
    pub fn new(http: reqwest::Client, base_url: Url, token: Option<String>) -> Self {
        Self {
            http,
            base_url,
            token,
        }
    }

    /// Build a request to `api/v1/<segments...>`; every segment is percent-encoded, so
    /// repository and cluster URLs can be used as identifiers.
    pub(crate) fn request(&self, method: Method, segments: &[&str]) -> reqwest::RequestBuilder {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v1"]).extend(segments);
        }

        debug!("ArgoCD request {method} {}", url.path());

        let mut request_builder = self.http.request(method, url);
        if let Some(token) = &self.token {
            request_builder = request_builder.bearer_auth(token);
        }
        request_builder
    }

    pub(crate) async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> ServiceResult<T> {
        let response = check(request.send().await?).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ServiceError::InvalidResponse(e.to_string()))
    }

    pub(crate) async fn send_empty(&self, request: reqwest::RequestBuilder) -> ServiceResult<()> {
        check(request.send().await?).await?;
        Ok(())
    }
}

async fn check(response: reqwest::Response) -> ServiceResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::from_response(status, &body))
}

/// grpc-gateway renders int64 fields as JSON strings; accept both forms
pub(crate) mod int64 {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64 {
        Number(i64),
        String(String),
    }

    impl Int64 {
        fn value<E: serde::de::Error>(self) -> Result<i64, E> {
            match self {
                Int64::Number(n) => Ok(n),
                Int64::String(s) if s.is_empty() => Ok(0),
                Int64::String(s) => s.parse().map_err(E::custom),
            }
        }
    }

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        Int64::deserialize(deserializer)?.value()
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<i64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<i64>, D::Error> {
            Option::<super::Int64>::deserialize(deserializer)?
                .map(super::Int64::value)
                .transpose()
        }
    }
}

/// Kubernetes-style object metadata as ArgoCD returns it
#[derive(serde::Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub labels: std::collections::BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub annotations: std::collections::BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_code_takes_precedence_over_http_status() {
        let err = ServiceError::from_response(
            StatusCode::FORBIDDEN,
            r#"{"error":"app not found","code":5,"message":"applications.argoproj.io \"guestbook\" not found"}"#,
        );
        assert!(matches!(err, ServiceError::NotFound(m) if m.contains("guestbook")));
    }

    #[test]
    fn forbidden_without_code_is_permission_denied() {
        let err = ServiceError::from_response(StatusCode::FORBIDDEN, "permission denied");
        assert!(matches!(err, ServiceError::PermissionDenied(m) if m == "permission denied"));
    }

    #[test]
    fn conflict_is_already_exists() {
        let err = ServiceError::from_response(
            StatusCode::BAD_REQUEST,
            r#"{"code":6,"message":"existing project spec is different"}"#,
        );
        assert!(matches!(err, ServiceError::AlreadyExists(_)));
    }

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        let bad_request = ServiceError::from_response(StatusCode::BAD_REQUEST, "{}");
        assert!(!bad_request.is_retryable());
        let internal = ServiceError::from_response(StatusCode::INTERNAL_SERVER_ERROR, "{}");
        assert!(internal.is_retryable());
        let unavailable = ServiceError::from_response(StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(matches!(unavailable, ServiceError::Unavailable(_)));
    }

    #[test]
    fn base_url_defaults_to_https() {
        let config = ClientConfig {
            server: "argocd-server.argocd:443".into(),
            plaintext: false,
            insecure: false,
        };
        assert_eq!(
            config.base_url().unwrap().as_str(),
            "https://argocd-server.argocd/"
        );

        let config = ClientConfig {
            server: "argocd-server.argocd:8080".into(),
            plaintext: true,
            insecure: false,
        };
        assert_eq!(
            config.base_url().unwrap().as_str(),
            "http://argocd-server.argocd:8080/"
        );
    }

    #[test]
    fn request_encodes_segments() {
        let client = ArgoClient::new(
            reqwest::Client::new(),
            Url::parse("https://argocd.example.com").unwrap(),
            None,
        );
        let request = client
            .request(Method::GET, &["repositories", "https://github.com/org/repo.git"])
            .build()
            .unwrap();
        assert_eq!(
            request.url().path(),
            "/api/v1/repositories/https:%2F%2Fgithub.com%2Forg%2Frepo.git"
        );
    }
}
