//! Azure Blob Storage through `object_store`.
//!
//! Uploads go through [`MicrosoftAzureBuilder`] stores with [`PutMode::Create`].
//! `object_store` has no container management, so container creation is a single
//! request signed with [`AzureAuthorizer`] and sent over the same HTTP client.

use std::sync::Arc;

use archiver_core::config::{StorageConfig, StorageCredential};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, StatusCode, header::CONTENT_LENGTH};
use object_store::{
    Attribute, Attributes, ClientOptions, ObjectStore as _, PutMode,
    PutOptions, PutPayload, RetryConfig, StaticCredentialProvider,
    azure::{
        AzureAccessKey, AzureAuthorizer, AzureCredential, AzureCredentialProvider,
        MicrosoftAzure, MicrosoftAzureBuilder,
    },
    client::{HttpClient, HttpConnector, HttpRequestBody},
    path::Path,
};
use url::Url;

use crate::{ObjectStore, StorageError, StorageResult};

const CONTENT_TYPE_GZIP: &str = "application/gzip";
const CONTAINER_ALREADY_EXISTS: &str = "ContainerAlreadyExists";

/// Hands every container store the one connection pool.
#[derive(Debug)]
struct SharedClient(HttpClient);

impl HttpConnector for SharedClient {
    fn connect(&self, _options: &ClientOptions) -> object_store::Result<HttpClient> {
        Ok(self.0.clone())
    }
}

#[derive(Clone)]
pub struct AzureBlobStore {
    client: HttpClient,
    credentials: AzureCredentialProvider,
    /// Service endpoint without a trailing slash; containers are pushed as path segments.
    endpoint: Url,
    account: String,
}

impl AzureBlobStore {
    pub fn new(config: &StorageConfig) -> StorageResult<Self> {
        let credential = match &config.credential {
            StorageCredential::AccountKey(key) => {
                let key = AzureAccessKey::try_new(key.trim()).map_err(|e| {
                    StorageError::Credential(format!("account key is not valid base64: {e}"))
                })?;
                AzureCredential::AccessKey(key)
            }
            StorageCredential::SasToken(token) => {
                let token = token.trim().trim_start_matches('?');
                if token.is_empty() {
                    return Err(StorageError::Credential("SAS token is empty".to_string()));
                }
                AzureCredential::SASToken(
                    url::form_urlencoded::parse(token.as_bytes()).into_owned().collect(),
                )
            }
        };
        let mut endpoint = config.endpoint()?;
        let popped = endpoint.path_segments_mut().map(|mut segments| {
            segments.pop_if_empty();
        });
        if let Err(()) = popped {
            return Err(StorageError::InvalidEndpoint(endpoint.clone()));
        }
        let client = reqwest::Client::builder().timeout(config.timeout()).build()?;
        tracing::info!("Blob storage: {} ({})", config.account, endpoint);
        Ok(Self {
            client: HttpClient::new(client),
            credentials: Arc::new(StaticCredentialProvider::new(credential)),
            endpoint,
            account: config.account.clone(),
        })
    }

    fn container_url(&self, name: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(name);
        }
        url.query_pairs_mut().append_pair("restype", "container");
        url
    }

    fn container(&self, name: &str) -> StorageResult<MicrosoftAzure> {
        Ok(MicrosoftAzureBuilder::new()
            .with_account(&self.account)
            .with_container_name(name)
            .with_endpoint(self.endpoint.to_string())
            .with_allow_http(self.endpoint.scheme() == "http")
            .with_credentials(self.credentials.clone())
            // Failed deliveries are redelivered by GitHub; one attempt per request.
            .with_retry(RetryConfig { max_retries: 0, ..Default::default() })
            .with_http_connector(SharedClient(self.client.clone()))
            .build()?)
    }
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    async fn ensure_namespace(&self, name: &str) -> StorageResult<()> {
        let mut request = Request::builder()
            .method(Method::PUT)
            .uri(self.container_url(name).as_str())
            .header(CONTENT_LENGTH, "0")
            .body(HttpRequestBody::empty())?;
        let credential = self.credentials.get_credential().await?;
        AzureAuthorizer::new(&credential, &self.account).authorize(&mut request);

        let response = self.client.execute(request).await?;
        let status = response.status();
        let code = response
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        match status {
            status if status.is_success() => {
                tracing::info!("Created container {}", name);
                Ok(())
            }
            StatusCode::CONFLICT if code.as_deref() == Some(CONTAINER_ALREADY_EXISTS) => {
                tracing::debug!("Container {} already exists", name);
                Ok(())
            }
            _ => {
                let body = response.into_body().bytes().await.unwrap_or_default();
                Err(StorageError::Service {
                    status,
                    code: code.unwrap_or_else(|| "Unknown".to_string()),
                    message: String::from_utf8_lossy(&body).trim().to_string(),
                })
            }
        }
    }

    async fn put_object(&self, namespace: &str, key: &str, data: Bytes) -> StorageResult<()> {
        let size = data.len();
        let options = PutOptions {
            mode: PutMode::Create,
            attributes: Attributes::from_iter([(Attribute::ContentType, CONTENT_TYPE_GZIP)]),
            ..Default::default()
        };
        let result = self
            .container(namespace)?
            .put_opts(&Path::from(key), PutPayload::from(data), options)
            .await;
        match result {
            Ok(_) => {
                tracing::info!("Uploaded blob {}/{} ({} bytes)", namespace, key, size);
                Ok(())
            }
            Err(
                object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. },
            ) => Err(StorageError::ObjectExists {
                namespace: namespace.to_string(),
                key: key.to_string(),
            }),
            Err(object_store::Error::NotFound { .. }) => {
                Err(StorageError::NamespaceNotFound(namespace.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
    };

    use axum::{
        Router,
        extract::{Path, Query, State},
        http::HeaderMap,
        response::{IntoResponse, Response},
        routing::put,
    };

    use super::*;

    #[derive(Default)]
    struct FakeBlobService {
        containers: HashSet<String>,
        blobs: HashMap<(String, String), Bytes>,
        headers: Vec<HeaderMap>,
        queries: Vec<HashMap<String, String>>,
    }

    type Shared = Arc<Mutex<FakeBlobService>>;

    fn azure_error(status: StatusCode, code: &str) -> Response {
        let body = format!("<?xml version=\"1.0\"?><Error><Code>{code}</Code><Message>{code} happened.</Message></Error>");
        (status, [("x-ms-error-code", code.to_string())], body).into_response()
    }

    async fn create_container(
        State(state): State<Shared>,
        Path(container): Path<String>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> Response {
        if container == "slow" {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
        let mut state = state.lock().unwrap();
        state.headers.push(headers);
        state.queries.push(query.clone());
        if query.get("restype").map(String::as_str) != Some("container") {
            return azure_error(StatusCode::BAD_REQUEST, "InvalidQueryParameterValue");
        }
        if container == "forbidden" {
            return azure_error(StatusCode::FORBIDDEN, "AuthorizationFailure");
        }
        if !state.containers.insert(container) {
            return azure_error(StatusCode::CONFLICT, CONTAINER_ALREADY_EXISTS);
        }
        StatusCode::CREATED.into_response()
    }

    async fn put_blob(
        State(state): State<Shared>,
        Path((container, blob)): Path<(String, String)>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        let mut state = state.lock().unwrap();
        state.headers.push(headers.clone());
        state.queries.push(query);
        if !state.containers.contains(&container) {
            return azure_error(StatusCode::NOT_FOUND, "ContainerNotFound");
        }
        let key = (container, blob);
        if headers.get("if-none-match").is_some_and(|v| v == "*") && state.blobs.contains_key(&key)
        {
            return azure_error(StatusCode::CONFLICT, "BlobAlreadyExists");
        }
        state.blobs.insert(key, body);
        (StatusCode::CREATED, [("etag", "\"0x8DC3D1E5F2A7B10\"")]).into_response()
    }

    async fn serve() -> (Url, Shared) {
        let state = Shared::default();
        let router = Router::new()
            .route("/{container}", put(create_container))
            .route("/{container}/{blob}", put(put_blob))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        (Url::parse(&format!("http://{addr}")).unwrap(), state)
    }

    fn config(endpoint: Url, credential: StorageCredential) -> StorageConfig {
        StorageConfig {
            account: "devstoreaccount1".to_string(),
            endpoint: Some(endpoint),
            credential,
            timeout_secs: 5,
        }
    }

    fn store(endpoint: Url, credential: StorageCredential) -> AzureBlobStore {
        AzureBlobStore::new(&config(endpoint, credential)).unwrap()
    }

    fn shared_key() -> StorageCredential {
        StorageCredential::AccountKey("dGVzdC1hY2NvdW50LWtleQ==".to_string())
    }

    #[tokio::test]
    async fn test_ensure_namespace_twice() {
        let (endpoint, state) = serve().await;
        let store = store(endpoint, shared_key());
        store.ensure_namespace("acme-widgets").await.unwrap();
        store.ensure_namespace("acme-widgets").await.unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.containers.len(), 1);
        assert_eq!(state.headers.len(), 2);
        for headers in &state.headers {
            let auth = headers.get("authorization").unwrap().to_str().unwrap();
            assert!(auth.starts_with("SharedKey devstoreaccount1:"), "{auth}");
            assert!(headers.get("x-ms-version").is_some());
            assert!(headers.get("x-ms-date").unwrap().to_str().unwrap().ends_with(" GMT"));
        }
    }

    #[tokio::test]
    async fn test_ensure_namespace_service_error() {
        let (endpoint, _state) = serve().await;
        let store = store(endpoint, shared_key());
        let err = store.ensure_namespace("forbidden").await.unwrap_err();
        match err {
            StorageError::Service { status, code, message } => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(code, "AuthorizationFailure");
                assert!(message.contains("AuthorizationFailure happened."), "{message}");
            }
            e => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn test_put_object() {
        let (endpoint, state) = serve().await;
        let store = store(endpoint, shared_key());
        store.ensure_namespace("acme-widgets").await.unwrap();
        store
            .put_object("acme-widgets", "20240305070809-x.log.gz", Bytes::from_static(b"gz"))
            .await
            .unwrap();

        let state = state.lock().unwrap();
        let key = ("acme-widgets".to_string(), "20240305070809-x.log.gz".to_string());
        assert_eq!(state.blobs.get(&key), Some(&Bytes::from_static(b"gz")));
        let headers = state.headers.last().unwrap();
        assert_eq!(headers.get("x-ms-blob-type").unwrap(), "BlockBlob");
        assert_eq!(headers.get("content-type").unwrap(), CONTENT_TYPE_GZIP);
        assert_eq!(headers.get("if-none-match").unwrap(), "*");
        let auth = headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with("SharedKey devstoreaccount1:"), "{auth}");
    }

    #[tokio::test]
    async fn test_put_object_never_overwrites() {
        let (endpoint, state) = serve().await;
        let store = store(endpoint, shared_key());
        store.ensure_namespace("acme-widgets").await.unwrap();
        store.put_object("acme-widgets", "k.log.gz", Bytes::from_static(b"one")).await.unwrap();
        let err = store
            .put_object("acme-widgets", "k.log.gz", Bytes::from_static(b"two"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, StorageError::ObjectExists { ref namespace, ref key } if namespace == "acme-widgets" && key == "k.log.gz"),
            "{err}"
        );

        let state = state.lock().unwrap();
        let key = ("acme-widgets".to_string(), "k.log.gz".to_string());
        assert_eq!(state.blobs.get(&key), Some(&Bytes::from_static(b"one")));
    }

    #[tokio::test]
    async fn test_put_object_missing_container() {
        let (endpoint, _state) = serve().await;
        let store = store(endpoint, shared_key());
        let err = store.put_object("nope", "k.log.gz", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::NamespaceNotFound(ref name) if name == "nope"), "{err}");
    }

    #[tokio::test]
    async fn test_sas_token() {
        let (endpoint, state) = serve().await;
        let store = store(endpoint, StorageCredential::SasToken("?sv=2022-11-02&sig=abc".into()));
        store.ensure_namespace("acme-widgets").await.unwrap();
        store.put_object("acme-widgets", "k.log.gz", Bytes::from_static(b"gz")).await.unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.queries[0].get("restype").map(String::as_str), Some("container"));
        for (headers, query) in state.headers.iter().zip(&state.queries) {
            assert!(headers.get("authorization").is_none());
            assert_eq!(query.get("sig").map(String::as_str), Some("abc"));
            assert_eq!(query.get("sv").map(String::as_str), Some("2022-11-02"));
        }
    }

    #[test]
    fn test_invalid_credentials() {
        let endpoint = Url::parse("http://127.0.0.1:10000/devstoreaccount1").unwrap();
        for credential in [
            StorageCredential::AccountKey("not base64!".into()),
            StorageCredential::SasToken("?".into()),
        ] {
            let err = AzureBlobStore::new(&config(endpoint.clone(), credential)).err().unwrap();
            assert!(matches!(err, StorageError::Credential(_)), "{err}");
        }
    }

    #[test]
    fn test_container_url() {
        for endpoint in [
            "http://127.0.0.1:10000/devstoreaccount1",
            "http://127.0.0.1:10000/devstoreaccount1/",
        ] {
            let store = store(Url::parse(endpoint).unwrap(), shared_key());
            assert_eq!(
                store.container_url("acme-widgets").as_str(),
                "http://127.0.0.1:10000/devstoreaccount1/acme-widgets?restype=container"
            );
        }
        let store = store(Url::parse("https://acct.blob.core.windows.net/").unwrap(), shared_key());
        assert_eq!(
            store.container_url("acme-widgets").as_str(),
            "https://acct.blob.core.windows.net/acme-widgets?restype=container"
        );
    }

    #[tokio::test]
    async fn test_request_timeout_from_config() {
        let (endpoint, _state) = serve().await;
        let mut config = config(endpoint, shared_key());
        config.timeout_secs = 1;
        let store = AzureBlobStore::new(&config).unwrap();
        let err = store.ensure_namespace("slow").await.unwrap_err();
        assert!(matches!(err, StorageError::Request(_)), "{err}");
    }

    #[test]
    fn test_endpoint_must_be_hierarchical() {
        let endpoint = Url::parse("mailto:blobs@example.com").unwrap();
        let err = AzureBlobStore::new(&config(endpoint, shared_key())).err().unwrap();
        assert!(matches!(err, StorageError::InvalidEndpoint(_)), "{err}");
    }
}
