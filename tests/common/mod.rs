//! In-process fake backends for integration tests.
//!
//! Each fake is an axum server bound to an ephemeral port on 127.0.0.1 and
//! keeps its state behind a mutex so tests can seed and inspect it. Every
//! fake counts mutating requests so idempotence can be asserted.

#![allow(dead_code, reason = "Each test binary uses a different subset of the fakes")]

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose, Engine as _};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tls_secret_sync::constants::{ANNOTATION_KEY, SECRET_TYPE_TLS, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY};
use tls_secret_sync::provider::gcp::auth::TokenSource;
use tls_secret_sync::provider::gcp::client::GcpRestClient;
use tokio::net::TcpListener;

pub const TEST_TOKEN: &str = "test-token";

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// REST client for a fake GCP service, authenticated with [`TEST_TOKEN`]
pub fn gcp_client(base_url: &str) -> GcpRestClient {
    GcpRestClient::new(
        reqwest::Client::new(),
        base_url,
        Arc::new(TokenSource::fixed(TEST_TOKEN)),
    )
}

fn gcp_error(status: StatusCode, grpc_status: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
                "status": grpc_status,
            }
        })),
    )
        .into_response()
}

fn is_authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == format!("Bearer {TEST_TOKEN}"))
}

// ---------------------------------------------------------------------------
// Kubernetes API
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct KubeState {
    /// Namespace name to the value of its opt-in annotation
    pub namespaces: BTreeMap<String, Option<String>>,
    pub secrets: BTreeMap<(String, String), Value>,
    pub mutations: usize,
    /// Namespaces whose secret reads answer with a server error
    pub failing_namespaces: BTreeSet<String>,
    next_uid: u64,
}

#[derive(Clone)]
pub struct FakeKube {
    pub state: Arc<Mutex<KubeState>>,
    pub client: kube::Client,
}

impl FakeKube {
    pub async fn start() -> Self {
        // kube builds a rustls connector even for plain HTTP clusters
        let _ = rustls::crypto::ring::default_provider().install_default();

        let state = Arc::new(Mutex::new(KubeState::default()));
        let app = Router::new()
            .route("/api/v1/namespaces", get(list_namespaces))
            .route(
                "/api/v1/namespaces/{namespace}/secrets",
                axum::routing::post(create_secret),
            )
            .route(
                "/api/v1/namespaces/{namespace}/secrets/{name}",
                get(get_secret).put(replace_secret).delete(delete_secret),
            )
            .with_state(Arc::clone(&state));
        let base_url = serve(app).await;

        let config = kube::Config::new(base_url.parse().unwrap());
        let client = kube::Client::try_from(config).unwrap();
        Self { state, client }
    }

    pub fn add_namespace(&self, name: &str, opt_in: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .insert(name.to_string(), opt_in.map(str::to_string));
    }

    pub fn set_opt_in(&self, namespace: &str, opt_in: Option<&str>) {
        self.add_namespace(namespace, opt_in);
    }

    /// Seed a TLS secret, optionally carrying an ownership annotation
    pub fn put_secret(
        &self,
        namespace: &str,
        name: &str,
        owner: Option<&str>,
        certificate: &[u8],
        private_key: &[u8],
    ) {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                annotations: owner.map(|owner| {
                    BTreeMap::from([(ANNOTATION_KEY.to_string(), owner.to_string())])
                }),
                ..ObjectMeta::default()
            },
            type_: Some(SECRET_TYPE_TLS.to_string()),
            data: Some(BTreeMap::from([
                (TLS_CERT_KEY.to_string(), ByteString(certificate.to_vec())),
                (TLS_PRIVATE_KEY_KEY.to_string(), ByteString(private_key.to_vec())),
            ])),
            ..Secret::default()
        };
        let mut state = self.state.lock().unwrap();
        let object = state.stamp(serde_json::to_value(&secret).unwrap(), namespace, None);
        state
            .secrets
            .insert((namespace.to_string(), name.to_string()), object);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .map(|value| serde_json::from_value(value.clone()).unwrap())
    }

    pub fn uid(&self, namespace: &str, name: &str) -> Option<String> {
        self.secret(namespace, name)
            .and_then(|secret| secret.metadata.uid)
    }

    pub fn mutations(&self) -> usize {
        self.state.lock().unwrap().mutations
    }

    pub fn fail_namespace(&self, namespace: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_namespaces
            .insert(namespace.to_string());
    }
}

impl KubeState {
    /// Fill in the server-managed fields of a stored object
    fn stamp(&mut self, mut object: Value, namespace: &str, uid: Option<String>) -> Value {
        self.next_uid += 1;
        let uid = uid.unwrap_or_else(|| format!("uid-{}", self.next_uid));
        object["apiVersion"] = json!("v1");
        object["kind"] = json!("Secret");
        object["metadata"]["namespace"] = json!(namespace);
        object["metadata"]["uid"] = json!(uid);
        object["metadata"]["resourceVersion"] = json!(self.next_uid.to_string());
        object
    }
}

fn kube_not_found(kind: &str, name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("{kind} \"{name}\" not found"),
            "reason": "NotFound",
            "details": { "name": name, "kind": kind },
            "code": 404,
        })),
    )
        .into_response()
}

async fn list_namespaces(State(state): State<Arc<Mutex<KubeState>>>) -> Response {
    let state = state.lock().unwrap();
    let items: Vec<Value> = state
        .namespaces
        .iter()
        .map(|(name, opt_in)| {
            let mut metadata = json!({ "name": name, "uid": format!("ns-{name}") });
            if let Some(opt_in) = opt_in {
                metadata["annotations"][ANNOTATION_KEY] = json!(opt_in);
            }
            json!({ "apiVersion": "v1", "kind": "Namespace", "metadata": metadata })
        })
        .collect();

    Json(json!({
        "apiVersion": "v1",
        "kind": "NamespaceList",
        "metadata": { "resourceVersion": "1" },
        "items": items,
    }))
    .into_response()
}

async fn get_secret(
    State(state): State<Arc<Mutex<KubeState>>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let state = state.lock().unwrap();
    if state.failing_namespaces.contains(&namespace) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "kind": "Status",
                "apiVersion": "v1",
                "metadata": {},
                "status": "Failure",
                "message": "etcdserver: request timed out",
                "reason": "InternalError",
                "code": 500,
            })),
        )
            .into_response();
    }
    match state.secrets.get(&(namespace, name.clone())) {
        Some(secret) => Json(secret.clone()).into_response(),
        None => kube_not_found("secrets", &name),
    }
}

async fn create_secret(
    State(state): State<Arc<Mutex<KubeState>>>,
    Path(namespace): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    let name = body["metadata"]["name"].as_str().unwrap_or_default().to_string();
    let key = (namespace.clone(), name.clone());
    if state.secrets.contains_key(&key) {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "kind": "Status",
                "apiVersion": "v1",
                "metadata": {},
                "status": "Failure",
                "message": format!("secrets \"{name}\" already exists"),
                "reason": "AlreadyExists",
                "code": 409,
            })),
        )
            .into_response();
    }

    let object = state.stamp(body, &namespace, None);
    state.secrets.insert(key, object.clone());
    state.mutations += 1;
    (StatusCode::CREATED, Json(object)).into_response()
}

async fn replace_secret(
    State(state): State<Arc<Mutex<KubeState>>>,
    Path((namespace, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    let key = (namespace.clone(), name.clone());
    let Some(existing) = state.secrets.get(&key) else {
        return kube_not_found("secrets", &name);
    };
    let uid = existing["metadata"]["uid"].as_str().map(str::to_string);

    let object = state.stamp(body, &namespace, uid);
    state.secrets.insert(key, object.clone());
    state.mutations += 1;
    Json(object).into_response()
}

async fn delete_secret(
    State(state): State<Arc<Mutex<KubeState>>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let mut state = state.lock().unwrap();
    match state.secrets.remove(&(namespace, name.clone())) {
        Some(secret) => {
            state.mutations += 1;
            Json(secret).into_response()
        }
        None => kube_not_found("secrets", &name),
    }
}

// ---------------------------------------------------------------------------
// Secret Manager
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SecretManagerState {
    /// Secret name to its versions, oldest first
    pub secrets: BTreeMap<String, Vec<Vec<u8>>>,
    pub mutations: usize,
    /// Reject every `addVersion` with a 500
    pub fail_writes: bool,
}

#[derive(Clone)]
pub struct FakeSecretManager {
    pub state: Arc<Mutex<SecretManagerState>>,
    pub base_url: String,
}

impl FakeSecretManager {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(SecretManagerState::default()));
        // Colon routes (`:access`, `:addVersion`) are parsed by hand
        let app = Router::new()
            .fallback(handle_secret_manager)
            .with_state(Arc::clone(&state));
        let base_url = serve(app).await;
        Self { state, base_url }
    }

    pub fn client(&self) -> GcpRestClient {
        gcp_client(&self.base_url)
    }

    /// Create a secret with the given versions, oldest first
    pub fn put_secret(&self, name: &str, versions: Vec<Vec<u8>>) {
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert(name.to_string(), versions);
    }

    pub fn versions(&self, name: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn mutations(&self) -> usize {
        self.state.lock().unwrap().mutations
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }
}

async fn handle_secret_manager(
    State(state): State<Arc<Mutex<SecretManagerState>>>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    if !is_authorized(&headers) {
        return gcp_error(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "missing token");
    }

    // /v1/projects/{project}/secrets/{secret}/versions/latest:access
    // /v1/projects/{project}/secrets/{secret}:addVersion
    let parts: Vec<&str> = uri.path().split('/').collect();
    let secret = parts
        .get(5)
        .and_then(|part| part.split(':').next())
        .unwrap_or_default()
        .to_string();
    let project = parts.get(3).copied().unwrap_or_default();
    let mut state = state.lock().unwrap();

    if method == Method::GET && uri.path().ends_with("/versions/latest:access") {
        return match state.secrets.get(&secret).and_then(|versions| versions.last()) {
            Some(latest) => {
                let count = state.secrets[&secret].len();
                Json(json!({
                    "name": format!("projects/{project}/secrets/{secret}/versions/{count}"),
                    "payload": { "data": general_purpose::STANDARD.encode(latest) },
                }))
                .into_response()
            }
            None => gcp_error(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Secret Version [projects/{project}/secrets/{secret}/versions/latest] not found."),
            ),
        };
    }

    if method == Method::POST && uri.path().ends_with(":addVersion") {
        if state.fail_writes {
            return gcp_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "backend unavailable");
        }
        let request: Value = serde_json::from_slice(&body).unwrap_or_default();
        let Some(data) = request["payload"]["data"]
            .as_str()
            .and_then(|data| general_purpose::STANDARD.decode(data).ok())
        else {
            return gcp_error(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", "payload.data is required");
        };
        let Some(versions) = state.secrets.get_mut(&secret) else {
            return gcp_error(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Secret [projects/{project}/secrets/{secret}] not found."),
            );
        };
        versions.push(data);
        let count = versions.len();
        state.mutations += 1;
        return Json(json!({
            "name": format!("projects/{project}/secrets/{secret}/versions/{count}"),
            "state": "ENABLED",
        }))
        .into_response();
    }

    gcp_error(StatusCode::NOT_FOUND, "NOT_FOUND", "unknown route")
}

// ---------------------------------------------------------------------------
// Certificate Manager
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct CertificateManagerState {
    /// Full certificate name to resource
    pub certificates: BTreeMap<String, Value>,
    /// Full map entry name to resource
    pub entries: BTreeMap<String, Value>,
    pub mutations: usize,
    /// Operations handed out with `done: false`, completed on first poll
    pub pending: BTreeMap<String, Value>,
    pub next_operation: u64,
    /// Return unfinished operations from mutations
    pub defer_operations: bool,
    /// Finish every operation with an error and apply nothing
    pub fail_operations: bool,
}

#[derive(Clone)]
pub struct FakeCertificateManager {
    pub state: Arc<Mutex<CertificateManagerState>>,
    pub base_url: String,
}

impl FakeCertificateManager {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(CertificateManagerState::default()));
        let app = Router::new()
            .fallback(handle_certificate_manager)
            .with_state(Arc::clone(&state));
        let base_url = serve(app).await;
        Self { state, base_url }
    }

    pub fn client(&self) -> GcpRestClient {
        gcp_client(&self.base_url)
    }

    pub fn put_certificate(&self, name: &str, labels: &[(&str, &str)]) {
        let labels: BTreeMap<_, _> = labels.iter().copied().collect();
        self.state.lock().unwrap().certificates.insert(
            name.to_string(),
            json!({ "name": name, "labels": labels, "pemCertificate": "seeded" }),
        );
    }

    pub fn put_entry(&self, name: &str, labels: &[(&str, &str)], certificates: &[&str], hostname: &str) {
        let labels: BTreeMap<_, _> = labels.iter().copied().collect();
        self.state.lock().unwrap().entries.insert(
            name.to_string(),
            json!({
                "name": name,
                "labels": labels,
                "certificates": certificates,
                "hostname": hostname,
            }),
        );
    }

    pub fn certificate_names(&self) -> Vec<String> {
        self.state.lock().unwrap().certificates.keys().cloned().collect()
    }

    pub fn certificate(&self, name: &str) -> Option<Value> {
        self.state.lock().unwrap().certificates.get(name).cloned()
    }

    pub fn entry(&self, name: &str) -> Option<Value> {
        self.state.lock().unwrap().entries.get(name).cloned()
    }

    pub fn entry_certificates(&self, name: &str) -> Vec<String> {
        self.entry(name)
            .and_then(|entry| serde_json::from_value(entry["certificates"].clone()).ok())
            .unwrap_or_default()
    }

    pub fn mutations(&self) -> usize {
        self.state.lock().unwrap().mutations
    }

    pub fn defer_operations(&self, defer: bool) {
        self.state.lock().unwrap().defer_operations = defer;
    }

    pub fn fail_operations(&self, fail: bool) {
        self.state.lock().unwrap().fail_operations = fail;
    }
}

impl CertificateManagerState {
    fn operation(&mut self, parent: &str) -> Response {
        self.next_operation += 1;
        let name = format!("{parent}/operations/operation-{}", self.next_operation);

        if self.fail_operations {
            return Json(json!({
                "name": name,
                "done": true,
                "error": { "code": 3, "message": "certificate is malformed" },
            }))
            .into_response();
        }

        let finished = json!({ "name": name, "done": true });
        if self.defer_operations {
            self.pending.insert(name.clone(), finished);
            return Json(json!({ "name": name, "done": false })).into_response();
        }
        Json(finished).into_response()
    }
}

async fn handle_certificate_manager(
    State(state): State<Arc<Mutex<CertificateManagerState>>>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    if !is_authorized(&headers) {
        return gcp_error(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "missing token");
    }

    let Some(resource) = uri.path().strip_prefix("/v1/") else {
        return gcp_error(StatusCode::NOT_FOUND, "NOT_FOUND", "unknown route");
    };
    let resource = resource.to_string();
    // projects/{p}/locations/{l}/...
    let parts: Vec<&str> = resource.split('/').collect();
    if parts.len() < 5 {
        return gcp_error(StatusCode::NOT_FOUND, "NOT_FOUND", "unknown route");
    }
    let parent = parts[..4].join("/");
    let request: Value = serde_json::from_slice(&body).unwrap_or_default();
    let mut state = state.lock().unwrap();

    match (parts[4], parts.len(), method) {
        ("operations", 6, Method::GET) => match state.pending.remove(&resource) {
            Some(finished) => Json(finished).into_response(),
            None => Json(json!({ "name": resource, "done": true })).into_response(),
        },

        ("certificates", 5, Method::POST) => {
            let Some(id) = query.get("certificateId") else {
                return gcp_error(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", "certificateId is required");
            };
            let name = format!("{resource}/{id}");
            if state.certificates.contains_key(&name) {
                return gcp_error(StatusCode::CONFLICT, "ALREADY_EXISTS", "certificate already exists");
            }
            if !state.fail_operations {
                state.certificates.insert(
                    name.clone(),
                    json!({
                        "name": name,
                        "labels": request["labels"],
                        "pemCertificate": request["selfManaged"]["pemCertificate"],
                    }),
                );
                state.mutations += 1;
            }
            state.operation(&parent)
        }
        ("certificates", 6, Method::GET) => match state.certificates.get(&resource) {
            Some(certificate) => Json(certificate.clone()).into_response(),
            None => gcp_error(StatusCode::NOT_FOUND, "NOT_FOUND", &format!("{resource} not found")),
        },
        ("certificates", 6, Method::DELETE) => {
            if !state.certificates.contains_key(&resource) {
                return gcp_error(StatusCode::NOT_FOUND, "NOT_FOUND", &format!("{resource} not found"));
            }
            if state
                .entries
                .values()
                .any(|entry| entry["certificates"].as_array().is_some_and(|certs| certs.contains(&json!(resource))))
            {
                return gcp_error(
                    StatusCode::BAD_REQUEST,
                    "FAILED_PRECONDITION",
                    "certificate is still referenced by a certificate map entry",
                );
            }
            if !state.fail_operations {
                state.certificates.remove(&resource);
                state.mutations += 1;
            }
            state.operation(&parent)
        }

        ("certificateMaps", 7, Method::POST) if parts[6] == "certificateMapEntries" => {
            let Some(id) = query.get("certificateMapEntryId") else {
                return gcp_error(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", "certificateMapEntryId is required");
            };
            let name = format!("{resource}/{id}");
            if state.entries.contains_key(&name) {
                return gcp_error(StatusCode::CONFLICT, "ALREADY_EXISTS", "entry already exists");
            }
            if !state.fail_operations {
                state.entries.insert(
                    name.clone(),
                    json!({
                        "name": name,
                        "labels": request["labels"],
                        "certificates": request["certificates"],
                        "hostname": request["hostname"],
                    }),
                );
                state.mutations += 1;
            }
            state.operation(&parent)
        }
        ("certificateMaps", 8, Method::GET) if parts[6] == "certificateMapEntries" => {
            match state.entries.get(&resource) {
                Some(entry) => Json(entry.clone()).into_response(),
                None => gcp_error(StatusCode::NOT_FOUND, "NOT_FOUND", &format!("{resource} not found")),
            }
        }
        ("certificateMaps", 8, Method::PATCH) if parts[6] == "certificateMapEntries" => {
            if query.get("updateMask").map(String::as_str) != Some("certificates") {
                return gcp_error(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", "unsupported updateMask");
            }
            if !state.entries.contains_key(&resource) {
                return gcp_error(StatusCode::NOT_FOUND, "NOT_FOUND", &format!("{resource} not found"));
            }
            if !state.fail_operations {
                if let Some(entry) = state.entries.get_mut(&resource) {
                    entry["certificates"] = request["certificates"].clone();
                }
                state.mutations += 1;
            }
            state.operation(&parent)
        }

        _ => gcp_error(StatusCode::NOT_FOUND, "NOT_FOUND", "unknown route"),
    }
}
