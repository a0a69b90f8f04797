use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;
use uuid::Uuid;

pub const HOSTNAME: &str = "mock-phabricator";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub phid: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "realName")]
    pub real_name: String,
    pub image: Option<String>,
    pub uri: String,
    pub roles: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Project {
    pub id: u64,
    pub phid: String,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct Task {
    pub id: u64,
    pub phid: String,
    pub title: String,
    pub project_phids: BTreeSet<String>,
    pub comments: Vec<String>,
}

/// In-memory Phabricator state served by the mock.
#[derive(Debug, Default)]
pub struct Directory {
    users: Vec<User>,
    projects: BTreeMap<String, Project>,
    tasks: BTreeMap<u64, Task>,
    token: Option<String>,
}

impl Directory {
    /// A small fixture with two users, two projects and one task (T1).
    pub fn sample() -> Self {
        let mut directory = Directory::default();
        directory.add_user("jdoe", Some("https://phab.example.com/file/jdoe.png"));
        directory.add_user("nopic", None);
        directory.add_project("alpha");
        directory.add_project("beta");
        directory.add_task(1, "Mock server task");
        directory
    }

    /// Rejects calls that do not carry `token`.
    pub fn require_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn add_user(&mut self, user_name: &str, image: Option<&str>) -> String {
        let phid = new_phid("USER");
        self.users.push(User {
            phid: phid.clone(),
            user_name: user_name.to_string(),
            real_name: user_name.to_string(),
            image: image.map(str::to_string),
            uri: format!("https://phab.example.com/p/{user_name}/"),
            roles: vec!["verified".to_string(), "approved".to_string(), "activated".to_string()],
        });
        phid
    }

    pub fn add_project(&mut self, name: &str) -> String {
        let phid = new_phid("PROJ");
        let id = self.projects.len() as u64 + 1;
        self.projects.insert(
            phid.clone(),
            Project {
                id,
                phid: phid.clone(),
                name: name.to_string(),
            },
        );
        phid
    }

    pub fn add_task(&mut self, id: u64, title: &str) -> String {
        let phid = new_phid("TASK");
        self.tasks.insert(
            id,
            Task {
                id,
                phid: phid.clone(),
                title: title.to_string(),
                project_phids: BTreeSet::new(),
                comments: Vec::new(),
            },
        );
        phid
    }

    pub fn project_phid(&self, name: &str) -> Option<String> {
        self.projects
            .values()
            .find(|p| p.name == name)
            .map(|p| p.phid.clone())
    }

    pub fn task(&self, id: u64) -> Option<&Task> {
        self.tasks.get(&id)
    }
}

pub type Db = Arc<RwLock<Directory>>;

/// A Conduit-level failure, reported inside a 200 response like the real API.
#[derive(Debug, PartialEq, Eq)]
pub struct Failure {
    pub code: &'static str,
    pub info: String,
}

impl Failure {
    fn new(code: &'static str, info: impl Into<String>) -> Self {
        Self {
            code,
            info: info.into(),
        }
    }
}

pub fn app() -> Router {
    app_with(Arc::new(RwLock::new(Directory::sample())))
}

pub fn app_with(db: Db) -> Router {
    Router::new()
        .route("/api/{method}", post(call))
        .with_state(db)
}

pub async fn run(listener: TcpListener, db: Db) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(db)).await
}

async fn call(State(db): State<Db>, Path(method): Path<String>, body: String) -> Json<Value> {
    debug!(%method, bytes = body.len(), "conduit call");
    let outcome = match parse_params(&body) {
        Ok(params) => dispatch(&db, &method, params).await,
        Err(failure) => Err(failure),
    };
    Json(match outcome {
        Ok(result) => json!({"result": result, "error_code": null, "error_info": null}),
        Err(failure) => {
            debug!(%method, code = failure.code, info = %failure.info, "conduit call failed");
            json!({"result": null, "error_code": failure.code, "error_info": failure.info})
        }
    })
}

/// Reads the `params` field, accepting both percent-encoded and raw JSON.
pub fn parse_params(body: &str) -> Result<Map<String, Value>, Failure> {
    let raw = body
        .strip_prefix("params=")
        .ok_or_else(|| Failure::new("ERR-CONDUIT-CALL", "request has no params field"))?;
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(_) => url::form_urlencoded::parse(body.as_bytes())
            .find(|(key, _)| key == "params")
            .and_then(|(_, json)| serde_json::from_str::<Value>(&json).ok())
            .ok_or_else(|| Failure::new("ERR-CONDUIT-CALL", "params is not valid JSON"))?,
    };
    match value {
        Value::Object(map) => Ok(map),
        // PHP encodes an empty map as [].
        Value::Array(items) if items.is_empty() => Ok(Map::new()),
        _ => Err(Failure::new("ERR-CONDUIT-CALL", "params must be a JSON object")),
    }
}

async fn dispatch(db: &Db, method: &str, params: Map<String, Value>) -> Result<Value, Failure> {
    authenticate(&*db.read().await, &params)?;
    match method {
        "conduit.ping" => Ok(json!(HOSTNAME)),
        "user.ldapquery" => user_ldapquery(&*db.read().await, &params),
        "project.query" => project_query(&*db.read().await, &params),
        "maniphest.info" => maniphest_info(&*db.read().await, &params),
        "maniphest.edit" => maniphest_edit(&mut *db.write().await, &params),
        other => Err(Failure::new(
            "ERR-CONDUIT-CORE",
            format!("Conduit method '{other}' does not exist."),
        )),
    }
}

fn authenticate(directory: &Directory, params: &Map<String, Value>) -> Result<(), Failure> {
    let Some(expected) = &directory.token else {
        return Ok(());
    };
    let supplied = params
        .get("__conduit__")
        .and_then(|c| c.get("token"))
        .and_then(Value::as_str);
    if supplied == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(Failure::new("ERR-INVALID-AUTH", "API token is invalid."))
    }
}

fn string_list(params: &Map<String, Value>, key: &str) -> Result<Option<Vec<String>>, Failure> {
    let Some(value) = params.get(key) else {
        return Ok(None);
    };
    serde_json::from_value(value.clone())
        .map(Some)
        .map_err(|_| Failure::new("ERR-CONDUIT-CALL", format!("{key} must be a list of strings")))
}

fn task_id(params: &Map<String, Value>, key: &str) -> Result<u64, Failure> {
    match params.get(key) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim_start_matches('T').parse().ok(),
        _ => None,
    }
    .ok_or_else(|| Failure::new("ERR-CONDUIT-CALL", format!("{key} must be a task id")))
}

fn user_ldapquery(directory: &Directory, params: &Map<String, Value>) -> Result<Value, Failure> {
    let names = string_list(params, "ldapnames")?
        .ok_or_else(|| Failure::new("ERR-CONDUIT-CALL", "ldapnames is required"))?;
    let users: Vec<&User> = directory
        .users
        .iter()
        .filter(|u| names.contains(&u.user_name))
        .collect();
    Ok(json!(users))
}

fn project_query(directory: &Directory, params: &Map<String, Value>) -> Result<Value, Failure> {
    let names = string_list(params, "names")?;
    let data: Map<String, Value> = directory
        .projects
        .values()
        .filter(|p| names.as_ref().map_or(true, |names| names.contains(&p.name)))
        .map(|p| {
            (
                p.phid.clone(),
                json!({
                    "id": p.id.to_string(),
                    "phid": p.phid,
                    "name": p.name,
                    "members": [],
                    "slugs": [p.name.to_lowercase()],
                    "dateCreated": "1500000000",
                    "dateModified": "1500000000",
                }),
            )
        })
        .collect();
    let data = if data.is_empty() { json!([]) } else { Value::Object(data) };
    Ok(json!({
        "data": data,
        "slugMap": [],
        "cursor": {"limit": 100, "after": null, "before": null}
    }))
}

fn task_json(task: &Task) -> Value {
    json!({
        "id": task.id.to_string(),
        "phid": task.phid,
        "title": task.title,
        "description": "",
        "status": "open",
        "statusName": "Open",
        "isClosed": false,
        "priority": "Normal",
        "projectPHIDs": task.project_phids,
        "objectName": format!("T{}", task.id),
        "uri": format!("https://phab.example.com/T{}", task.id),
        "dateCreated": "1500000000",
        "dateModified": "1500000000",
    })
}

fn maniphest_info(directory: &Directory, params: &Map<String, Value>) -> Result<Value, Failure> {
    let id = task_id(params, "task_id")?;
    directory
        .tasks
        .get(&id)
        .map(task_json)
        .ok_or_else(|| Failure::new("ERR_BAD_TASK", "No such Maniphest task exists."))
}

#[derive(Deserialize)]
struct Transaction {
    #[serde(rename = "type")]
    kind: String,
    value: Value,
}

fn maniphest_edit(directory: &mut Directory, params: &Map<String, Value>) -> Result<Value, Failure> {
    let id = task_id(params, "objectIdentifier")?;
    let transactions: Vec<Transaction> = params
        .get("transactions")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|_| Failure::new("ERR-CONDUIT-CALL", "transactions must be a list of {type, value}"))?
        .unwrap_or_default();

    let known_projects: BTreeSet<String> = directory.projects.keys().cloned().collect();
    let task = directory
        .tasks
        .get_mut(&id)
        .ok_or_else(|| Failure::new("ERR-CONDUIT-CORE", format!("No object exists with ID \"{id}\".")))?;

    let mut applied = Vec::new();
    for transaction in transactions {
        match (transaction.kind.as_str(), transaction.value) {
            ("comment", Value::String(comment)) => task.comments.push(comment),
            (kind @ ("projects.add" | "projects.remove"), value) => {
                let phids: Vec<String> = serde_json::from_value(value)
                    .map_err(|_| Failure::new("ERR-CONDUIT-CORE", format!("{kind} expects a list of PHIDs")))?;
                if let Some(unknown) = phids.iter().find(|p| !known_projects.contains(*p)) {
                    return Err(Failure::new("ERR-CONDUIT-CORE", format!("Unknown project \"{unknown}\".")));
                }
                if kind == "projects.add" {
                    task.project_phids.extend(phids);
                } else {
                    task.project_phids.retain(|p| !phids.contains(p));
                }
            }
            (kind, _) => {
                return Err(Failure::new(
                    "ERR-CONDUIT-CORE",
                    format!("Transaction type \"{kind}\" is unknown or has an invalid value."),
                ))
            }
        }
        applied.push(json!({ "phid": new_phid("XACT-TASK") }));
    }

    Ok(json!({
        "object": {"id": task.id, "phid": task.phid},
        "transactions": applied,
    }))
}

fn new_phid(kind: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("PHID-{kind}-{}", &id[..20])
}
