//! Typed bindings for the Conduit methods this client uses.
//!
//! # Design
//! Every binding builds a fresh parameter map, hands it to
//! `ConduitConnection::call`, and decodes the result into a type from
//! `types`. Query-style methods answer with a collection of records keyed
//! by an opaque PHID even when at most one match makes sense; those go through
//! `records` + `select`, and a missing match is `None`, not an error.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::connection::{CallOptions, ConduitConnection, Params};
use crate::error::{ConduitError, Result};
use crate::http::{HttpExecutor, UreqExecutor};
use crate::types::{Ping, ProjectInfo, TaskEdit, TaskInfo, User};

pub const ACTION_COMMENT: &str = "comment";
pub const ACTION_PROJECT_ADD: &str = "projects.add";
pub const ACTION_PROJECT_REMOVE: &str = "projects.remove";

/// A single mutation submitted through `maniphest.edit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTransaction {
    Comment(String),
    AddProjects(Vec<String>),
    RemoveProjects(Vec<String>),
}

impl TaskTransaction {
    /// Validates a loosely-typed action/value combination.
    ///
    /// `comment` is required for `comment`; `projects` is required for
    /// `projects.add` and `projects.remove`. Any other action is rejected.
    pub fn from_parts(action: &str, comment: Option<&str>, projects: Option<&[String]>) -> Result<Self> {
        let missing = |what: &str| {
            ConduitError::InvalidArgument(format!("the value of {what} (null) is invalid for the action {action}"))
        };
        match action {
            ACTION_COMMENT => comment
                .map(|c| TaskTransaction::Comment(c.to_string()))
                .ok_or_else(|| missing("comment")),
            ACTION_PROJECT_ADD => projects
                .map(|p| TaskTransaction::AddProjects(p.to_vec()))
                .ok_or_else(|| missing("projects")),
            ACTION_PROJECT_REMOVE => projects
                .map(|p| TaskTransaction::RemoveProjects(p.to_vec()))
                .ok_or_else(|| missing("projects")),
            other => Err(ConduitError::InvalidArgument(format!(
                "unknown task edit action `{other}`"
            ))),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            TaskTransaction::Comment(_) => ACTION_COMMENT,
            TaskTransaction::AddProjects(_) => ACTION_PROJECT_ADD,
            TaskTransaction::RemoveProjects(_) => ACTION_PROJECT_REMOVE,
        }
    }

    fn to_value(&self) -> Value {
        let value = match self {
            TaskTransaction::Comment(comment) => json!(comment),
            TaskTransaction::AddProjects(projects) | TaskTransaction::RemoveProjects(projects) => {
                json!(projects)
            }
        };
        json!({ "type": self.action(), "value": value })
    }
}

/// Outcome of picking one record out of a query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<T> {
    Found(T),
    NotFound,
    /// More than one record matched, in server order.
    Ambiguous(Vec<T>),
}

impl<T> Selection<T> {
    fn from_matches(mut matches: Vec<T>) -> Self {
        match matches.len() {
            0 => Selection::NotFound,
            1 => Selection::Found(matches.remove(0)),
            _ => Selection::Ambiguous(matches),
        }
    }

    /// The match, only if it was the only one.
    pub fn into_unique(self) -> Option<T> {
        match self {
            Selection::Found(value) => Some(value),
            Selection::NotFound | Selection::Ambiguous(_) => None,
        }
    }

    /// The match, or the last of several.
    pub fn into_last(self) -> Option<T> {
        match self {
            Selection::Found(value) => Some(value),
            Selection::NotFound => None,
            Selection::Ambiguous(mut matches) => matches.pop(),
        }
    }
}

/// Decodes every record of a collection that is either a JSON object keyed by
/// opaque id or a JSON array. PHP encodes an empty map as `[]`, and a null
/// collection is treated as empty.
pub fn records<T: DeserializeOwned>(method: &str, expected: &'static str, collection: Value) -> Result<Vec<T>> {
    let values: Vec<Value> = match collection {
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => {
            return Err(ConduitError::decode(
                method,
                expected,
                format!("expected a collection, got {other}"),
            ))
        }
    };
    values.into_iter().map(|v| decode(method, expected, v)).collect()
}

/// Keeps the records matching `predicate`.
pub fn select<T>(records: Vec<T>, predicate: impl Fn(&T) -> bool) -> Selection<T> {
    Selection::from_matches(records.into_iter().filter(|r| predicate(r)).collect())
}

fn decode<T: DeserializeOwned>(method: &str, expected: &'static str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ConduitError::decode(method, expected, e))
}

/// Bindings for Phabricator's Conduit API.
#[derive(Debug, Clone)]
pub struct PhabConduit<E = UreqExecutor> {
    connection: ConduitConnection<E>,
    token: Option<String>,
    options: CallOptions,
}

impl PhabConduit<UreqExecutor> {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_connection(ConduitConnection::new(config))
    }
}

impl<E: HttpExecutor> PhabConduit<E> {
    /// Authenticates with the token from the connection's config, if any.
    pub fn with_connection(connection: ConduitConnection<E>) -> Self {
        let token = connection.config().token().map(str::to_string);
        Self {
            connection,
            token,
            options: CallOptions::default(),
        }
    }

    /// Applies `options` to every call made through these bindings.
    pub fn with_call_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn connection(&self) -> &ConduitConnection<E> {
        &self.connection
    }

    fn call(&self, method: &str, params: Params) -> Result<Value> {
        self.connection
            .call_with(method, &params, self.token.as_deref(), &self.options)
    }

    /// Runs `conduit.ping`.
    pub fn conduit_ping(&self) -> Result<Ping> {
        let method = "conduit.ping";
        let result = self.call(method, Params::new())?;
        decode(method, "ping", json!({ "hostname": result }))
    }

    /// Runs `user.ldapquery` and returns the user whose `userName` is exactly
    /// `identity`. Several matching records count as no match.
    pub fn user_by_identity(&self, identity: &str) -> Result<Option<User>> {
        let method = "user.ldapquery";
        let mut params = Params::new();
        params.insert("ldapnames".to_string(), json!([identity]));

        let result = self.call(method, params)?;
        let users: Vec<User> = records(method, "user records", result)?;
        let selection = select(users, |user| user.user_name == identity);
        if let Selection::Ambiguous(matches) = &selection {
            debug!(identity, matches = matches.len(), "ambiguous user lookup");
        }
        Ok(selection.into_unique())
    }

    /// Runs `project.query` and returns the project named exactly `name`.
    ///
    /// Duplicate names are not detected: the last match in the order the
    /// server sent them wins.
    pub fn project_query(&self, name: &str) -> Result<Option<ProjectInfo>> {
        let method = "project.query";
        let mut params = Params::new();
        params.insert("names".to_string(), json!([name]));

        let result = self.call(method, params)?;
        let collection = match result {
            Value::Object(mut map)
                if map
                    .get("data")
                    .is_some_and(|d| d.is_object() || d.is_array() || d.is_null()) =>
            {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        };
        let projects: Vec<ProjectInfo> = records(method, "project records", collection)?;
        Ok(select(projects, |project| project.name == name).into_last())
    }

    /// Runs `maniphest.info`.
    pub fn maniphest_info(&self, task_id: u64) -> Result<TaskInfo> {
        let method = "maniphest.info";
        let mut params = Params::new();
        params.insert("task_id".to_string(), json!(task_id));

        let result = self.call(method, params)?;
        decode(method, "task info", result)
    }

    /// Runs `maniphest.edit` with a single transaction.
    pub fn maniphest_edit(&self, task_id: u64, transaction: &TaskTransaction) -> Result<TaskEdit> {
        let method = "maniphest.edit";
        let mut params = Params::new();
        params.insert("objectIdentifier".to_string(), json!(task_id));
        params.insert("transactions".to_string(), json!([transaction.to_value()]));

        let result = self.call(method, params)?;
        decode(method, "task edit", result)
    }

    /// Runs `maniphest.edit` from a loosely-typed action, validating the
    /// combination before anything is sent.
    pub fn maniphest_edit_raw(
        &self,
        task_id: u64,
        comment: Option<&str>,
        projects: Option<&[String]>,
        action: &str,
    ) -> Result<TaskEdit> {
        let transaction = TaskTransaction::from_parts(action, comment, projects)?;
        self.maniphest_edit(task_id, &transaction)
    }

    pub fn comment_on_task(&self, task_id: u64, comment: &str) -> Result<TaskEdit> {
        self.maniphest_edit(task_id, &TaskTransaction::Comment(comment.to_string()))
    }

    pub fn add_projects<I, S>(&self, task_id: u64, projects: I) -> Result<TaskEdit>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let projects = projects.into_iter().map(Into::into).collect();
        self.maniphest_edit(task_id, &TaskTransaction::AddProjects(projects))
    }

    pub fn remove_projects<I, S>(&self, task_id: u64, projects: I) -> Result<TaskEdit>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let projects = projects.into_iter().map(Into::into).collect();
        self.maniphest_edit(task_id, &TaskTransaction::RemoveProjects(projects))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::TransportErrorKind;
    use crate::testing::ScriptedExecutor;

    fn conduit() -> PhabConduit<ScriptedExecutor> {
        PhabConduit::with_connection(ConduitConnection::with_executor(
            ConnectionConfig::new("https://phab.example.com").with_token("api-token"),
            ScriptedExecutor::default(),
        ))
    }

    fn executor(conduit: &PhabConduit<ScriptedExecutor>) -> &ScriptedExecutor {
        conduit.connection().executor()
    }

    fn reply(conduit: &PhabConduit<ScriptedExecutor>, result: Value) {
        executor(conduit).push_json(200, json!({"result": result, "error_code": null, "error_info": null}));
    }

    #[test]
    fn ping_wraps_hostname() {
        let c = conduit();
        reply(&c, json!("phab01.example.com"));
        let ping = c.conduit_ping().unwrap();
        assert_eq!(ping.hostname.as_deref(), Some("phab01.example.com"));
        assert_eq!(executor(&c).last_url(), "https://phab.example.com/api/conduit.ping");
        assert_eq!(
            executor(&c).last_params(),
            json!({"__conduit__": {"token": "api-token"}})
        );
    }

    #[test]
    fn ping_accepts_null_result() {
        let c = conduit();
        reply(&c, Value::Null);
        assert_eq!(c.conduit_ping().unwrap(), Ping { hostname: None });
    }

    #[test]
    fn ping_rejects_non_string_result() {
        let c = conduit();
        reply(&c, json!({"host": "x"}));
        let err = c.conduit_ping().unwrap_err();
        assert!(matches!(err, ConduitError::Decode { expected: "ping", .. }));
    }

    #[test]
    fn project_query_selects_exact_name() {
        let c = conduit();
        reply(
            &c,
            json!({
                "PHID-1": {"phid": "PHID-1", "name": "alpha"},
                "PHID-2": {"phid": "PHID-2", "name": "beta"}
            }),
        );
        let project = c.project_query("beta").unwrap().unwrap();
        assert_eq!(project.phid, "PHID-2");
        assert_eq!(executor(&c).last_params()["names"], json!(["beta"]));
    }

    #[test]
    fn project_query_miss_is_none() {
        let c = conduit();
        reply(
            &c,
            json!({
                "PHID-1": {"phid": "PHID-1", "name": "alpha"},
                "PHID-2": {"phid": "PHID-2", "name": "beta"}
            }),
        );
        assert_eq!(c.project_query("gamma").unwrap(), None);
    }

    #[test]
    fn project_query_reads_data_field() {
        let c = conduit();
        reply(
            &c,
            json!({
                "data": {"PHID-PROJ-9": {"id": 9, "phid": "PHID-PROJ-9", "name": "gerrit"}},
                "slugMap": [],
                "cursor": {"limit": 100, "after": null, "before": null}
            }),
        );
        let project = c.project_query("gerrit").unwrap().unwrap();
        assert_eq!(project.id.as_deref(), Some("9"));
    }

    #[test]
    fn project_query_last_duplicate_wins() {
        let c = conduit();
        reply(
            &c,
            json!([
                {"phid": "PHID-1", "name": "dup"},
                {"phid": "PHID-2", "name": "dup"}
            ]),
        );
        assert_eq!(c.project_query("dup").unwrap().unwrap().phid, "PHID-2");
    }

    #[test]
    fn project_query_last_duplicate_wins_in_wire_order() {
        let c = conduit();
        // Keys deliberately out of lexical order.
        reply(
            &c,
            json!({"data": {
                "PHID-PROJ-B": {"phid": "PHID-PROJ-B", "name": "dup"},
                "PHID-PROJ-A": {"phid": "PHID-PROJ-A", "name": "dup"}
            }}),
        );
        assert_eq!(c.project_query("dup").unwrap().unwrap().phid, "PHID-PROJ-A");
    }

    #[test]
    fn project_query_null_data_is_none() {
        let c = conduit();
        reply(&c, json!({"data": null, "slugMap": [], "cursor": {"limit": 100}}));
        assert_eq!(c.project_query("alpha").unwrap(), None);
    }

    #[test]
    fn project_query_empty_php_array_is_none() {
        let c = conduit();
        reply(&c, json!({"data": [], "slugMap": []}));
        assert_eq!(c.project_query("alpha").unwrap(), None);
    }

    #[test]
    fn project_query_malformed_record_is_decode_error() {
        let c = conduit();
        reply(&c, json!({"PHID-1": {"phid": "PHID-1"}}));
        let err = c.project_query("alpha").unwrap_err();
        assert!(matches!(err, ConduitError::Decode { expected: "project records", .. }));
    }

    #[test]
    fn user_lookup_verifies_identity() {
        let c = conduit();
        reply(
            &c,
            json!({"PHID-USER-1": {"phid": "PHID-USER-1", "userName": "jdoe", "image": "https://img/jdoe.png"}}),
        );
        let user = c.user_by_identity("jdoe").unwrap().unwrap();
        assert_eq!(user.image.as_deref(), Some("https://img/jdoe.png"));
        assert_eq!(executor(&c).last_params()["ldapnames"], json!(["jdoe"]));
    }

    #[test]
    fn user_lookup_mismatch_is_none() {
        let c = conduit();
        reply(&c, json!([{"phid": "PHID-USER-1", "userName": "someone-else"}]));
        assert_eq!(c.user_by_identity("jdoe").unwrap(), None);
    }

    #[test]
    fn user_lookup_ambiguous_is_none() {
        let c = conduit();
        reply(
            &c,
            json!([
                {"phid": "PHID-USER-1", "userName": "jdoe"},
                {"phid": "PHID-USER-2", "userName": "jdoe"}
            ]),
        );
        assert_eq!(c.user_by_identity("jdoe").unwrap(), None);
    }

    #[test]
    fn task_info_sends_task_id() {
        let c = conduit();
        reply(
            &c,
            json!({"id": "12", "phid": "PHID-TASK-12", "title": "Crash", "status": "open", "isClosed": false}),
        );
        let task = c.maniphest_info(12).unwrap();
        assert_eq!(task.title, "Crash");
        assert_eq!(executor(&c).last_params()["task_id"], json!(12));
    }

    #[test]
    fn task_id_zero_is_left_to_the_server() {
        let c = conduit();
        executor(&c).push_json(
            200,
            json!({"result": null, "error_code": "ERR_BAD_TASK", "error_info": "No such Maniphest task exists."}),
        );
        let err = c.maniphest_info(0).unwrap_err();
        assert!(matches!(err, ConduitError::Remote { .. }));
        assert_eq!(executor(&c).calls(), 1);
        assert_eq!(executor(&c).last_params()["task_id"], json!(0));
    }

    #[test]
    fn comment_edit_builds_transaction() {
        let c = conduit();
        reply(&c, json!({"object": {"id": 5, "phid": "PHID-TASK-5"}, "transactions": [{"phid": "PHID-XACT-1"}]}));
        let edit = c.comment_on_task(5, "Change merged").unwrap();
        assert_eq!(edit.object.phid, "PHID-TASK-5");

        let sent = executor(&c).last_params();
        assert_eq!(sent["objectIdentifier"], json!(5));
        assert_eq!(
            sent["transactions"],
            json!([{"type": "comment", "value": "Change merged"}])
        );
    }

    #[test]
    fn project_edits_send_project_lists() {
        let c = conduit();
        reply(&c, json!({"object": {"id": 5, "phid": "PHID-TASK-5"}, "transactions": []}));
        reply(&c, json!({"object": {"id": 5, "phid": "PHID-TASK-5"}, "transactions": []}));

        c.add_projects(5, ["PHID-PROJ-1", "PHID-PROJ-2"]).unwrap();
        assert_eq!(
            executor(&c).last_params()["transactions"],
            json!([{"type": "projects.add", "value": ["PHID-PROJ-1", "PHID-PROJ-2"]}])
        );

        c.remove_projects(5, vec!["PHID-PROJ-1".to_string()]).unwrap();
        assert_eq!(
            executor(&c).last_params()["transactions"],
            json!([{"type": "projects.remove", "value": ["PHID-PROJ-1"]}])
        );
    }

    #[test]
    fn comment_action_without_comment_fails_before_sending() {
        let c = conduit();
        let err = c.maniphest_edit_raw(5, None, None, ACTION_COMMENT).unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(executor(&c).calls(), 0);
    }

    #[test]
    fn project_action_without_projects_fails_before_sending() {
        let c = conduit();
        let err = c
            .maniphest_edit_raw(5, Some("ignored"), None, ACTION_PROJECT_ADD)
            .unwrap_err();
        assert!(err.is_invalid_argument());
        let err = c.maniphest_edit_raw(5, None, None, ACTION_PROJECT_REMOVE).unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(executor(&c).calls(), 0);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = TaskTransaction::from_parts("subscribers.add", Some("x"), None).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn remote_error_propagates_unchanged() {
        let c = conduit();
        executor(&c).push_json(
            200,
            json!({"result": null, "error_code": "ERR_BAD_TASK", "error_info": "No such Maniphest task exists."}),
        );
        let err = c.maniphest_info(99).unwrap_err();
        assert!(matches!(err, ConduitError::Remote { ref method, .. } if method == "maniphest.info"));
    }

    #[test]
    fn transport_error_propagates_unchanged() {
        let c = conduit();
        executor(&c).push_failure(TransportErrorKind::Timeout);
        let err = c.project_query("alpha").unwrap_err();
        match err {
            ConduitError::Transport { source, .. } => assert!(source.is_timeout()),
            other => panic!("expected Transport, got {other:?}"),
        }
    }

    #[test]
    fn selection_helpers() {
        assert_eq!(select(vec![1, 2, 3], |n| *n == 2), Selection::Found(2));
        assert_eq!(select(vec![1, 2, 3], |n| *n > 5), Selection::NotFound);
        let both = select(vec![1, 2, 3], |n| *n > 1);
        assert_eq!(both, Selection::Ambiguous(vec![2, 3]));
        assert_eq!(both.clone().into_unique(), None);
        assert_eq!(both.into_last(), Some(3));
    }
}
