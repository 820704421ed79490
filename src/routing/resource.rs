//! Conventional resource routes.
//!
//! A resource name maps to a collection path (`/users`) and a member path
//! (`/users/:id`). With CRUD enabled every conventional action is registered;
//! actions the caller did not supply answer `501 Not Implemented` and name the
//! missing action.

use axum::http::StatusCode;
use serde_json::json;

use crate::http::handler::{Handler, HandlerSpec};
use crate::http::response::{json_response, HandlerError};
use crate::routing::composer::{compose, RegisteredRoute, RouteNode, RouteSpec};
use crate::routing::error::RouteError;
use crate::routing::matcher::normalize_path;
use crate::routing::pipeline::Pipeline;

/// The five conventional actions of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrudAction {
    List,
    Create,
    Show,
    Update,
    Remove,
}

impl CrudAction {
    pub const ALL: [CrudAction; 5] = [
        CrudAction::List,
        CrudAction::Create,
        CrudAction::Show,
        CrudAction::Update,
        CrudAction::Remove,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CrudAction::List => "list",
            CrudAction::Create => "create",
            CrudAction::Show => "show",
            CrudAction::Update => "update",
            CrudAction::Remove => "remove",
        }
    }
}

/// Explicit action mapping for a CRUD resource. Unset actions get a stub.
#[derive(Clone, Debug)]
pub struct CrudActions {
    id_param: String,
    list: Option<HandlerSpec>,
    create: Option<HandlerSpec>,
    show: Option<HandlerSpec>,
    update: Option<HandlerSpec>,
    remove: Option<HandlerSpec>,
}

impl Default for CrudActions {
    fn default() -> Self {
        Self {
            id_param: "id".to_string(),
            list: None,
            create: None,
            show: None,
            update: None,
            remove: None,
        }
    }
}

impl CrudActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the member placeholder segment (default `id`).
    pub fn id_param(mut self, name: impl Into<String>) -> Self {
        self.id_param = name.into();
        self
    }

    pub fn list(mut self, handlers: impl Into<HandlerSpec>) -> Self {
        self.list = Some(handlers.into());
        self
    }

    pub fn create(mut self, handlers: impl Into<HandlerSpec>) -> Self {
        self.create = Some(handlers.into());
        self
    }

    pub fn show(mut self, handlers: impl Into<HandlerSpec>) -> Self {
        self.show = Some(handlers.into());
        self
    }

    pub fn update(mut self, handlers: impl Into<HandlerSpec>) -> Self {
        self.update = Some(handlers.into());
        self
    }

    pub fn remove(mut self, handlers: impl Into<HandlerSpec>) -> Self {
        self.remove = Some(handlers.into());
        self
    }

    fn into_node(self, resource: &str) -> RouteNode {
        let fill = |action: CrudAction, supplied: Option<HandlerSpec>| {
            supplied.unwrap_or_else(|| HandlerSpec::Single(not_implemented(action, resource)))
        };
        let member = RouteNode::new()
            .get(fill(CrudAction::Show, self.show))
            .put(fill(CrudAction::Update, self.update))
            .delete(fill(CrudAction::Remove, self.remove));
        RouteNode::new()
            .get(fill(CrudAction::List, self.list))
            .post(fill(CrudAction::Create, self.create))
            .at(format!("/:{}", self.id_param), member)
    }
}

/// What to register for a resource.
#[derive(Clone, Debug)]
pub enum ResourceSpec {
    /// Literal routes (a handler means GET on the collection).
    Routes(RouteSpec),
    /// Conventional CRUD routes.
    Crud(CrudActions),
}

impl ResourceSpec {
    /// CRUD with every action stubbed.
    pub fn crud() -> Self {
        ResourceSpec::Crud(CrudActions::default())
    }
}

impl From<RouteSpec> for ResourceSpec {
    fn from(spec: RouteSpec) -> Self {
        ResourceSpec::Routes(spec)
    }
}

impl From<RouteNode> for ResourceSpec {
    fn from(node: RouteNode) -> Self {
        ResourceSpec::Routes(RouteSpec::Node(node))
    }
}

impl From<Handler> for ResourceSpec {
    fn from(handler: Handler) -> Self {
        ResourceSpec::Routes(RouteSpec::Single(handler))
    }
}

impl From<Vec<Handler>> for ResourceSpec {
    fn from(handlers: Vec<Handler>) -> Self {
        ResourceSpec::Routes(RouteSpec::Chain(handlers))
    }
}

impl From<CrudActions> for ResourceSpec {
    fn from(actions: CrudActions) -> Self {
        ResourceSpec::Crud(actions)
    }
}

/// Register a resource's routes.
pub fn compose_resource(
    pipeline: &Pipeline,
    resource: &str,
    spec: impl Into<ResourceSpec>,
) -> Result<Vec<RegisteredRoute>, RouteError> {
    let base = normalize_path(resource);
    match spec.into() {
        ResourceSpec::Routes(routes) => compose(pipeline, &base, routes),
        ResourceSpec::Crud(actions) => {
            let node = actions.into_node(&base);
            compose(pipeline, &base, node)
        }
    }
}

/// Placeholder for an action the caller did not implement.
pub fn not_implemented(action: CrudAction, resource: &str) -> Handler {
    let resource = resource.to_string();
    let name = action.name();
    Handler::endpoint(move |_req| {
        let body = json!({
            "error": "Not Implemented",
            "action": name,
            "resource": resource,
        });
        async move { Ok::<_, HandlerError>(json_response(StatusCode::NOT_IMPLEMENTED, &body)) }
    })
    .named(format!("not_implemented:{}", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::Request;
    use axum::body::Body;
    use axum::http::Method;
    use serde_json::Value;

    async fn call(pipeline: &Pipeline, method: Method, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let res = pipeline.dispatch(req).await;
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_crud_stubs_all_actions() {
        let pipeline = Pipeline::new();
        let registered = compose_resource(&pipeline, "users", ResourceSpec::crud()).unwrap();
        let summary: Vec<String> = registered.iter().map(|r| r.to_string()).collect();
        assert_eq!(
            summary,
            vec![
                "GET /users",
                "POST /users",
                "GET /users/:id",
                "PUT /users/:id",
                "DELETE /users/:id",
            ]
        );

        let cases = [
            (Method::GET, "/users", "list"),
            (Method::POST, "/users", "create"),
            (Method::GET, "/users/7", "show"),
            (Method::PUT, "/users/7", "update"),
            (Method::DELETE, "/users/7", "remove"),
        ];
        for (method, uri, action) in cases {
            let (status, body) = call(&pipeline, method, uri).await;
            assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
            assert_eq!(body["action"], action);
            assert_eq!(body["resource"], "/users");
        }
    }

    #[tokio::test]
    async fn test_crud_partial_actions() {
        let pipeline = Pipeline::new();
        let list = Handler::endpoint(|_req| async move {
            Ok::<_, HandlerError>(json_response(StatusCode::OK, &json!(["a", "b"])))
        });
        compose_resource(&pipeline, "/items/", CrudActions::new().list(list)).unwrap();

        let (status, body) = call(&pipeline, Method::GET, "/items").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["a", "b"]));

        let (status, body) = call(&pipeline, Method::DELETE, "/items/1").await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["action"], "remove");
    }

    #[test]
    fn test_custom_id_param() {
        let pipeline = Pipeline::new();
        let registered =
            compose_resource(&pipeline, "/posts", CrudActions::new().id_param("slug")).unwrap();
        assert_eq!(registered[2].path, "/posts/:slug");
    }

    #[test]
    fn test_handler_is_collection_get() {
        let pipeline = Pipeline::new();
        let h = Handler::endpoint(|_req| async move { Ok::<_, HandlerError>("all") });
        let registered = compose_resource(&pipeline, "/", h).unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].path, "/");
    }
}
