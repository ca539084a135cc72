//! Shared helpers for driving the router in-process.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use hubgate_axum::{AxumContext, CorsConfig, create_router};
use hubgate_core::{GatewayConfig, RegistryStore};
use hubgate_mcp::echo::EchoServer;
use hubgate_mcp::testing::EchoTransportFactory;
use serde_json::Value;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub context: Arc<AxumContext>,
    pub factory: Arc<EchoTransportFactory>,
}

impl TestApp {
    pub fn new(registry: Arc<dyn RegistryStore>) -> Self {
        let factory = Arc::new(EchoTransportFactory::new(EchoServer::new()));
        let context = Arc::new(AxumContext::new(
            registry,
            factory.clone(),
            GatewayConfig::default(),
        ));
        let router = create_router(Arc::clone(&context), &CorsConfig::AllowAll);
        Self {
            router,
            context,
            factory,
        }
    }

    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> axum::response::Response {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send a request and decode the JSON body (`Null` when empty).
    pub async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let response = self.request(method, uri, body).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}
