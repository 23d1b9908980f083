use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{routing::get, Router};
use axum_prometheus::PrometheusMetricLayer;
use leadpilot::routes::root;
use tower::ServiceExt;

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn metrics_report_served_routes() {
    let (layer, handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route("/metrics", get(move || async move { handle.render() }))
        .layer(layer);

    let response = app.clone().oneshot(get_request("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(&body[..], b"LeadPilot API");

    let response = app.oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let rendered = String::from_utf8_lossy(&body);
    assert!(rendered.contains("axum_http_requests"), "metrics were: {rendered}");
    assert!(rendered.contains("endpoint=\"/\""), "metrics were: {rendered}");
}
