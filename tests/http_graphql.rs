use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header::CONTENT_TYPE},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tagcache::cache::{CACHE_DEBUG_HEADER, CACHE_TAGS_HEADER, CacheConfig, STORE_HEADER};
use tagcache::infra::http::{HttpState, REQUEST_ID_HEADER, build_router};
use tower::ServiceExt;

const PRODUCT_QUERY: &str =
    r#"{ products(filter: {sku: {eq: "simple-4"}}) { items { id name price } } }"#;

const CATEGORY_QUERY: &str = "query GetCategoryQuery($id: Int!, $pageSize: Int!, $currentPage: Int!) { category(id: $id) { id name products(pageSize: $pageSize, currentPage: $currentPage) { items { id url_key } total_count } } }";

fn router() -> Router {
    build_router(HttpState::with_demo_catalog(CacheConfig::default()))
}

fn encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() * 3);
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn get_graphql(query: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/graphql?query={}", encode(query)))
        .body(Body::empty())
        .expect("request")
}

fn post_json(uri: &str, method: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.expect("response")
}

fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn get_request_reports_miss_then_hit_with_tags() {
    let app = router();

    let first = send(&app, get_graphql(PRODUCT_QUERY)).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, CACHE_DEBUG_HEADER), Some("MISS"));
    assert_eq!(header(&first, CACHE_TAGS_HEADER), Some("cat_p,cat_p_101,FPC"));
    assert_eq!(header(&first, "content-type"), Some("application/json"));
    assert!(header(&first, REQUEST_ID_HEADER).is_some());

    let second = send(&app, get_graphql(PRODUCT_QUERY)).await;
    assert_eq!(header(&second, CACHE_DEBUG_HEADER), Some("HIT"));
    assert_eq!(
        json_body(second).await,
        json!({"data": {"products": {"items": [
            {"id": 101, "name": "Simple Product Four", "price": 10.0}
        ]}}})
    );
}

#[tokio::test]
async fn caller_request_id_is_echoed() {
    let app = router();
    let request = Request::builder()
        .uri("/health")
        .header(REQUEST_ID_HEADER, "req-42")
        .body(Body::empty())
        .expect("request");

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, REQUEST_ID_HEADER), Some("req-42"));
}

#[tokio::test]
async fn post_body_and_admin_update_drive_invalidation() {
    let app = router();
    let category = || {
        post_json(
            "/graphql",
            "POST",
            json!({
                "query": CATEGORY_QUERY,
                "operationName": "GetCategoryQuery",
                "variables": {"id": 10, "pageSize": 10, "currentPage": 1}
            }),
        )
    };

    let first = send(&app, category()).await;
    assert_eq!(header(&first, CACHE_DEBUG_HEADER), Some("MISS"));
    assert_eq!(
        header(&first, CACHE_TAGS_HEADER),
        Some("cat_c,cat_c_10,cat_p,cat_p_101,cat_p_102,FPC")
    );
    assert_eq!(
        header(&send(&app, category()).await, CACHE_DEBUG_HEADER),
        Some("HIT")
    );

    let updated = send(
        &app,
        post_json("/admin/products/simple-4", "PUT", json!({"price": 20.0})),
    )
    .await;
    assert_eq!(updated.status(), StatusCode::OK);
    assert_eq!(json_body(updated).await["price"], json!(20.0));

    assert_eq!(
        header(&send(&app, category()).await, CACHE_DEBUG_HEADER),
        Some("MISS")
    );
}

#[tokio::test]
async fn store_header_partitions_the_cache() {
    let app = router();
    send(&app, get_graphql(PRODUCT_QUERY)).await;

    let scoped = Request::builder()
        .uri(format!("/graphql?query={}", encode(PRODUCT_QUERY)))
        .header(STORE_HEADER, "fixture_second_store")
        .body(Body::empty())
        .expect("request");
    let response = send(&app, scoped).await;
    assert_eq!(header(&response, CACHE_DEBUG_HEADER), Some("MISS"));
}

#[tokio::test]
async fn malformed_requests_are_rejected_without_caching() {
    let app = router();

    let bad_variables = Request::builder()
        .uri(format!(
            "/graphql?query={}&variables={}",
            encode(CATEGORY_QUERY),
            encode("{not json")
        ))
        .body(Body::empty())
        .expect("request");
    let response = send(&app, bad_variables).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(header(&response, CACHE_DEBUG_HEADER).is_none());

    let missing_variable = post_json(
        "/graphql",
        "POST",
        json!({"query": CATEGORY_QUERY, "variables": {"id": 10}}),
    );
    assert_eq!(
        send(&app, missing_variable).await.status(),
        StatusCode::BAD_REQUEST
    );

    let stats = send(
        &app,
        Request::builder()
            .uri("/admin/cache/stats")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(json_body(stats).await["entries"], json!(0));
}

#[tokio::test]
async fn mutations_carry_no_debug_headers() {
    let app = router();
    let request = post_json(
        "/graphql",
        "POST",
        json!({"query": "mutation { products(filter: {sku: {eq: \"simple2\"}}) { items { id } } }"}),
    );

    let response = send(&app, request).await;
    assert!(header(&response, CACHE_DEBUG_HEADER).is_none());
    assert!(header(&response, CACHE_TAGS_HEADER).is_none());
}

#[tokio::test]
async fn admin_cache_endpoints_invalidate_and_flush() {
    let app = router();
    send(&app, get_graphql(PRODUCT_QUERY)).await;
    send(
        &app,
        get_graphql(r#"{ products(filter: {sku: {eq: "simple2"}}) { items { id } } }"#),
    )
    .await;

    let invalidated = send(
        &app,
        post_json(
            "/admin/cache/invalidate",
            "POST",
            json!({"tags": ["cat_p_101"]}),
        ),
    )
    .await;
    assert_eq!(invalidated.status(), StatusCode::OK);
    assert_eq!(json_body(invalidated).await, json!({"evicted": 1}));

    let empty = send(
        &app,
        post_json("/admin/cache/invalidate", "POST", json!({"tags": [" "]})),
    )
    .await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let flushed = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri("/admin/cache")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(json_body(flushed).await, json!({"evicted": 1}));

    let again = send(&app, get_graphql(PRODUCT_QUERY)).await;
    assert_eq!(header(&again, CACHE_DEBUG_HEADER), Some("MISS"));
}

#[tokio::test]
async fn admin_errors_map_to_status_codes() {
    let app = router();

    let missing = send(
        &app,
        post_json("/admin/products/unknown", "PUT", json!({"price": 5.0})),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let duplicate = send(
        &app,
        post_json(
            "/admin/products",
            "POST",
            json!({"sku": "simple2", "name": "Again", "url_key": "again", "price": 1.0}),
        ),
    )
    .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let invalid = send(
        &app,
        post_json("/admin/products/simple2", "PUT", json!({"price": -1.0})),
    )
    .await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
}
