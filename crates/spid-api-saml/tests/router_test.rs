//! HTTP-level tests for the SPID router: status codes, cookies and bodies.

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{
        header::{CONTENT_TYPE, COOKIE, LOCATION, ORIGIN, SET_COOKIE},
        Request, Response, StatusCode,
    },
    Router,
};
use common::{
    Harness, ResponseBuilder, AFTER_LOGIN_URL, AFTER_LOGOUT_URL, IDP_A_ENTITY_ID, SP_BASE_URL,
};
use spid_api_saml::spid_router;
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    spid_router(h.state.clone())
}

async fn get(app: Router, uri: &str, cookie: Option<&str>) -> Response<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    app.oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post_acs(app: Router, saml_response: &str, cookie: Option<&str>) -> Response<Body> {
    let form = format!("SAMLResponse={}", urlencoding::encode(saml_response));
    let mut builder = Request::builder()
        .method("POST")
        .uri("/spid/acs")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    app.oneshot(builder.body(Body::from(form)).unwrap())
        .await
        .unwrap()
}

async fn post_logout(app: Router, cookie: Option<&str>, origin: Option<&str>) -> Response<Body> {
    let mut builder = Request::builder().method("POST").uri("/spid/logout");
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    if let Some(origin) = origin {
        builder = builder.header(ORIGIN, origin);
    }
    app.oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// `name=value` pair from a `Set-Cookie` header
fn cookie_pair(response: &Response<Body>) -> String {
    response
        .headers()
        .get(SET_COOKIE)
        .expect("Set-Cookie header")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

fn location(response: &Response<Body>) -> &str {
    response.headers().get(LOCATION).unwrap().to_str().unwrap()
}

#[tokio::test]
async fn test_providers_hide_test_idp() {
    let h = Harness::new();
    let response = get(app(&h), "/spid/providers", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let providers = json.as_array().unwrap();
    assert_eq!(providers.len(), 2);
    assert_eq!(providers[0]["id"], "a");
    assert_eq!(providers[0]["entityName"], "IdP A");
    assert_eq!(providers[1]["id"], "b");
    assert!(providers[0].get("certificate").is_none());
}

#[tokio::test]
async fn test_metadata_is_xml() {
    let h = Harness::new();
    let response = get(app(&h), "/spid/metadata", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/xml"));

    let xml = body_text(response).await;
    assert!(xml.contains("EntityDescriptor"));
    assert!(xml.contains("https://sp.example.it/spid/acs"));
}

#[tokio::test]
async fn test_login_page_lists_providers() {
    let h = Harness::new();
    let response = get(app(&h), "/spid/login?return_to=/area", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let html = body_text(response).await;
    assert!(html.contains("/spid/login/a"));
    assert!(html.contains("IdP B"));
    assert!(!html.contains("SPID Validator"));
}

#[tokio::test]
async fn test_dologin_without_provider_is_bad_request() {
    let h = Harness::new();
    let response = get(app(&h), "/spid/dologin", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_request");
}

#[tokio::test]
async fn test_login_with_provider_redirects_and_sets_cookie() {
    let h = Harness::new();
    let response = get(app(&h), "/spid/login/a", None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("https://idp-a/sso?SAMLRequest="));

    let set_cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
    assert!(set_cookie.starts_with("spid_session="));
    assert!(set_cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn test_full_login_over_http() {
    let h = Harness::new();

    let started = get(app(&h), "/spid/dologin?provider=a", None).await;
    assert_eq!(started.status(), StatusCode::SEE_OTHER);
    let pre_login_cookie = cookie_pair(&started);
    let pre_login_id = pre_login_cookie
        .strip_prefix("spid_session=")
        .unwrap()
        .parse()
        .unwrap();
    let request_id = h.pending_request_id(pre_login_id).await;

    let raw = ResponseBuilder::new(IDP_A_ENTITY_ID, "assert-http")
        .in_response_to(request_id)
        .build(&h.idp_a.credentials);

    let consumed = post_acs(app(&h), &raw, Some(&pre_login_cookie)).await;
    assert_eq!(consumed.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&consumed), AFTER_LOGIN_URL);
    let session_cookie = cookie_pair(&consumed);
    assert_ne!(session_cookie, pre_login_cookie);

    let user = get(app(&h), "/spid/user", Some(&session_cookie)).await;
    assert_eq!(user.status(), StatusCode::OK);
    let json = body_json(user).await;
    assert_eq!(json["attributes"]["name"][0], "Mario");

    let replay = post_acs(app(&h), &raw, Some(&session_cookie)).await;
    assert_eq!(replay.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(replay).await["error"], "response_already_processed");

    // The stale pre-login cookie no longer maps to a session
    let stale = get(app(&h), "/spid/user", Some(&pre_login_cookie)).await;
    assert_eq!(stale.status(), StatusCode::UNAUTHORIZED);

    let logout = post_logout(app(&h), Some(&session_cookie), Some(SP_BASE_URL)).await;
    assert_eq!(logout.status(), StatusCode::SEE_OTHER);
    assert!(location(&logout).starts_with("https://idp-a/slo?SAMLRequest="));
    let cleared = logout.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cleared.contains("Max-Age=0"));

    let after = get(app(&h), "/spid/user", Some(&session_cookie)).await;
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_user_without_cookie_is_unauthorized() {
    let h = Harness::new();
    let response = get(app(&h), "/spid/user", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "not_authenticated");
}

#[tokio::test]
async fn test_logout_without_session_goes_to_after_logout_url() {
    let h = Harness::new();
    let response = post_logout(app(&h), None, None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), AFTER_LOGOUT_URL);
}

#[tokio::test]
async fn test_logout_requires_same_origin_post() {
    let h = Harness::new();
    let started = get(app(&h), "/spid/dologin?provider=a", None).await;
    let pre_login_cookie = cookie_pair(&started);
    let pre_login_id = pre_login_cookie
        .strip_prefix("spid_session=")
        .unwrap()
        .parse()
        .unwrap();
    let request_id = h.pending_request_id(pre_login_id).await;
    let raw = ResponseBuilder::new(IDP_A_ENTITY_ID, "assert-logout-csrf")
        .in_response_to(request_id)
        .build(&h.idp_a.credentials);
    let session_cookie = cookie_pair(&post_acs(app(&h), &raw, Some(&pre_login_cookie)).await);

    let via_get = get(app(&h), "/spid/logout", Some(&session_cookie)).await;
    assert_eq!(via_get.status(), StatusCode::METHOD_NOT_ALLOWED);

    let cross_site =
        post_logout(app(&h), Some(&session_cookie), Some("https://evil.example")).await;
    assert_eq!(cross_site.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(cross_site).await["error"], "cross_site_request");

    let user = get(app(&h), "/spid/user", Some(&session_cookie)).await;
    assert_eq!(user.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unsolicited_response_over_http_keeps_session() {
    let h = Harness::new();
    let started = get(app(&h), "/spid/dologin?provider=a", None).await;
    let pre_login_cookie = cookie_pair(&started);
    let pre_login_id = pre_login_cookie
        .strip_prefix("spid_session=")
        .unwrap()
        .parse()
        .unwrap();
    let request_id = h.pending_request_id(pre_login_id).await;
    let raw = ResponseBuilder::new(IDP_A_ENTITY_ID, "assert-owner")
        .in_response_to(request_id)
        .build(&h.idp_a.credentials);
    let session_cookie = cookie_pair(&post_acs(app(&h), &raw, Some(&pre_login_cookie)).await);

    let mut attacker = ResponseBuilder::new(IDP_A_ENTITY_ID, "assert-attacker");
    attacker.attributes = vec![("name".to_string(), "Eve".to_string())];
    let forced = post_acs(
        app(&h),
        &attacker.build(&h.idp_a.credentials),
        Some(&session_cookie),
    )
    .await;
    assert_eq!(forced.status(), StatusCode::BAD_REQUEST);
    assert!(forced.headers().get(SET_COOKIE).is_none());

    let user = get(app(&h), "/spid/user", Some(&session_cookie)).await;
    assert_eq!(body_json(user).await["attributes"]["name"][0], "Mario");
}

#[tokio::test]
async fn test_acs_without_login_is_rejected() {
    let h = Harness::new();
    let raw =
        ResponseBuilder::new(IDP_A_ENTITY_ID, "assert-unsolicited").build(&h.idp_a.credentials);

    let response = post_acs(app(&h), &raw, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "response_validation_error");
}
