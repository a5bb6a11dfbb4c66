use actix_web::{dev::Payload, test, FromRequest};
use serial_test::serial;
use std::env;
use threadline::auth::{create_jwt, Auth, Claims};

// Helper that guarantees a sufficiently long secret for tests.
fn set_secret() {
    env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

async fn extract(header: Option<String>) -> Result<Auth, actix_web::Error> {
    let mut req = test::TestRequest::default();
    if let Some(h) = header {
        req = req.insert_header(("Authorization", h));
    }
    let req = req.to_http_request();
    let mut pl = Payload::None;
    Auth::from_request(&req, &mut pl).await
}

#[actix_web::test]
#[serial]
async fn jwt_roundtrip_ok() {
    set_secret();
    let token = create_jwt("user_2x9", Some("Ada"), Some("https://img.example/ada.png")).expect("token");
    let auth = extract(Some(format!("Bearer {token}"))).await.expect("extract");
    assert_eq!(auth.user_id(), "user_2x9");
    assert_eq!(auth.0.name.as_deref(), Some("Ada"));
    assert_eq!(auth.0.picture.as_deref(), Some("https://img.example/ada.png"));
}

#[actix_web::test]
#[serial]
async fn optional_claims_may_be_absent() {
    set_secret();
    let token = create_jwt("u1", None, None).unwrap();
    let auth = extract(Some(format!("Bearer {token}"))).await.unwrap();
    assert!(auth.0.name.is_none());
    assert!(auth.0.picture.is_none());
}

#[actix_web::test]
#[serial]
async fn extractor_rejects_invalid_token() {
    set_secret();
    assert!(extract(Some("Bearer not.a.jwt".into())).await.is_err());
    assert!(extract(None).await.is_err());
}

#[actix_web::test]
#[serial]
async fn token_signed_with_other_secret_is_rejected() {
    env::set_var("JWT_SECRET", "another-secret-that-is-32-bytes-long!");
    let token = create_jwt("u1", None, None).unwrap();
    set_secret();
    assert!(extract(Some(format!("Bearer {token}"))).await.is_err());
}

#[actix_web::test]
#[serial]
async fn expired_token_is_rejected() {
    set_secret();
    let claims = Claims { sub: "u1".into(), exp: 1_000, name: None, picture: None };
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(b"test-secret-must-be-32-bytes-long!!"),
    )
    .unwrap();
    assert!(extract(Some(format!("Bearer {token}"))).await.is_err());
}

#[actix_web::test]
#[serial]
async fn missing_secret_fails_closed() {
    env::remove_var("JWT_SECRET");
    assert!(create_jwt("u1", None, None).is_err());
    assert!(extract(Some("Bearer a.b.c".into())).await.is_err());
    set_secret();
}
