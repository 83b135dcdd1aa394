mod common;

use commerce_core::errors::ServiceError;
use common::setup;

#[tokio::test]
async fn registration_and_login_round_trip() {
    let ctx = setup().await;
    let created = ctx
        .state
        .users
        .create_user("alice", "secret passphrase")
        .await
        .expect("create user");

    let (user, auth) = ctx
        .state
        .users
        .authenticate_by_name("alice", "secret passphrase")
        .await
        .expect("authenticate by name");
    assert_eq!(user.id, created.id);
    assert_eq!(auth.id(), created.id);

    let (user, _) = ctx
        .state
        .users
        .authenticate_by_id(created.id, "secret passphrase")
        .await
        .expect("authenticate by id");
    assert_eq!(user.name, "alice");
}

#[tokio::test]
async fn bad_credentials_are_not_found() {
    let ctx = setup().await;
    ctx.state
        .users
        .create_user("alice", "secret passphrase")
        .await
        .expect("create user");

    assert!(matches!(
        ctx.state.users.authenticate_by_name("alice", "wrong").await,
        Err(ServiceError::NotFound(_))
    ));
    assert!(matches!(
        ctx.state.users.authenticate_by_name("nobody", "wrong").await,
        Err(ServiceError::NotFound(_))
    ));
}

#[tokio::test]
async fn user_names_are_unique() {
    let ctx = setup().await;
    ctx.state
        .users
        .create_user("alice", "pw one")
        .await
        .expect("create user");

    assert!(matches!(
        ctx.state.users.create_user("alice", "pw two").await,
        Err(ServiceError::Conflict(_))
    ));
}
