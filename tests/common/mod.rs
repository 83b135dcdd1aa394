//! Shared setup for the integration tests: an in-memory stack with the
//! demo catalog seeded and the demo promotion rules installed.
#![allow(dead_code)]

use commerce_core::auth::AuthenticatedUser;
use commerce_core::config::AppConfig;
use commerce_core::models::{Address, CartPosition};
use commerce_core::repositories::memory::MemoryAdapter;
use commerce_core::services::pricing::PromotionRules;
use commerce_core::services::products::seed_demo_catalog;
use commerce_core::AppState;
use std::sync::Arc;
use uuid::Uuid;

pub struct TestContext {
    pub state: AppState,
    pub adapter: Arc<MemoryAdapter>,
}

/// Builds a fresh stack with demo rules, seeds the demo catalog and spawns
/// an event drain.
pub async fn setup() -> TestContext {
    let (state, receiver, adapter) =
        AppState::in_memory(AppConfig::default(), PromotionRules::demo());
    tokio::spawn(commerce_core::events::process_events(receiver));
    seed_demo_catalog(adapter.as_ref())
        .await
        .expect("seed demo catalog");
    TestContext { state, adapter }
}

/// Registers a user and returns the authenticated caller identity.
pub async fn register_user(ctx: &TestContext, name: &str) -> AuthenticatedUser {
    let user = ctx
        .state
        .users
        .create_user(name, "correct horse battery staple")
        .await
        .expect("create user");
    AuthenticatedUser::for_user(user.id)
}

pub fn position(product_id: Uuid, quantity: i32) -> CartPosition {
    CartPosition {
        product_id,
        quantity,
    }
}

pub fn address(name: &str) -> Address {
    Address {
        name: name.to_string(),
        country: "DE".to_string(),
        postal_code: "10557".to_string(),
        city: "Berlin".to_string(),
        street: "Willy-Brandt-Strasse 1".to_string(),
    }
}
