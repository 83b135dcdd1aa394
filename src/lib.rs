//! commerce-core
//!
//! The storage-agnostic core of a small commerce backend: cart management,
//! a deterministic pricing engine, and a race-resistant order placement
//! protocol that needs nothing more from its storage layer than atomic
//! per-aggregate operations and a one-way lock primitive.
//!
//! The crate exposes coordinator services ([`services`]) over repository
//! contracts ([`repositories`]); an HTTP or RPC surface is expected to live
//! in the embedding application.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod events;
pub mod logging;
pub mod models;
pub mod repositories;
pub mod services;

use crate::auth::UserService;
use crate::config::AppConfig;
use crate::events::{Event, EventSender};
use crate::repositories::memory::MemoryAdapter;
use crate::services::pricing::{PricingEngine, PromotionRules};
use crate::services::{CartService, OrderService, ProductService};
use std::sync::Arc;
use tokio::sync::mpsc;

/// All coordinator services wired over a shared storage adapter.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub users: UserService,
    pub products: ProductService,
    pub carts: CartService,
    pub orders: OrderService,
}

impl AppState {
    /// Wires every service over a fresh in-memory adapter.
    ///
    /// Returns the state, the receiving end of the event channel (drive it
    /// with [`events::process_events`] or a custom consumer), and the
    /// adapter itself for seeding and for reading back placed orders.
    pub fn in_memory(
        config: AppConfig,
        rules: PromotionRules,
    ) -> (Self, mpsc::Receiver<Event>, Arc<MemoryAdapter>) {
        let adapter = Arc::new(MemoryAdapter::new());
        let config = Arc::new(config);
        let (event_sender, receiver) = events::channel(config.event_buffer_size);
        let pricing = PricingEngine::new(rules.clone());

        let users = UserService::new(adapter.clone(), event_sender.clone());
        let products = ProductService::new(
            adapter.clone(),
            adapter.clone(),
            rules.clone(),
            config.clone(),
            event_sender.clone(),
        );
        let carts = CartService::new(
            adapter.clone(),
            adapter.clone(),
            rules,
            event_sender.clone(),
        );
        let orders = OrderService::new(
            adapter.clone(),
            adapter.clone(),
            adapter.clone(),
            adapter.clone(),
            adapter.clone(),
            pricing,
            event_sender.clone(),
        );

        (
            Self {
                config,
                event_sender,
                users,
                products,
                carts,
                orders,
            },
            receiver,
            adapter,
        )
    }
}
