//! Storage contracts for the commerce aggregates.
//!
//! Every contract is safe for concurrent use, and every single operation is
//! atomic and linearizable with respect to other operations on the same
//! aggregate id. There are no cross-aggregate transactions: the order
//! placement protocol builds its consistency on top of these primitives
//! alone.
//!
//! Common error semantics (see [`RepositoryError`]):
//! - `NotFound`: the id never existed.
//! - `Deleted`: the id existed and was tombstoned. Tombstones are permanent;
//!   a deleted aggregate can never be recreated, updated or locked.
//! - `Conflict`: creation under an id that exists or existed.
//! - `NotOwnedByUser`: the aggregate exists but belongs to someone else.
//! - `Locked`: the aggregate is owned but immutable due to a prior lock.
//!   `lock` itself is a one-way compare-and-set: it succeeds at most once
//!   per aggregate, ever.

use crate::errors::RepositoryError;
use crate::models::{Address, CartPosition, Coupon, PlacedOrder, Product, StoredCart, StoredOrder, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod log;
pub mod memory;

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Stores and loads users.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Creates a user. Both id and name must be unique; `Conflict`
    /// otherwise. The password is stored as a hash and can never be
    /// retrieved again.
    async fn create_user(&self, id: Uuid, name: &str, password: &str) -> RepoResult<()>;

    /// Finds the user by name and password. Names are unique, so the result
    /// is unambiguous. `NotFound` if no user matches the pair.
    async fn find_user_by_name_and_password(&self, name: &str, password: &str)
        -> RepoResult<User>;

    /// Finds the user by id and password. `NotFound` if no user matches the
    /// pair.
    async fn find_user_by_id_and_password(&self, id: Uuid, password: &str) -> RepoResult<User>;
}

/// Stores and loads products.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Creates a product. The id must be unique; `Conflict` otherwise.
    async fn create_product(&self, product: Product) -> RepoResult<()>;

    /// Returns all stored products.
    async fn find_all_products(&self) -> RepoResult<Vec<Product>>;

    /// Returns the product with the given id, or `NotFound`.
    async fn find_product(&self, id: Uuid) -> RepoResult<Product>;
}

/// Stores and loads carts and their raw positions.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Creates a cart for the user. The id must be unique; `Conflict`
    /// otherwise (including ids of deleted carts).
    async fn create_cart(
        &self,
        user_id: Uuid,
        cart_id: Uuid,
        positions: Vec<CartPosition>,
    ) -> RepoResult<()>;

    /// Replaces all positions of the user's cart.
    async fn update_cart_of_user(
        &self,
        user_id: Uuid,
        cart_id: Uuid,
        positions: Vec<CartPosition>,
    ) -> RepoResult<()>;

    /// Returns the user's cart with the given id.
    async fn find_cart_of_user(&self, user_id: Uuid, cart_id: Uuid) -> RepoResult<StoredCart>;

    /// Returns all unlocked carts of the user.
    async fn find_all_unlocked_carts_of_user(&self, user_id: Uuid) -> RepoResult<Vec<StoredCart>>;

    /// Tombstones the user's cart.
    async fn delete_cart_of_user(&self, user_id: Uuid, cart_id: Uuid) -> RepoResult<()>;

    /// Locks the user's cart. One-way; `Locked` if already locked.
    async fn lock_cart_of_user(&self, user_id: Uuid, cart_id: Uuid) -> RepoResult<()>;
}

/// Stores and loads coupons.
#[async_trait]
pub trait CouponRepository: Send + Sync {
    /// Stores a coupon. A coupon previously stored under the same code is
    /// overwritten.
    async fn store_coupon(&self, coupon: Coupon) -> RepoResult<()>;

    /// Returns the unexpired coupon with the given code. Expired coupons
    /// are indistinguishable from absent ones: both are `NotFound`.
    async fn find_valid_coupon(&self, code: &str, now: DateTime<Utc>) -> RepoResult<Coupon>;
}

/// Order attributes at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAttributes {
    pub cart_id: Uuid,
    pub buyer: Address,
    pub recipient: Address,
    pub coupon_codes: Vec<String>,
    pub fingerprint: String,
}

/// Stores and loads orders.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Creates an order for the user. The id must be unique; `Conflict`
    /// otherwise.
    async fn create_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        attributes: OrderAttributes,
    ) -> RepoResult<()>;

    /// Returns the user's order with the given id.
    async fn find_order_of_user(&self, user_id: Uuid, order_id: Uuid) -> RepoResult<StoredOrder>;

    /// Tombstones the user's order. `Locked` if the order was placed.
    async fn delete_order_of_user(&self, user_id: Uuid, order_id: Uuid) -> RepoResult<()>;

    /// Locks the user's order. One-way; `Locked` if already locked.
    async fn lock_order_of_user(&self, user_id: Uuid, order_id: Uuid) -> RepoResult<()>;
}

/// Write-only sink for placed orders. Expected to be durable and
/// append-only; a failure here fails the placement that triggered it.
#[async_trait]
pub trait PlacedOrderRepository: Send + Sync {
    async fn place_order(&self, order: PlacedOrder) -> RepoResult<()>;
}
