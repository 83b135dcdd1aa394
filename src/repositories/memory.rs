//! In-memory implementation of every repository contract.
//!
//! Aggregates live in [`DashMap`]s keyed by id; the map's per-shard locking
//! gives each operation exclusive access to the entry it touches, which is
//! exactly the per-aggregate atomicity the contracts demand. Deletion
//! writes a `None` tombstone so that a deleted id stays distinguishable
//! from one that never existed and can never be reused.
//!
//! Every mutation completes synchronously under a single entry guard, so a
//! caller that cancels (drops the future) can never observe or produce a
//! partially mutated aggregate.

use crate::auth::{hash_password, verify_password};
use crate::errors::RepositoryError;
use crate::models::{CartPosition, Coupon, PlacedOrder, Product, StoredCart, StoredOrder, User};
use crate::repositories::{
    CartRepository, CouponRepository, OrderAttributes, OrderRepository, PlacedOrderRepository,
    ProductRepository, RepoResult, UserRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct UserEntry {
    name: String,
    password_hash: String,
}

#[derive(Debug, Clone)]
struct CartEntry {
    user_id: Uuid,
    positions: Vec<CartPosition>,
    locked: bool,
}

#[derive(Debug, Clone)]
struct CouponEntry {
    product_id: Uuid,
    name: String,
    discount: i32,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct OrderEntry {
    user_id: Uuid,
    attributes: OrderAttributes,
    locked: bool,
}

/// The in-memory persistence adapter. Implements all repository contracts
/// and is safe for concurrent use.
#[derive(Default)]
pub struct MemoryAdapter {
    users_by_id: DashMap<Uuid, UserEntry>,
    user_ids_by_name: DashMap<String, Uuid>,
    // Serializes the two-index uniqueness check in create_user.
    user_create_guard: Mutex<()>,
    products: DashMap<Uuid, Product>,
    carts: DashMap<Uuid, Option<CartEntry>>,
    coupons: DashMap<String, CouponEntry>,
    orders: DashMap<Uuid, Option<OrderEntry>>,
    placed_orders: Mutex<Vec<PlacedOrder>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything placed so far. Intended for tests and
    /// for embedders that archive placed orders elsewhere.
    pub fn placed_orders(&self) -> Vec<PlacedOrder> {
        self.placed_orders
            .lock()
            .expect("placed order sink poisoned")
            .clone()
    }

    /// Edits a product price out of band, bypassing the repository
    /// contract (which treats products as immutable). This is exactly the
    /// hazard the order fingerprint exists to detect; tests use it to
    /// invalidate in-flight orders. Returns false if the product does not
    /// exist.
    pub fn set_product_price(&self, product_id: Uuid, price: i64) -> bool {
        match self.products.get_mut(&product_id) {
            Some(mut product) => {
                product.price = price;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl UserRepository for MemoryAdapter {
    async fn create_user(&self, id: Uuid, name: &str, password: &str) -> RepoResult<()> {
        // Hash outside the guard; Argon2 is deliberately slow.
        let password_hash = hash_password(password)?;

        let _guard = self
            .user_create_guard
            .lock()
            .map_err(|_| RepositoryError::Storage(anyhow::anyhow!("user store poisoned")))?;

        if self.users_by_id.contains_key(&id) || self.user_ids_by_name.contains_key(name) {
            return Err(RepositoryError::Conflict);
        }

        self.users_by_id.insert(
            id,
            UserEntry {
                name: name.to_string(),
                password_hash,
            },
        );
        self.user_ids_by_name.insert(name.to_string(), id);
        Ok(())
    }

    async fn find_user_by_name_and_password(
        &self,
        name: &str,
        password: &str,
    ) -> RepoResult<User> {
        let id = match self.user_ids_by_name.get(name) {
            Some(id) => *id,
            None => return Err(RepositoryError::NotFound),
        };
        self.find_user_by_id_and_password(id, password).await
    }

    async fn find_user_by_id_and_password(&self, id: Uuid, password: &str) -> RepoResult<User> {
        let (name, password_hash) = match self.users_by_id.get(&id) {
            Some(user) => (user.name.clone(), user.password_hash.clone()),
            None => return Err(RepositoryError::NotFound),
        };
        if !verify_password(password, &password_hash) {
            return Err(RepositoryError::NotFound);
        }
        Ok(User { id, name })
    }
}

#[async_trait]
impl ProductRepository for MemoryAdapter {
    async fn create_product(&self, product: Product) -> RepoResult<()> {
        match self.products.entry(product.id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(product);
                Ok(())
            }
        }
    }

    async fn find_all_products(&self) -> RepoResult<Vec<Product>> {
        Ok(self.products.iter().map(|p| p.value().clone()).collect())
    }

    async fn find_product(&self, id: Uuid) -> RepoResult<Product> {
        self.products
            .get(&id)
            .map(|p| p.value().clone())
            .ok_or(RepositoryError::NotFound)
    }
}

#[async_trait]
impl CartRepository for MemoryAdapter {
    async fn create_cart(
        &self,
        user_id: Uuid,
        cart_id: Uuid,
        positions: Vec<CartPosition>,
    ) -> RepoResult<()> {
        match self.carts.entry(cart_id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(Some(CartEntry {
                    user_id,
                    positions,
                    locked: false,
                }));
                Ok(())
            }
        }
    }

    async fn update_cart_of_user(
        &self,
        user_id: Uuid,
        cart_id: Uuid,
        positions: Vec<CartPosition>,
    ) -> RepoResult<()> {
        let mut entry = self.carts.get_mut(&cart_id).ok_or(RepositoryError::NotFound)?;
        let cart = entry.as_mut().ok_or(RepositoryError::Deleted)?;
        if cart.user_id != user_id {
            return Err(RepositoryError::NotOwnedByUser);
        }
        if cart.locked {
            return Err(RepositoryError::Locked);
        }
        cart.positions = positions;
        Ok(())
    }

    async fn find_cart_of_user(&self, user_id: Uuid, cart_id: Uuid) -> RepoResult<StoredCart> {
        let entry = self.carts.get(&cart_id).ok_or(RepositoryError::NotFound)?;
        let cart = entry.as_ref().ok_or(RepositoryError::Deleted)?;
        if cart.user_id != user_id {
            return Err(RepositoryError::NotOwnedByUser);
        }
        Ok(StoredCart {
            id: cart_id,
            positions: cart.positions.clone(),
            locked: cart.locked,
        })
    }

    async fn find_all_unlocked_carts_of_user(&self, user_id: Uuid) -> RepoResult<Vec<StoredCart>> {
        Ok(self
            .carts
            .iter()
            .filter_map(|entry| {
                let cart = entry.value().as_ref()?;
                (cart.user_id == user_id && !cart.locked).then(|| StoredCart {
                    id: *entry.key(),
                    positions: cart.positions.clone(),
                    locked: cart.locked,
                })
            })
            .collect())
    }

    async fn delete_cart_of_user(&self, user_id: Uuid, cart_id: Uuid) -> RepoResult<()> {
        let mut entry = self.carts.get_mut(&cart_id).ok_or(RepositoryError::NotFound)?;
        let cart = entry.as_mut().ok_or(RepositoryError::Deleted)?;
        if cart.user_id != user_id {
            return Err(RepositoryError::NotOwnedByUser);
        }
        if cart.locked {
            return Err(RepositoryError::Locked);
        }
        *entry = None;
        Ok(())
    }

    async fn lock_cart_of_user(&self, user_id: Uuid, cart_id: Uuid) -> RepoResult<()> {
        let mut entry = self.carts.get_mut(&cart_id).ok_or(RepositoryError::NotFound)?;
        let cart = entry.as_mut().ok_or(RepositoryError::Deleted)?;
        if cart.user_id != user_id {
            return Err(RepositoryError::NotOwnedByUser);
        }
        if cart.locked {
            return Err(RepositoryError::Locked);
        }
        cart.locked = true;
        Ok(())
    }
}

#[async_trait]
impl CouponRepository for MemoryAdapter {
    async fn store_coupon(&self, coupon: Coupon) -> RepoResult<()> {
        // Opportunistic housekeeping: drop coupons that already expired.
        let now = Utc::now();
        self.coupons.retain(|_, c| c.expires_at >= now);

        self.coupons.insert(
            coupon.code,
            CouponEntry {
                product_id: coupon.product_id,
                name: coupon.name,
                discount: coupon.discount,
                expires_at: coupon.expires_at,
            },
        );
        Ok(())
    }

    async fn find_valid_coupon(&self, code: &str, now: DateTime<Utc>) -> RepoResult<Coupon> {
        let entry = self.coupons.get(code).ok_or(RepositoryError::NotFound)?;
        if entry.expires_at < now {
            return Err(RepositoryError::NotFound);
        }
        Ok(Coupon {
            code: code.to_string(),
            product_id: entry.product_id,
            name: entry.name.clone(),
            discount: entry.discount,
            expires_at: entry.expires_at,
        })
    }
}

#[async_trait]
impl OrderRepository for MemoryAdapter {
    async fn create_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        attributes: OrderAttributes,
    ) -> RepoResult<()> {
        match self.orders.entry(order_id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(Some(OrderEntry {
                    user_id,
                    attributes,
                    locked: false,
                }));
                Ok(())
            }
        }
    }

    async fn find_order_of_user(&self, user_id: Uuid, order_id: Uuid) -> RepoResult<StoredOrder> {
        let entry = self.orders.get(&order_id).ok_or(RepositoryError::NotFound)?;
        let order = entry.as_ref().ok_or(RepositoryError::Deleted)?;
        if order.user_id != user_id {
            return Err(RepositoryError::NotOwnedByUser);
        }
        Ok(StoredOrder {
            id: order_id,
            cart_id: order.attributes.cart_id,
            buyer: order.attributes.buyer.clone(),
            recipient: order.attributes.recipient.clone(),
            coupon_codes: order.attributes.coupon_codes.clone(),
            fingerprint: order.attributes.fingerprint.clone(),
            locked: order.locked,
        })
    }

    async fn delete_order_of_user(&self, user_id: Uuid, order_id: Uuid) -> RepoResult<()> {
        let mut entry = self.orders.get_mut(&order_id).ok_or(RepositoryError::NotFound)?;
        let order = entry.as_mut().ok_or(RepositoryError::Deleted)?;
        if order.user_id != user_id {
            return Err(RepositoryError::NotOwnedByUser);
        }
        if order.locked {
            return Err(RepositoryError::Locked);
        }
        *entry = None;
        Ok(())
    }

    async fn lock_order_of_user(&self, user_id: Uuid, order_id: Uuid) -> RepoResult<()> {
        let mut entry = self.orders.get_mut(&order_id).ok_or(RepositoryError::NotFound)?;
        let order = entry.as_mut().ok_or(RepositoryError::Deleted)?;
        if order.user_id != user_id {
            return Err(RepositoryError::NotOwnedByUser);
        }
        if order.locked {
            return Err(RepositoryError::Locked);
        }
        order.locked = true;
        Ok(())
    }
}

#[async_trait]
impl PlacedOrderRepository for MemoryAdapter {
    async fn place_order(&self, order: PlacedOrder) -> RepoResult<()> {
        self.placed_orders
            .lock()
            .map_err(|_| RepositoryError::Storage(anyhow::anyhow!("placed order sink poisoned")))?
            .push(order);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn adapter() -> MemoryAdapter {
        MemoryAdapter::new()
    }

    fn positions(product_id: Uuid, quantity: i32) -> Vec<CartPosition> {
        vec![CartPosition {
            product_id,
            quantity,
        }]
    }

    #[tokio::test]
    async fn cart_create_conflicts_on_existing_id() {
        let a = adapter();
        let (user, cart) = (Uuid::new_v4(), Uuid::new_v4());
        a.create_cart(user, cart, vec![]).await.unwrap();
        assert!(matches!(
            a.create_cart(user, cart, vec![]).await,
            Err(RepositoryError::Conflict)
        ));
        // even for a different user
        assert!(matches!(
            a.create_cart(Uuid::new_v4(), cart, vec![]).await,
            Err(RepositoryError::Conflict)
        ));
    }

    #[tokio::test]
    async fn deleted_cart_is_tombstoned() {
        let a = adapter();
        let (user, cart) = (Uuid::new_v4(), Uuid::new_v4());
        a.create_cart(user, cart, vec![]).await.unwrap();
        a.delete_cart_of_user(user, cart).await.unwrap();

        assert!(matches!(
            a.find_cart_of_user(user, cart).await,
            Err(RepositoryError::Deleted)
        ));
        assert!(matches!(
            a.update_cart_of_user(user, cart, vec![]).await,
            Err(RepositoryError::Deleted)
        ));
        assert!(matches!(
            a.lock_cart_of_user(user, cart).await,
            Err(RepositoryError::Deleted)
        ));
        assert!(matches!(
            a.delete_cart_of_user(user, cart).await,
            Err(RepositoryError::Deleted)
        ));
        // the id is burned forever
        assert!(matches!(
            a.create_cart(user, cart, vec![]).await,
            Err(RepositoryError::Conflict)
        ));
    }

    #[tokio::test]
    async fn locked_cart_rejects_update_and_delete() {
        let a = adapter();
        let (user, cart) = (Uuid::new_v4(), Uuid::new_v4());
        a.create_cart(user, cart, positions(Uuid::new_v4(), 2))
            .await
            .unwrap();
        a.lock_cart_of_user(user, cart).await.unwrap();

        assert!(matches!(
            a.lock_cart_of_user(user, cart).await,
            Err(RepositoryError::Locked)
        ));
        assert!(matches!(
            a.update_cart_of_user(user, cart, vec![]).await,
            Err(RepositoryError::Locked)
        ));
        assert!(matches!(
            a.delete_cart_of_user(user, cart).await,
            Err(RepositoryError::Locked)
        ));
        // still readable, with the locked flag visible
        let stored = a.find_cart_of_user(user, cart).await.unwrap();
        assert!(stored.locked);
    }

    #[tokio::test]
    async fn cart_ownership_is_enforced() {
        let a = adapter();
        let (owner, other, cart) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        a.create_cart(owner, cart, vec![]).await.unwrap();

        assert!(matches!(
            a.find_cart_of_user(other, cart).await,
            Err(RepositoryError::NotOwnedByUser)
        ));
        assert!(matches!(
            a.update_cart_of_user(other, cart, vec![]).await,
            Err(RepositoryError::NotOwnedByUser)
        ));
        assert!(matches!(
            a.delete_cart_of_user(other, cart).await,
            Err(RepositoryError::NotOwnedByUser)
        ));
        assert!(matches!(
            a.lock_cart_of_user(other, cart).await,
            Err(RepositoryError::NotOwnedByUser)
        ));
    }

    #[tokio::test]
    async fn unlocked_cart_listing_skips_locked_and_deleted() {
        let a = adapter();
        let user = Uuid::new_v4();
        let (open, locked, deleted) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        a.create_cart(user, open, vec![]).await.unwrap();
        a.create_cart(user, locked, vec![]).await.unwrap();
        a.create_cart(user, deleted, vec![]).await.unwrap();
        a.create_cart(Uuid::new_v4(), Uuid::new_v4(), vec![])
            .await
            .unwrap();
        a.lock_cart_of_user(user, locked).await.unwrap();
        a.delete_cart_of_user(user, deleted).await.unwrap();

        let carts = a.find_all_unlocked_carts_of_user(user).await.unwrap();
        assert_eq!(carts.len(), 1);
        assert_eq!(carts[0].id, open);
    }

    #[tokio::test]
    async fn order_lock_is_one_way_and_blocks_delete() {
        let a = adapter();
        let (user, order) = (Uuid::new_v4(), Uuid::new_v4());
        let attrs = OrderAttributes {
            cart_id: Uuid::new_v4(),
            buyer: Default::default(),
            recipient: Default::default(),
            coupon_codes: vec![],
            fingerprint: "fp".into(),
        };
        a.create_order(user, order, attrs).await.unwrap();
        a.lock_order_of_user(user, order).await.unwrap();

        assert!(matches!(
            a.lock_order_of_user(user, order).await,
            Err(RepositoryError::Locked)
        ));
        assert!(matches!(
            a.delete_order_of_user(user, order).await,
            Err(RepositoryError::Locked)
        ));
        let stored = a.find_order_of_user(user, order).await.unwrap();
        assert!(stored.locked);
    }

    #[tokio::test]
    async fn concurrent_order_locks_admit_exactly_one_winner() {
        let a = Arc::new(adapter());
        let (user, order) = (Uuid::new_v4(), Uuid::new_v4());
        let attrs = OrderAttributes {
            cart_id: Uuid::new_v4(),
            buyer: Default::default(),
            recipient: Default::default(),
            coupon_codes: vec![],
            fingerprint: "fp".into(),
        };
        a.create_order(user, order, attrs).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let a = Arc::clone(&a);
            tasks.push(tokio::spawn(async move {
                a.lock_order_of_user(user, order).await.is_ok()
            }));
        }
        let mut wins = 0;
        for task in tasks {
            if task.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1, "exactly one locker may win");
    }

    #[tokio::test]
    async fn expired_coupons_are_not_found() {
        let a = adapter();
        let now = Utc::now();
        a.store_coupon(Coupon {
            code: "apple10".into(),
            product_id: Uuid::new_v4(),
            name: "10% off".into(),
            discount: 10,
            expires_at: now + Duration::seconds(60),
        })
        .await
        .unwrap();

        assert!(a.find_valid_coupon("apple10", now).await.is_ok());
        assert!(matches!(
            a.find_valid_coupon("apple10", now + Duration::seconds(61)).await,
            Err(RepositoryError::NotFound)
        ));
        assert!(matches!(
            a.find_valid_coupon("nope", now).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn storing_a_coupon_overwrites_by_code() {
        let a = adapter();
        let now = Utc::now();
        let product_id = Uuid::new_v4();
        for discount in [10, 25] {
            a.store_coupon(Coupon {
                code: "apple".into(),
                product_id,
                name: format!("{discount}% off"),
                discount,
                expires_at: now + Duration::seconds(60),
            })
            .await
            .unwrap();
        }
        let coupon = a.find_valid_coupon("apple", now).await.unwrap();
        assert_eq!(coupon.discount, 25);
    }

    #[tokio::test]
    async fn user_names_and_ids_are_unique() {
        let a = adapter();
        let id = Uuid::new_v4();
        a.create_user(id, "alice", "secret").await.unwrap();

        assert!(matches!(
            a.create_user(id, "someone-else", "pw").await,
            Err(RepositoryError::Conflict)
        ));
        assert!(matches!(
            a.create_user(Uuid::new_v4(), "alice", "pw").await,
            Err(RepositoryError::Conflict)
        ));

        let user = a.find_user_by_name_and_password("alice", "secret").await.unwrap();
        assert_eq!(user.id, id);
        assert!(matches!(
            a.find_user_by_name_and_password("alice", "wrong").await,
            Err(RepositoryError::NotFound)
        ));
        assert!(matches!(
            a.find_user_by_id_and_password(id, "wrong").await,
            Err(RepositoryError::NotFound)
        ));
    }
}
