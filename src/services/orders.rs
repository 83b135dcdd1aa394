use crate::{
    auth::AuthenticatedUser,
    errors::{RepositoryError, ServiceError},
    events::{Event, EventSender},
    models::{
        Address, Coupon, Order, PlacedOrder, PlacedOrderCoupon, PlacedOrderPosition,
        PlacedOrderProduct, Position, Product, StoredOrder,
    },
    repositories::{
        CartRepository, CouponRepository, OrderAttributes, OrderRepository,
        PlacedOrderRepository, ProductRepository,
    },
    services::pricing::PricingEngine,
};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Input for creating an order from a cart.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderInput {
    pub cart_id: Uuid,
    pub buyer: Address,
    pub recipient: Address,
    #[serde(default)]
    pub coupon_codes: Vec<String>,
}

/// Order coordinator: creation, the two-pass placement protocol, deletion.
///
/// The protocol never holds a lock across both the cart and the order while
/// verifying; instead, placement verifies, locks and then verifies again.
/// The content fingerprint captured at creation is the only thing that ties
/// an order to the cart, product and coupon state it was priced against,
/// and any observed drift deletes the order rather than repricing it.
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    carts: Arc<dyn CartRepository>,
    products: Arc<dyn ProductRepository>,
    coupons: Arc<dyn CouponRepository>,
    placed_orders: Arc<dyn PlacedOrderRepository>,
    pricing: PricingEngine,
    event_sender: EventSender,
}

/// Everything one verification pass resolved and recomputed.
struct PreparedOrder {
    order: StoredOrder,
    coupons: Vec<Coupon>,
    positions: Vec<Position>,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        carts: Arc<dyn CartRepository>,
        products: Arc<dyn ProductRepository>,
        coupons: Arc<dyn CouponRepository>,
        placed_orders: Arc<dyn PlacedOrderRepository>,
        pricing: PricingEngine,
        event_sender: EventSender,
    ) -> Self {
        Self {
            orders,
            carts,
            products,
            coupons,
            placed_orders,
            pricing,
            event_sender,
        }
    }

    /// Creates an order over the current state of the cart and returns it
    /// fully priced.
    ///
    /// The order stores no prices; it stores the fingerprint of the priced
    /// positions. As long as the order is unlocked, recomputing the
    /// fingerprint from live state and comparing it against the stored one
    /// is what detects any concurrent change to the cart, a product price
    /// or a coupon.
    #[instrument(skip(self, user, input), fields(user_id = %user.id(), cart_id = %input.cart_id))]
    pub async fn create_and_get(
        &self,
        user: AuthenticatedUser,
        input: CreateOrderInput,
    ) -> Result<Order, ServiceError> {
        let cart = self
            .carts
            .find_cart_of_user(user.id(), input.cart_id)
            .await
            .map_err(|e| ServiceError::cart(input.cart_id, e))?;

        let coupons = self.resolve_coupons(&input.coupon_codes).await?;

        // At creation, products that vanished simply drop out of the priced
        // list; only placement treats a vanished product as fatal drift.
        let mut products = HashMap::new();
        for line in &cart.positions {
            if products.contains_key(&line.product_id) {
                continue;
            }
            match self.resolve_product(line.product_id).await {
                Ok(Some(product)) => {
                    products.insert(line.product_id, product);
                }
                Ok(None) => {}
                Err(e) => return Err(e),
            }
        }

        let positions = self
            .pricing
            .generate_positions(&cart.positions, &products, &coupons);
        let fingerprint = PricingEngine::fingerprint(&positions);
        let total = PricingEngine::total(&positions);

        let order_id = Uuid::new_v4();
        self.orders
            .create_order(
                user.id(),
                order_id,
                OrderAttributes {
                    cart_id: input.cart_id,
                    buyer: input.buyer.clone(),
                    recipient: input.recipient.clone(),
                    coupon_codes: coupons.iter().map(|c| c.code.clone()).collect(),
                    fingerprint: fingerprint.clone(),
                },
            )
            .await
            .map_err(|e| match e {
                // Ids are generated here, so a collision is a broken
                // invariant, not a user error.
                RepositoryError::Conflict => {
                    ServiceError::Internal(format!("generated order id {order_id} collided"))
                }
                other => ServiceError::order(order_id, other),
            })?;

        self.event_sender
            .send_or_log(Event::OrderCreated(order_id))
            .await;
        info!(%order_id, total, "created order");

        Ok(Order {
            id: order_id,
            cart_id: input.cart_id,
            buyer: input.buyer,
            recipient: input.recipient,
            coupons,
            positions,
            total,
            fingerprint,
            locked: false,
        })
    }

    /// Places the order: the terminal, exactly-once transition.
    ///
    /// Runs the same verification routine twice. The first pass verifies
    /// against live state and then locks the cart and the order, in that
    /// fixed sequence; locking the cart first means that of two concurrent
    /// placements over the same cart at most one can proceed. The second
    /// pass re-verifies after the locks are held, closing the window in
    /// which state could have changed between checking and locking. Only
    /// then is the denormalized snapshot written to the placed-order sink.
    ///
    /// Fails with `Locked` if the order was already placed, and with
    /// `Deleted` if any premise of the order no longer holds; in the latter
    /// case the order deletes itself and cannot be found afterwards.
    ///
    /// Known limitation: if the sink write itself fails, the cart and the
    /// order stay locked with no placed record; there is no compensating
    /// unlock.
    #[instrument(skip(self, user), fields(user_id = %user.id()))]
    pub async fn place(
        &self,
        user: AuthenticatedUser,
        order_id: Uuid,
    ) -> Result<Order, ServiceError> {
        // First pass verifies and locks the order and its cart: afterwards
        // the cart cannot change anymore and no other placement can win.
        self.prepare_place(user, order_id, false).await?;

        // Second pass verifies again under the locks. Whatever it observes
        // is what gets committed.
        let prepared = self.prepare_place(user, order_id, true).await?;

        let snapshot = build_snapshot(user.id(), &prepared);
        let total = snapshot.total;
        self.placed_orders
            .place_order(snapshot)
            .await
            .map_err(|e| {
                warn!(%order_id, error = %e, "placed-order sink failed after locking");
                ServiceError::Internal(format!("placed-order sink rejected order {order_id}: {e}"))
            })?;

        self.event_sender
            .send_or_log(Event::OrderPlaced { order_id, total })
            .await;
        info!(%order_id, total, "placed order");

        Ok(into_order(prepared))
    }

    /// Tombstones the order. Placed (locked) orders cannot be deleted.
    #[instrument(skip(self, user), fields(user_id = %user.id()))]
    pub async fn delete(
        &self,
        user: AuthenticatedUser,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        self.orders
            .delete_order_of_user(user.id(), order_id)
            .await
            .map_err(|e| ServiceError::order(order_id, e))?;

        self.event_sender
            .send_or_log(Event::OrderDeleted(order_id))
            .await;
        info!(%order_id, "deleted order");
        Ok(())
    }

    /// One verification pass of the placement protocol.
    ///
    /// With `expect_locked` false this is the first pass: the order and the
    /// cart must still be unlocked, and after verification both get locked,
    /// cart first. With `expect_locked` true this is the second pass: lock
    /// states are not preconditions anymore and no locking happens; the
    /// pass ends after the fingerprint comparison.
    ///
    /// Any drift (the cart gone or locked by someone else, a product or
    /// coupon vanished, a fingerprint mismatch) deletes the order and
    /// reports `Deleted`: the order's premise no longer holds, so it heals
    /// itself out of existence. An order that lost the race for its own
    /// lock reports `Locked` instead.
    async fn prepare_place(
        &self,
        user: AuthenticatedUser,
        order_id: Uuid,
        expect_locked: bool,
    ) -> Result<PreparedOrder, ServiceError> {
        let order = self
            .orders
            .find_order_of_user(user.id(), order_id)
            .await
            .map_err(|e| ServiceError::order(order_id, e))?;
        if !expect_locked && order.locked {
            return Err(ServiceError::Locked(format!(
                "order {order_id} is already placed"
            )));
        }

        // Load the cart. If it is gone, not ours anymore, or locked by a
        // competing placement, the order's premise is void.
        let cart = match self.carts.find_cart_of_user(user.id(), order.cart_id).await {
            Ok(cart) => {
                if !expect_locked && cart.locked {
                    return Err(self.delete_stale(user, order_id, "cart is locked").await);
                }
                cart
            }
            Err(RepositoryError::Storage(e)) => {
                return Err(ServiceError::Internal(format!(
                    "cart {}: {e:#}",
                    order.cart_id
                )))
            }
            Err(_) => {
                return Err(self.delete_stale(user, order_id, "cart is gone").await);
            }
        };

        // Resolve all products of the cart. Set products come from the
        // promotion rule table, everything else from the repository.
        let mut products = HashMap::new();
        for line in &cart.positions {
            if products.contains_key(&line.product_id) {
                continue;
            }
            match self.resolve_product(line.product_id).await {
                Ok(Some(product)) => {
                    products.insert(line.product_id, product);
                }
                Ok(None) => {
                    return Err(self.delete_stale(user, order_id, "product is gone").await);
                }
                Err(e) => return Err(e),
            }
        }

        // Re-resolve the coupons; an expired one is drift like any other.
        let now = Utc::now();
        let mut coupons = Vec::with_capacity(order.coupon_codes.len());
        for code in &order.coupon_codes {
            match self.coupons.find_valid_coupon(code, now).await {
                Ok(coupon) => coupons.push(coupon),
                Err(RepositoryError::NotFound) => {
                    return Err(self.delete_stale(user, order_id, "coupon is gone").await);
                }
                Err(e) => return Err(ServiceError::from_repository("coupon", code, e)),
            }
        }

        let positions = self
            .pricing
            .generate_positions(&cart.positions, &products, &coupons);
        if PricingEngine::fingerprint(&positions) != order.fingerprint {
            return Err(self.delete_stale(user, order_id, "fingerprint changed").await);
        }

        if expect_locked {
            return Ok(PreparedOrder {
                order,
                coupons,
                positions,
            });
        }

        // Lock the cart before the order: of two placements racing over
        // the same cart, only one can win this lock, and losing it must
        // still be able to delete the (unlocked) order.
        match self.carts.lock_cart_of_user(user.id(), order.cart_id).await {
            Ok(()) => {}
            Err(RepositoryError::Storage(e)) => {
                return Err(ServiceError::Internal(format!(
                    "cart {}: {e:#}",
                    order.cart_id
                )))
            }
            Err(_) => {
                return Err(self.delete_stale(user, order_id, "cart lock lost").await);
            }
        }

        // Claim the order lock immediately after the cart lock; anything
        // scheduled in between widens the window in which a competing
        // placement of the same order could still delete it.
        self.orders
            .lock_order_of_user(user.id(), order_id)
            .await
            .map_err(|e| ServiceError::order(order_id, e))?;

        self.event_sender
            .send_or_log(Event::CartLocked(order.cart_id))
            .await;

        Ok(PreparedOrder {
            order,
            coupons,
            positions,
        })
    }

    /// Deletes an order whose premise no longer holds and reports the
    /// resulting error: `Deleted` on success, otherwise whatever stopped
    /// the deletion (notably `Locked` when drift is detected on the second
    /// pass, after the order locked itself).
    async fn delete_stale(
        &self,
        user: AuthenticatedUser,
        order_id: Uuid,
        reason: &str,
    ) -> ServiceError {
        info!(%order_id, reason, "deleting stale order");
        match self.delete(user, order_id).await {
            Ok(()) => ServiceError::Deleted(format!("order {order_id} is deleted")),
            Err(e) => e,
        }
    }

    async fn resolve_coupons(&self, codes: &[String]) -> Result<Vec<Coupon>, ServiceError> {
        let now = Utc::now();
        let mut coupons = Vec::with_capacity(codes.len());
        for code in codes {
            let coupon = self
                .coupons
                .find_valid_coupon(code, now)
                .await
                .map_err(|e| ServiceError::from_repository("coupon", code, e))?;
            coupons.push(coupon);
        }
        Ok(coupons)
    }

    /// Resolves a product id, preferring set products from the rule table.
    /// Returns `Ok(None)` when the product does not exist.
    async fn resolve_product(&self, product_id: Uuid) -> Result<Option<Product>, ServiceError> {
        if let Some(set) = self.pricing.rules().set_product(product_id) {
            return Ok(Some(set));
        }
        match self.products.find_product(product_id).await {
            Ok(product) => Ok(Some(product)),
            Err(RepositoryError::NotFound) => Ok(None),
            Err(e) => Err(ServiceError::from_repository("product", product_id, e)),
        }
    }
}

fn into_order(prepared: PreparedOrder) -> Order {
    let total = PricingEngine::total(&prepared.positions);
    Order {
        id: prepared.order.id,
        cart_id: prepared.order.cart_id,
        buyer: prepared.order.buyer,
        recipient: prepared.order.recipient,
        coupons: prepared.coupons,
        positions: prepared.positions,
        total,
        fingerprint: prepared.order.fingerprint,
        locked: prepared.order.locked,
    }
}

/// Assembles the immutable placed-order snapshot from the second pass.
/// Everything the record references is resolved into it: afterwards it
/// never depends on the mutable cart, product or coupon state again.
fn build_snapshot(user_id: Uuid, prepared: &PreparedOrder) -> PlacedOrder {
    let coupons = prepared
        .coupons
        .iter()
        .map(|coupon| {
            (
                coupon.code.clone(),
                PlacedOrderCoupon {
                    product_id: coupon.product_id,
                    name: coupon.name.clone(),
                    discount: coupon.discount,
                },
            )
        })
        .collect();

    let mut products = HashMap::new();
    let mut positions = Vec::with_capacity(prepared.positions.len());
    for position in &prepared.positions {
        positions.push(PlacedOrderPosition {
            product_id: position.product_id,
            coupon_code: position.coupon_code().map(str::to_string),
            quantity: position.quantity,
            price: position.price,
        });
        if let Some(product_id) = position.product_id {
            products.insert(
                product_id,
                PlacedOrderProduct {
                    name: position.name.clone(),
                    price: position.unit_price,
                },
            );
        }
    }

    PlacedOrder {
        user_id,
        buyer: prepared.order.buyer.clone(),
        recipient: prepared.order.recipient.clone(),
        coupons,
        products,
        positions,
        total: PricingEngine::total(&prepared.positions),
    }
}
