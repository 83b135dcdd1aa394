use crate::{
    auth::AuthenticatedUser,
    errors::{RepositoryError, ServiceError},
    events::{Event, EventSender},
    models::{Cart, CartPosition, Position, StoredCart},
    repositories::{CartRepository, ProductRepository},
    services::pricing::PromotionRules,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Display label for cart lines whose product no longer exists.
const PRODUCT_UNAVAILABLE: &str = "Product not available anymore.";

/// Cart coordinator.
///
/// Carts store raw positions only (product id and quantity); every read
/// resolves products and computes prices fresh, so a cart can never pin a
/// stale price. Cart ids are client-supplied, which is why creation can
/// fail with `Conflict`.
///
/// The lock operation is what the order placement protocol builds on: a
/// locked cart can never be updated or deleted again, so the positions an
/// order was priced against stay frozen once placement wins the lock.
#[derive(Clone)]
pub struct CartService {
    carts: Arc<dyn CartRepository>,
    products: Arc<dyn ProductRepository>,
    rules: PromotionRules,
    event_sender: EventSender,
}

impl CartService {
    pub fn new(
        carts: Arc<dyn CartRepository>,
        products: Arc<dyn ProductRepository>,
        rules: PromotionRules,
        event_sender: EventSender,
    ) -> Self {
        Self {
            carts,
            products,
            rules,
            event_sender,
        }
    }

    /// Creates a cart and returns it with all prices calculated.
    ///
    /// Fails with `Conflict` if a cart with the same id exists or ever
    /// existed, and with `Validation` on negative quantities.
    #[instrument(skip(self, user, positions), fields(user_id = %user.id()))]
    pub async fn create_and_get(
        &self,
        user: AuthenticatedUser,
        cart_id: Uuid,
        positions: Vec<CartPosition>,
    ) -> Result<Cart, ServiceError> {
        validate_quantities(&positions)?;

        self.carts
            .create_cart(user.id(), cart_id, positions.clone())
            .await
            .map_err(|e| ServiceError::cart(cart_id, e))?;

        self.event_sender
            .send_or_log(Event::CartCreated(cart_id))
            .await;
        info!(%cart_id, "created cart");

        Ok(Cart {
            id: cart_id,
            positions: self.display_positions(&positions).await?,
            locked: false,
        })
    }

    /// Replaces all positions of the cart and returns it with prices
    /// calculated. Fails with `Locked` once the cart was locked by a
    /// placement.
    #[instrument(skip(self, user, positions), fields(user_id = %user.id()))]
    pub async fn update_and_get(
        &self,
        user: AuthenticatedUser,
        cart_id: Uuid,
        positions: Vec<CartPosition>,
    ) -> Result<Cart, ServiceError> {
        validate_quantities(&positions)?;

        self.carts
            .update_cart_of_user(user.id(), cart_id, positions.clone())
            .await
            .map_err(|e| ServiceError::cart(cart_id, e))?;

        self.event_sender
            .send_or_log(Event::CartUpdated(cart_id))
            .await;

        Ok(Cart {
            id: cart_id,
            positions: self.display_positions(&positions).await?,
            locked: false,
        })
    }

    /// Returns the cart with all prices calculated.
    #[instrument(skip(self, user), fields(user_id = %user.id()))]
    pub async fn get(&self, user: AuthenticatedUser, cart_id: Uuid) -> Result<Cart, ServiceError> {
        let stored = self
            .carts
            .find_cart_of_user(user.id(), cart_id)
            .await
            .map_err(|e| ServiceError::cart(cart_id, e))?;
        self.to_cart(stored).await
    }

    /// Returns all unlocked carts of the user, prices calculated.
    #[instrument(skip(self, user), fields(user_id = %user.id()))]
    pub async fn get_all_unlocked(
        &self,
        user: AuthenticatedUser,
    ) -> Result<Vec<Cart>, ServiceError> {
        let stored = self
            .carts
            .find_all_unlocked_carts_of_user(user.id())
            .await
            .map_err(|e| ServiceError::from_repository("carts of user", user.id(), e))?;

        let mut carts = Vec::with_capacity(stored.len());
        for cart in stored {
            carts.push(self.to_cart(cart).await?);
        }
        Ok(carts)
    }

    /// Tombstones the cart. A deleted cart id can never be reused.
    #[instrument(skip(self, user), fields(user_id = %user.id()))]
    pub async fn delete(&self, user: AuthenticatedUser, cart_id: Uuid) -> Result<(), ServiceError> {
        self.carts
            .delete_cart_of_user(user.id(), cart_id)
            .await
            .map_err(|e| ServiceError::cart(cart_id, e))?;

        self.event_sender
            .send_or_log(Event::CartDeleted(cart_id))
            .await;
        info!(%cart_id, "deleted cart");
        Ok(())
    }

    /// Locks the cart, permanently freezing its positions. One-way: fails
    /// with `Locked` if any caller locked it before.
    #[instrument(skip(self, user), fields(user_id = %user.id()))]
    pub async fn lock(&self, user: AuthenticatedUser, cart_id: Uuid) -> Result<(), ServiceError> {
        self.carts
            .lock_cart_of_user(user.id(), cart_id)
            .await
            .map_err(|e| ServiceError::cart(cart_id, e))?;

        self.event_sender
            .send_or_log(Event::CartLocked(cart_id))
            .await;
        info!(%cart_id, "locked cart");
        Ok(())
    }

    async fn to_cart(&self, stored: StoredCart) -> Result<Cart, ServiceError> {
        Ok(Cart {
            id: stored.id,
            positions: self.display_positions(&stored.positions).await?,
            locked: stored.locked,
        })
    }

    /// Resolves raw positions for display. Vanished products are kept as
    /// placeholder lines with price zero; they never enter order pricing.
    async fn display_positions(
        &self,
        raw: &[CartPosition],
    ) -> Result<Vec<Position>, ServiceError> {
        let mut positions = Vec::with_capacity(raw.len());
        for line in raw {
            let product = match self.rules.set_product(line.product_id) {
                Some(set) => Some(set),
                None => match self.products.find_product(line.product_id).await {
                    Ok(product) => Some(product),
                    Err(RepositoryError::NotFound) => None,
                    Err(e) => {
                        return Err(ServiceError::from_repository("product", line.product_id, e))
                    }
                },
            };

            positions.push(match product {
                Some(product) => Position {
                    product_id: Some(line.product_id),
                    unit_price: product.price,
                    coupon: None,
                    name: product.name,
                    quantity: line.quantity,
                    price: i64::from(line.quantity) * product.price,
                    saved_price: 0,
                },
                None => Position {
                    product_id: None,
                    unit_price: 0,
                    coupon: None,
                    name: PRODUCT_UNAVAILABLE.to_string(),
                    quantity: line.quantity,
                    price: 0,
                    saved_price: 0,
                },
            });
        }
        Ok(positions)
    }
}

fn validate_quantities(positions: &[CartPosition]) -> Result<(), ServiceError> {
    if positions.iter().any(|p| p.quantity < 0) {
        return Err(ServiceError::Validation(
            "position quantities must not be negative".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_quantities_are_rejected() {
        let positions = vec![CartPosition {
            product_id: Uuid::new_v4(),
            quantity: -1,
        }];
        assert!(matches!(
            validate_quantities(&positions),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn zero_quantities_are_legal() {
        let positions = vec![CartPosition {
            product_id: Uuid::new_v4(),
            quantity: 0,
        }];
        assert!(validate_quantities(&positions).is_ok());
    }
}
