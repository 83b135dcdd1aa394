use crate::{
    config::AppConfig,
    errors::{RepositoryError, ServiceError},
    events::{Event, EventSender},
    models::{Coupon, Product},
    repositories::{CouponRepository, ProductRepository, RepoResult},
    services::pricing::{
        PromotionRules, BULK_APPLES_PRODUCT_ID, BUNDLE_BANANA_PRODUCT_ID, BUNDLE_PEAR_PRODUCT_ID,
    },
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Product id of the demo orange (no promotion attached).
pub const ORANGE_PRODUCT_ID: Uuid = Uuid::from_u128(0x5b31a473_4b5e_48ad_8033_bcccdfb373f9);

/// Input for storing a coupon.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SaveCouponInput {
    #[validate(length(min = 6, max = 40))]
    pub code: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 100))]
    pub discount: i32,
    /// Defaults to now plus the configured coupon lifetime.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Product catalog and coupon coordinator.
#[derive(Clone)]
pub struct ProductService {
    products: Arc<dyn ProductRepository>,
    coupons: Arc<dyn CouponRepository>,
    rules: PromotionRules,
    config: Arc<AppConfig>,
    event_sender: EventSender,
}

impl ProductService {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        coupons: Arc<dyn CouponRepository>,
        rules: PromotionRules,
        config: Arc<AppConfig>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            products,
            coupons,
            rules,
            config,
            event_sender,
        }
    }

    /// Returns all stored products. Set products are not listed; they only
    /// come into existence through their bundle rule.
    pub async fn get_all(&self) -> Result<Vec<Product>, ServiceError> {
        self.products
            .find_all_products()
            .await
            .map_err(|e| ServiceError::from_repository("products", "*", e))
    }

    /// Returns the product with the given id. Set products resolve from the
    /// promotion rule table, not from the repository.
    #[instrument(skip(self))]
    pub async fn get(&self, product_id: Uuid) -> Result<Product, ServiceError> {
        if let Some(set) = self.rules.set_product(product_id) {
            return Ok(set);
        }
        self.products
            .find_product(product_id)
            .await
            .map_err(|e| ServiceError::from_repository("product", product_id, e))
    }

    /// Adds a product to the catalog.
    #[instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn create_product(&self, product: Product) -> Result<Product, ServiceError> {
        if product.price < 0 {
            return Err(ServiceError::Validation(
                "product price must not be negative".to_string(),
            ));
        }

        self.products
            .create_product(product.clone())
            .await
            .map_err(|e| ServiceError::from_repository("product", product.id, e))?;

        self.event_sender
            .send_or_log(Event::ProductCreated(product.id))
            .await;
        info!(product_id = %product.id, "created product");
        Ok(product)
    }

    /// Creates or overwrites the coupon with the given code. The coupon's
    /// product must exist; the expiry defaults to the configured lifetime.
    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn save_coupon(&self, input: SaveCouponInput) -> Result<Coupon, ServiceError> {
        input.validate()?;

        // The coupon must target a product that actually exists.
        self.get(input.product_id).await?;

        let expires_at = input
            .expires_at
            .unwrap_or_else(|| Utc::now() + self.config.coupon_default_lifetime());
        let coupon = Coupon {
            code: input.code,
            product_id: input.product_id,
            name: input.name,
            discount: input.discount,
            expires_at,
        };

        self.coupons
            .store_coupon(coupon.clone())
            .await
            .map_err(|e| ServiceError::from_repository("coupon", &coupon.code, e))?;

        self.event_sender
            .send_or_log(Event::CouponStored {
                code: coupon.code.clone(),
                product_id: coupon.product_id,
            })
            .await;
        info!(code = %coupon.code, "stored coupon");
        Ok(coupon)
    }

    /// Returns the valid (unexpired) coupon with the given code.
    #[instrument(skip(self))]
    pub async fn get_coupon(&self, code: &str) -> Result<Coupon, ServiceError> {
        self.coupons
            .find_valid_coupon(code, Utc::now())
            .await
            .map_err(|e| ServiceError::from_repository("coupon", code, e))
    }
}

/// Seeds the demo catalog the promotion rule table refers to. Intended for
/// tests and demo deployments.
pub async fn seed_demo_catalog(products: &dyn ProductRepository) -> RepoResult<()> {
    for product in demo_catalog() {
        match products.create_product(product).await {
            Ok(()) | Err(RepositoryError::Conflict) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// The demo catalog: apples carry the bulk rule, pears and bananas combine
/// into the demo set.
pub fn demo_catalog() -> Vec<Product> {
    vec![
        Product {
            id: BULK_APPLES_PRODUCT_ID,
            name: "Apple".to_string(),
            price: 49,
        },
        Product {
            id: ORANGE_PRODUCT_ID,
            name: "Orange".to_string(),
            price: 79,
        },
        Product {
            id: BUNDLE_PEAR_PRODUCT_ID,
            name: "Pear".to_string(),
            price: 109,
        },
        Product {
            id: BUNDLE_BANANA_PRODUCT_ID,
            name: "Banana".to_string(),
            price: 99,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coupon_input_bounds_are_enforced() {
        let valid = SaveCouponInput {
            code: "orange30".into(),
            name: "30% off oranges".into(),
            product_id: Uuid::new_v4(),
            discount: 30,
            expires_at: None,
        };
        assert!(valid.validate().is_ok());

        let short_code = SaveCouponInput {
            code: "short".into(),
            ..valid.clone()
        };
        assert!(short_code.validate().is_err());

        let zero_discount = SaveCouponInput {
            discount: 0,
            ..valid.clone()
        };
        assert!(zero_discount.validate().is_err());

        let over_discount = SaveCouponInput {
            discount: 101,
            ..valid
        };
        assert!(over_discount.validate().is_err());
    }

    #[test]
    fn demo_catalog_covers_every_rule_product() {
        let catalog = demo_catalog();
        let rules = PromotionRules::demo();
        for rule in &rules.bulk {
            assert!(catalog.iter().any(|p| p.id == rule.product_id));
        }
        for rule in &rules.bundles {
            assert!(catalog.iter().any(|p| p.id == rule.component_a.product_id));
            assert!(catalog.iter().any(|p| p.id == rule.component_b.product_id));
        }
    }
}
