//! Domain model shared by the repositories and coordinator services.
//!
//! Prices are integers in minor currency units (cents). Discount lines use
//! negative prices; `saved_price` carries the absolute discount amount for
//! display, independent of the line price.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A registered user. The password is stored only as a hash and is never
/// part of the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
}

/// A product that can be ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    /// Unit price in minor currency units.
    pub price: i64,
}

/// A coupon that discounts a specific product. The code functions as the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub product_id: Uuid,
    pub name: String,
    /// Discount in percent, 1 to 100.
    pub discount: i32,
    pub expires_at: DateTime<Utc>,
}

impl Coupon {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// An address for billing or shipping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub country: String,
    pub postal_code: String,
    pub city: String,
    pub street: String,
}

/// A raw cart line as stored: product and quantity only. Prices are always
/// derived at read time so that a cart never pins a stale price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartPosition {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// A cart as stored, before product resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCart {
    pub id: Uuid,
    pub positions: Vec<CartPosition>,
    pub locked: bool,
}

/// A cart with display positions resolved and priced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub id: Uuid,
    pub positions: Vec<Position>,
    pub locked: bool,
}

/// A derived line of a priced cart or order.
///
/// Product lines carry a `product_id`; synthetic discount lines (coupon
/// lines, promotion-rule lines) do not. The order of positions groups each
/// discount line directly after the product line it applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Product this line refers to. `None` for synthetic discount lines and
    /// for placeholder lines whose product no longer exists.
    pub product_id: Option<Uuid>,
    /// Unit price of the product at pricing time; 0 for discount lines.
    pub unit_price: i64,
    /// The coupon behind this line, set only on coupon discount lines.
    pub coupon: Option<Coupon>,
    /// Display label: the product name or a discount description.
    pub name: String,
    pub quantity: i32,
    /// Line total in minor currency units; negative for discount lines.
    pub price: i64,
    /// Absolute amount this line saves, for display.
    pub saved_price: i64,
}

impl Position {
    /// The coupon code of a coupon discount line.
    pub fn coupon_code(&self) -> Option<&str> {
        self.coupon.as_ref().map(|c| c.code.as_str())
    }
}

/// Order attributes as persisted. Positions and totals are never stored:
/// they are recomputed from the live cart, product and coupon state, and the
/// fingerprint is what ties the stored order to the state it was priced
/// against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOrder {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub buyer: Address,
    pub recipient: Address,
    pub coupon_codes: Vec<String>,
    pub fingerprint: String,
    pub locked: bool,
}

/// A fully priced order as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub buyer: Address,
    pub recipient: Address,
    pub coupons: Vec<Coupon>,
    pub positions: Vec<Position>,
    /// Sum of all position prices in minor currency units.
    pub total: i64,
    pub fingerprint: String,
    pub locked: bool,
}

/// The write-once record of a placed order.
///
/// The snapshot is denormalized on purpose: it resolves every coupon and
/// product it references so that the archived record never depends on the
/// mutable stores again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub user_id: Uuid,
    pub buyer: Address,
    pub recipient: Address,
    /// Coupon details by code, as applied.
    pub coupons: HashMap<String, PlacedOrderCoupon>,
    /// Product details by id, as priced.
    pub products: HashMap<Uuid, PlacedOrderProduct>,
    pub positions: Vec<PlacedOrderPosition>,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedOrderCoupon {
    pub product_id: Uuid,
    pub name: String,
    pub discount: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedOrderProduct {
    pub name: String,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedOrderPosition {
    pub product_id: Option<Uuid>,
    pub coupon_code: Option<String>,
    pub quantity: i32,
    pub price: i64,
}
