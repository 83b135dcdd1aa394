//! The pricing engine: a pure transformation from raw cart lines, resolved
//! products and valid coupons into the final priced position list, plus the
//! content fingerprint that the order placement protocol compares.
//!
//! No I/O happens here. The same functions run at order creation and at
//! placement, so drift detection cannot diverge between the two call sites.

use crate::models::{CartPosition, Coupon, Position, Product};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

/// A quantity-threshold discount on a single product: buying at least
/// `min_quantity` units inserts one discount line after the position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRule {
    pub product_id: Uuid,
    pub min_quantity: i32,
    pub discount_percent: i32,
    /// Display label of the discount line.
    pub label: String,
}

/// One component of a bundle: the product and how many units go into a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleComponent {
    pub product_id: Uuid,
    pub quantity_per_set: i32,
}

/// The synthetic product a bundle converts into. Set products resolve via
/// the rule table, never via the product repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetProduct {
    pub product_id: Uuid,
    pub name: String,
    /// Discounted price per set.
    pub price: i64,
    /// Amount saved per set against buying the components separately.
    pub saved_price: i64,
}

/// A fixed-ratio bundle discount: complete sets of the two components are
/// converted into the set product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRule {
    pub component_a: BundleComponent,
    pub component_b: BundleComponent,
    pub set: SetProduct,
}

/// The promotion rule table. Rules are data, keyed by product id; the
/// engine itself knows nothing about specific products.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionRules {
    pub bulk: Vec<BulkRule>,
    pub bundles: Vec<BundleRule>,
}

/// Product id of the demo bulk discount (apples).
pub const BULK_APPLES_PRODUCT_ID: Uuid = Uuid::from_u128(0xa6da78f8_2be6_49ff_b40a_32aa86a6a986);
/// Product ids of the demo bundle components and set.
pub const BUNDLE_PEAR_PRODUCT_ID: Uuid = Uuid::from_u128(0x5438bfe8_6bd2_4a88_ac36_ec29716eb6d7);
pub const BUNDLE_BANANA_PRODUCT_ID: Uuid = Uuid::from_u128(0xb16088e1_9603_4676_a8df_130823cf15a5);
pub const BUNDLE_SET_PRODUCT_ID: Uuid = Uuid::from_u128(0x0de17a66_ea59_4032_9383_2603c6c77d25);

impl PromotionRules {
    /// The built-in demo table: 10% off seven or more apples, and sets of
    /// four pears and two bananas at 30% off.
    pub fn demo() -> Self {
        Self {
            bulk: vec![BulkRule {
                product_id: BULK_APPLES_PRODUCT_ID,
                min_quantity: 7,
                discount_percent: 10,
                label: "10% off apples".to_string(),
            }],
            bundles: vec![BundleRule {
                component_a: BundleComponent {
                    product_id: BUNDLE_PEAR_PRODUCT_ID,
                    quantity_per_set: 4,
                },
                component_b: BundleComponent {
                    product_id: BUNDLE_BANANA_PRODUCT_ID,
                    quantity_per_set: 2,
                },
                set: SetProduct {
                    product_id: BUNDLE_SET_PRODUCT_ID,
                    name: "Set of 4 pears and 2 bananas (30% off)".to_string(),
                    price: 444,
                    saved_price: 190,
                },
            }],
        }
    }

    /// A table with no rules, for embedders that do their own promotions.
    pub fn none() -> Self {
        Self {
            bulk: Vec::new(),
            bundles: Vec::new(),
        }
    }

    /// Resolves a set product by id from the bundle rules.
    pub fn set_product(&self, product_id: Uuid) -> Option<Product> {
        self.bundles
            .iter()
            .find(|rule| rule.set.product_id == product_id)
            .map(|rule| Product {
                id: rule.set.product_id,
                name: rule.set.name.clone(),
                price: rule.set.price,
            })
    }
}

impl Default for PromotionRules {
    fn default() -> Self {
        Self::demo()
    }
}

/// The stateless pricing engine. Cheap to clone; carries only the rule
/// table.
#[derive(Debug, Clone, Default)]
pub struct PricingEngine {
    rules: PromotionRules,
}

impl PricingEngine {
    pub fn new(rules: PromotionRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &PromotionRules {
        &self.rules
    }

    /// Derives the final priced positions of an order.
    ///
    /// Stages, in this exact sequence:
    /// 1. consolidate raw lines by product id, summing quantities and
    ///    keeping first-occurrence order;
    /// 2. price each line at `quantity x unit price`, dropping lines whose
    ///    product is not in `products`;
    /// 3. insert the best valid coupon line per product directly after its
    ///    position (highest discount wins, first encountered wins ties);
    /// 4. insert bulk discount lines per the rule table;
    /// 5. convert complete bundles into set positions per the rule table.
    pub fn generate_positions(
        &self,
        raw: &[CartPosition],
        products: &HashMap<Uuid, Product>,
        coupons: &[Coupon],
    ) -> Vec<Position> {
        let mut positions = self.price_consolidated(raw, products);
        self.insert_coupon_lines(&mut positions, coupons);
        self.insert_bulk_discounts(&mut positions);
        self.convert_bundles(&mut positions);
        positions
    }

    /// Sums all position prices.
    pub fn total(positions: &[Position]) -> i64 {
        positions.iter().map(|p| p.price).sum()
    }

    /// Computes the content fingerprint of a position list.
    ///
    /// Each position becomes a canonical entry
    /// `"{quantity},{price},product:{id}"` (id empty for synthetic lines) or
    /// `"{quantity},{price},coupon:{product_id},{discount},{code}"`; the
    /// entries are sorted, joined with newlines and digested with SHA-256.
    /// Sorting makes the fingerprint independent of position order, while
    /// any change to a quantity, price, product, coupon code or discount
    /// yields a different value.
    pub fn fingerprint(positions: &[Position]) -> String {
        let mut entries: Vec<String> = positions
            .iter()
            .map(|position| match &position.coupon {
                Some(coupon) => format!(
                    "{},{},coupon:{},{},{:?}",
                    position.quantity,
                    position.price,
                    coupon.product_id,
                    coupon.discount,
                    coupon.code,
                ),
                None => format!(
                    "{},{},product:{}",
                    position.quantity,
                    position.price,
                    position
                        .product_id
                        .map(|id| id.to_string())
                        .unwrap_or_default(),
                ),
            })
            .collect();
        entries.sort();

        let canonical = entries.join("\n");
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    fn price_consolidated(
        &self,
        raw: &[CartPosition],
        products: &HashMap<Uuid, Product>,
    ) -> Vec<Position> {
        // Consolidate by product id, first occurrence determines the order.
        let mut order: Vec<Uuid> = Vec::new();
        let mut quantities: HashMap<Uuid, i32> = HashMap::new();
        for line in raw {
            if !quantities.contains_key(&line.product_id) {
                order.push(line.product_id);
            }
            *quantities.entry(line.product_id).or_insert(0) += line.quantity;
        }

        order
            .into_iter()
            .filter_map(|product_id| {
                // Unknown products are kept for display by the cart layer
                // but never enter the priced list.
                let product = products.get(&product_id)?;
                let quantity = quantities[&product_id];
                Some(Position {
                    product_id: Some(product_id),
                    unit_price: product.price,
                    coupon: None,
                    name: product.name.clone(),
                    quantity,
                    price: i64::from(quantity) * product.price,
                    saved_price: 0,
                })
            })
            .collect()
    }

    fn insert_coupon_lines(&self, positions: &mut Vec<Position>, coupons: &[Coupon]) {
        // Best coupon per product: highest discount, first one wins ties.
        let mut best: HashMap<Uuid, &Coupon> = HashMap::new();
        for coupon in coupons {
            let current = best.entry(coupon.product_id).or_insert(coupon);
            if coupon.discount > current.discount {
                *current = coupon;
            }
        }

        let mut i = 0;
        while i < positions.len() {
            let Some(product_id) = positions[i].product_id else {
                i += 1;
                continue;
            };
            if let Some(coupon) = best.get(&product_id) {
                let price = -i64::from(coupon.discount) * positions[i].price / 100;
                positions.insert(
                    i + 1,
                    Position {
                        product_id: None,
                        unit_price: 0,
                        coupon: Some((*coupon).clone()),
                        name: coupon.name.clone(),
                        quantity: 1,
                        price,
                        saved_price: -price,
                    },
                );
                i += 1; // skip the line just inserted
            }
            i += 1;
        }
    }

    fn insert_bulk_discounts(&self, positions: &mut Vec<Position>) {
        for rule in &self.rules.bulk {
            let Some(i) = positions
                .iter()
                .position(|p| p.product_id == Some(rule.product_id))
            else {
                continue;
            };
            if positions[i].quantity < rule.min_quantity {
                continue;
            }
            let price = -i64::from(rule.discount_percent) * positions[i].price / 100;
            positions.insert(
                i + 1,
                Position {
                    product_id: None,
                    unit_price: 0,
                    coupon: None,
                    name: rule.label.clone(),
                    quantity: 1,
                    price,
                    saved_price: -price,
                },
            );
        }
    }

    fn convert_bundles(&self, positions: &mut Vec<Position>) {
        for rule in &self.rules.bundles {
            let quantity_of = |positions: &[Position], product_id: Uuid| {
                positions
                    .iter()
                    .find(|p| p.product_id == Some(product_id))
                    .map(|p| p.quantity)
                    .unwrap_or(0)
            };
            let num_sets = std::cmp::min(
                quantity_of(positions, rule.component_a.product_id)
                    / rule.component_a.quantity_per_set,
                quantity_of(positions, rule.component_b.product_id)
                    / rule.component_b.quantity_per_set,
            );
            if num_sets <= 0 {
                continue;
            }

            // Consume the components, dropping positions that reach zero.
            for component in [rule.component_a, rule.component_b] {
                if let Some(i) = positions
                    .iter()
                    .position(|p| p.product_id == Some(component.product_id))
                {
                    let position = &mut positions[i];
                    position.quantity -= num_sets * component.quantity_per_set;
                    position.price = i64::from(position.quantity) * position.unit_price;
                    if position.quantity == 0 {
                        positions.remove(i);
                    }
                }
            }

            // Grow an existing set position or append a new one.
            if let Some(i) = positions
                .iter()
                .position(|p| p.product_id == Some(rule.set.product_id))
            {
                let position = &mut positions[i];
                position.quantity += num_sets;
                position.price += i64::from(num_sets) * rule.set.price;
                position.saved_price += i64::from(num_sets) * rule.set.saved_price;
            } else {
                positions.push(Position {
                    product_id: Some(rule.set.product_id),
                    unit_price: rule.set.price,
                    coupon: None,
                    name: rule.set.name.clone(),
                    quantity: num_sets,
                    price: i64::from(num_sets) * rule.set.price,
                    saved_price: i64::from(num_sets) * rule.set.saved_price,
                });
            }
        }
    }
}
