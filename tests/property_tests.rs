//! Property-based tests for the pricing engine and its fingerprint.

use commerce_core::models::{CartPosition, Coupon, Product};
use commerce_core::services::pricing::{PricingEngine, PromotionRules};
use proptest::prelude::*;
use std::collections::HashMap;
use uuid::Uuid;

/// A small fixed catalog so that generated carts hit real products.
fn catalog() -> Vec<Product> {
    let names = ["Apple", "Orange", "Pear", "Banana", "Cherry"];
    names
        .iter()
        .enumerate()
        .map(|(i, name)| Product {
            id: Uuid::from_u128(0x1000 + i as u128),
            name: name.to_string(),
            price: 30 + 17 * i as i64,
        })
        .collect()
}

fn product_map(products: &[Product]) -> HashMap<Uuid, Product> {
    products.iter().map(|p| (p.id, p.clone())).collect()
}

fn raw_positions_strategy() -> impl Strategy<Value = Vec<CartPosition>> {
    let products = catalog();
    prop::collection::vec(
        (0..products.len(), 0i32..40).prop_map(move |(idx, quantity)| CartPosition {
            product_id: products[idx].id,
            quantity,
        }),
        0..12,
    )
}

fn coupons_strategy() -> impl Strategy<Value = Vec<Coupon>> {
    let products = catalog();
    prop::collection::vec(
        (0..products.len(), 1i32..=100, 0u8..4).prop_map(move |(idx, discount, tag)| Coupon {
            code: format!("code-{idx}-{tag}"),
            product_id: products[idx].id,
            name: format!("{discount}% off"),
            discount,
            expires_at: chrono::DateTime::from_timestamp(4_102_444_800, 0).expect("timestamp"),
        }),
        0..4,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Permuting the raw cart lines must never change the fingerprint.
    #[test]
    fn fingerprint_is_order_independent(
        raw in raw_positions_strategy(),
        coupons in coupons_strategy(),
        seed in any::<u64>(),
    ) {
        let engine = PricingEngine::new(PromotionRules::none());
        let products = product_map(&catalog());

        let mut shuffled = raw.clone();
        // cheap deterministic shuffle
        let len = shuffled.len();
        if len > 1 {
            for i in 0..len {
                let j = (seed as usize).wrapping_mul(31).wrapping_add(i * 7) % len;
                shuffled.swap(i, j);
            }
        }

        let original = engine.generate_positions(&raw, &products, &coupons);
        let permuted = engine.generate_positions(&shuffled, &products, &coupons);

        prop_assert_eq!(
            PricingEngine::fingerprint(&original),
            PricingEngine::fingerprint(&permuted)
        );
    }

    /// Pricing the same input twice is deterministic, positions included.
    #[test]
    fn pricing_is_deterministic(
        raw in raw_positions_strategy(),
        coupons in coupons_strategy(),
    ) {
        let engine = PricingEngine::new(PromotionRules::demo());
        let products = product_map(&catalog());

        let first = engine.generate_positions(&raw, &products, &coupons);
        let second = engine.generate_positions(&raw, &products, &coupons);

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(
            PricingEngine::fingerprint(&first),
            PricingEngine::fingerprint(&second)
        );
    }

    /// Raising the quantity of any line must change the fingerprint.
    #[test]
    fn fingerprint_reacts_to_quantity_changes(
        raw in raw_positions_strategy(),
        coupons in coupons_strategy(),
        pick in any::<prop::sample::Index>(),
    ) {
        prop_assume!(!raw.is_empty());
        let engine = PricingEngine::new(PromotionRules::none());
        let products = product_map(&catalog());

        let mut bumped = raw.clone();
        let idx = pick.index(bumped.len());
        bumped[idx].quantity += 1;

        let original = engine.generate_positions(&raw, &products, &coupons);
        let changed = engine.generate_positions(&bumped, &products, &coupons);

        prop_assert_ne!(
            PricingEngine::fingerprint(&original),
            PricingEngine::fingerprint(&changed)
        );
    }

    /// The total is always the sum of the final position prices, and every
    /// discount line's saved amount mirrors its (negative) price.
    #[test]
    fn totals_and_saved_prices_are_consistent(
        raw in raw_positions_strategy(),
        coupons in coupons_strategy(),
    ) {
        let engine = PricingEngine::new(PromotionRules::demo());
        let products = product_map(&catalog());

        let positions = engine.generate_positions(&raw, &products, &coupons);
        let total = PricingEngine::total(&positions);

        prop_assert_eq!(total, positions.iter().map(|p| p.price).sum::<i64>());
        for position in &positions {
            if position.coupon.is_some() {
                prop_assert!(position.price <= 0);
                prop_assert_eq!(position.saved_price, -position.price);
            }
        }
    }
}
