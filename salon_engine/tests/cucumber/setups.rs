use chrono::Duration;
use cucumber::given;
use salon_common::Points;
use salon_engine::{
    events::EventProducers,
    refund_policy::{FeeTier, RefundPolicy},
    test_utils::fixtures::TestSalon,
    BookingPolicy,
};

use crate::cucumber::SalonWorld;

#[given("a fresh salon")]
async fn fresh_salon(world: &mut SalonWorld) {
    world.system = Some(TestSalon::new().await);
}

#[given(expr = "a fresh salon that compensates shop cancellations with {int} points")]
async fn salon_with_compensation(world: &mut SalonWorld, points: i64) {
    let refund_policy = RefundPolicy::new(Duration::hours(24), vec![
        FeeTier::new(Duration::hours(3), 2_000),
        FeeTier::new(Duration::zero(), 5_000),
    ])
    .with_shop_compensation(Points::from(points));
    let policy = BookingPolicy::default().with_refund_policy(refund_policy);
    world.system = Some(TestSalon::with_policy(policy, EventProducers::default()).await);
}

#[given(expr = "{word} has been granted {int} points")]
async fn grant_points(world: &mut SalonWorld, customer: String, points: i64) {
    world.salon().points.grant(&customer, Points::from(points), "Scenario setup").await.expect("Error granting points");
}
