// tests/integration/balancer_test.rs

use super::test_helpers::*;
use lavalink_cluster::core::balancer::{
    PenaltyProvider, PlayerPenaltyProvider, RegionFilter, RegionGroup, SelectionContext,
    VoiceRegionPenaltyProvider,
};
use lavalink_cluster::core::errors::LavalinkError;
use lavalink_cluster::core::node::PenaltyInputs;
use std::sync::Arc;

const GUILD: u64 = 42;

#[tokio::test]
async fn test_lowest_penalty_wins() {
    let mut ctx = TestContext::new();
    ctx.add_ready_node("A", 10);
    ctx.add_ready_node("B", 5);

    let selected = ctx.client.select_node(&SelectionContext::new(GUILD)).unwrap();
    assert_eq!(selected.name(), "B");
}

#[tokio::test]
async fn test_ties_go_to_first_registered() {
    let mut ctx = TestContext::new();
    ctx.add_ready_node("first", 3);
    ctx.add_ready_node("second", 3);
    ctx.add_ready_node("third", 3);

    for _ in 0..10 {
        let selected = ctx.client.select_node(&SelectionContext::new(GUILD)).unwrap();
        assert_eq!(selected.name(), "first");
    }
}

#[tokio::test]
async fn test_unavailable_nodes_are_never_selected() {
    let mut ctx = TestContext::new();
    let a = ctx.add_ready_node("A", 10);
    let b = ctx.add_ready_node("B", 5);
    b.mark_unavailable("test");

    let selected = ctx.client.select_node(&SelectionContext::new(GUILD)).unwrap();
    assert_eq!(selected.name(), "A");

    a.mark_unavailable("test");
    let err = ctx.client.select_node(&SelectionContext::new(GUILD)).unwrap_err();
    assert!(matches!(err, LavalinkError::NoAvailableNode(_)));
}

#[tokio::test]
async fn test_empty_pool_yields_no_available_node() {
    let ctx = TestContext::new();
    let err = ctx.client.select_node(&SelectionContext::new(GUILD)).unwrap_err();
    assert!(matches!(err, LavalinkError::NoAvailableNode(ref reason) if reason.contains("none of 0")));
}

#[tokio::test]
async fn test_region_filter_is_a_hard_constraint() {
    let mut ctx = TestContext::new();
    let eu = ctx.add_node("eu", Some(RegionGroup::Europe));
    let us = ctx.add_node("us", Some(RegionGroup::Us));
    make_ready(&eu);
    make_ready(&us);
    send_stats(&eu, 100);
    send_stats(&us, 0);

    let europe = SelectionContext::new(GUILD).with_region_filter(RegionFilter::Group(RegionGroup::Europe));
    assert_eq!(ctx.client.select_node(&europe).unwrap().name(), "eu");

    let rotterdam = SelectionContext::new(GUILD).with_region_filter(RegionFilter::Exact("rotterdam".into()));
    assert_eq!(ctx.client.select_node(&rotterdam).unwrap().name(), "eu");

    // The only matching node goes away: the lower-penalty US node is still not eligible.
    eu.mark_unavailable("test");
    let err = ctx.client.select_node(&europe).unwrap_err();
    match err {
        LavalinkError::NoAvailableNode(reason) => assert!(reason.contains("EUROPE"), "{reason}"),
        other => panic!("expected NoAvailableNode, got {other:?}"),
    }
}

#[tokio::test]
async fn test_untagged_nodes_pass_every_region_filter() {
    let mut ctx = TestContext::new();
    let tagged = ctx.add_node("asia", Some(RegionGroup::Asia));
    let untagged = ctx.add_node("anywhere", None);
    make_ready(&tagged);
    make_ready(&untagged);

    let us = SelectionContext::new(GUILD).with_region_filter(RegionFilter::Exact("us-east".into()));
    assert_eq!(ctx.client.select_node(&us).unwrap().name(), "anywhere");
}

#[tokio::test]
async fn test_ranking_lists_eligible_nodes_in_order() {
    let mut ctx = TestContext::new();
    ctx.add_ready_node("A", 10);
    ctx.add_ready_node("B", 5);
    let c = ctx.add_ready_node("C", 1);
    c.mark_unavailable("test");

    let ranking = ctx
        .client
        .load_balancer()
        .ranking(&ctx.client.nodes(), &SelectionContext::new(GUILD));
    assert_eq!(ranking, vec![("A".to_string(), 10), ("B".to_string(), 5)]);
}

#[tokio::test]
async fn test_exclusion_skips_the_named_node() {
    let mut ctx = TestContext::new();
    ctx.add_ready_node("A", 10);
    ctx.add_ready_node("B", 5);

    let balancer = ctx.client.load_balancer();
    let nodes = ctx.client.nodes();
    let selected = balancer
        .select(&nodes, &SelectionContext::new(GUILD), Some("B"))
        .unwrap();
    assert_eq!(selected.name(), "A");
}

struct Fixed(&'static str, u64);

impl PenaltyProvider for Fixed {
    fn name(&self) -> &'static str {
        self.0
    }

    fn penalty(&self, inputs: &PenaltyInputs, _ctx: &SelectionContext) -> u64 {
        // Only penalise idle-looking nodes, to flip the default ranking.
        if inputs.playing_players < 8 { self.1 } else { 0 }
    }
}

#[tokio::test]
async fn test_providers_can_be_added_and_removed_at_runtime() {
    let mut ctx = TestContext::new();
    ctx.add_ready_node("A", 10);
    ctx.add_ready_node("B", 5);
    let balancer = ctx.client.load_balancer().clone();

    balancer.add_provider(Arc::new(Fixed("custom", 1_000)));
    assert_eq!(ctx.client.select_node(&SelectionContext::new(GUILD)).unwrap().name(), "A");

    assert!(balancer.remove_provider("custom"));
    assert!(!balancer.remove_provider("custom"));
    assert_eq!(ctx.client.select_node(&SelectionContext::new(GUILD)).unwrap().name(), "B");
}

#[tokio::test]
async fn test_penalty_sum_saturates() {
    let mut ctx = TestContext::new();
    ctx.add_ready_node("A", 0);
    let balancer = ctx.client.load_balancer().clone();
    balancer.add_provider(Arc::new(Fixed("huge-1", u64::MAX)));
    balancer.add_provider(Arc::new(Fixed("huge-2", u64::MAX)));

    let inputs = ctx.client.node("A").unwrap().penalty_inputs();
    assert_eq!(balancer.total_penalty(&inputs, &SelectionContext::new(GUILD)), u64::MAX);
    assert_eq!(ctx.client.select_node(&SelectionContext::new(GUILD)).unwrap().name(), "A");
}

#[tokio::test]
async fn test_voice_region_affinity_is_soft() {
    let mut ctx = TestContext::new();
    let us = ctx.add_node("us", Some(RegionGroup::Us));
    let eu = ctx.add_node("eu", Some(RegionGroup::Europe));
    make_ready(&us);
    make_ready(&eu);
    send_stats(&us, 50);
    send_stats(&eu, 0);
    ctx.client.load_balancer().add_provider(Arc::new(VoiceRegionPenaltyProvider));

    let in_us = SelectionContext::new(GUILD).with_voice_region("us-east");
    assert_eq!(ctx.client.select_node(&in_us).unwrap().name(), "us");

    // Affinity never excludes: with the US node gone the EU node still serves.
    us.mark_unavailable("test");
    assert_eq!(ctx.client.select_node(&in_us).unwrap().name(), "eu");
}

#[tokio::test]
async fn test_failures_raise_penalty() {
    let mut ctx = TestContext::new();
    ctx.add_ready_node("A", 3);
    let b = ctx.add_ready_node("B", 0);
    // Two track exceptions on B outweigh A's three playing players.
    for _ in 0..2 {
        b.on_message(lavalink_cluster::core::protocol::NodeMessage::parse(
            &serde_json::json!({
                "op": "event",
                "type": "TrackStuckEvent",
                "guildId": "1",
                "track": track_json("Stuck"),
                "thresholdMs": 10000
            })
            .to_string(),
        )
        .unwrap());
    }
    assert_eq!(b.penalty_inputs().recent_failures, 2);
    assert_eq!(ctx.client.select_node(&SelectionContext::new(GUILD)).unwrap().name(), "A");
}

#[test]
fn test_player_provider_counts_playing_players() {
    let inputs = PenaltyInputs {
        players: 20,
        playing_players: 12,
        ..Default::default()
    };
    assert_eq!(PlayerPenaltyProvider.penalty(&inputs, &SelectionContext::default()), 12);
}
