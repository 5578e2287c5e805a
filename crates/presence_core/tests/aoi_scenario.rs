//! Two players sharing a cell, then one walking out of view.

mod common;

use common::{collect_for, shows_player, small_world, wait_for};
use presence_core::{CellId, Position, ServerMessage};
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::test(flavor = "multi_thread")]
async fn test_player_walking_out_of_view_is_removed() {
    let runtime = small_world(50);
    let indexer = runtime.indexer();
    assert_eq!(indexer.cell_id_at(5.0, 5.0), indexer.cell_id_at(6.0, 6.0));
    assert!(!indexer
        .neighbor_ids(&CellId::from("0-3-0"), 1)
        .contains(&indexer.cell_id_at(-90.0, -90.0)));

    let (a_out, mut a_client) = mpsc::channel(256);
    let (b_out, mut b_client) = mpsc::channel(256);
    let mut a = runtime.session("A", a_out);
    let mut b = runtime.session("B", b_out);

    a.handle_position(Position::new("A", 5.0, 0.0, 5.0)).await.unwrap();
    b.handle_position(Position::new("B", 6.0, 0.0, 6.0)).await.unwrap();
    a.active_topics().await.unwrap();
    b.active_topics().await.unwrap();

    let seen = wait_for(&mut a_client, Duration::from_secs(2), |m| shows_player(m, "B")).await;
    assert!(seen.is_some(), "A never saw B");
    let seen = wait_for(&mut b_client, Duration::from_secs(2), |m| shows_player(m, "A")).await;
    assert!(seen.is_some(), "B never saw A");

    b.handle_position(Position::new("B", -90.0, 0.0, -90.0))
        .await
        .unwrap();

    let left = wait_for(&mut a_client, Duration::from_secs(2), |m| {
        matches!(m, ServerMessage::PlayerLeft { player_id } if player_id == "B")
    })
    .await;
    assert!(left.is_some(), "A never received PlayerLeft for B");

    let later = collect_for(&mut a_client, Duration::from_millis(300)).await;
    assert!(later.iter().all(|m| !shows_player(m, "B")));

    // B's own view of A is cleared once A's cell drops out of B's area.
    let cleared = wait_for(&mut b_client, Duration::from_secs(2), |m| {
        matches!(m, ServerMessage::PlayerLeft { player_id } if player_id == "A")
    })
    .await;
    assert!(cleared.is_some(), "B never received PlayerLeft for A");

    a.close().await;
    b.close().await;
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_departure_is_published_before_next_tick() {
    // A tick far in the future: only the immediate departure can reach A.
    let runtime = small_world(60_000);
    let (a_out, mut a_client) = mpsc::channel(256);
    let (b_out, _b_client) = mpsc::channel(256);
    let mut a = runtime.session("A", a_out);
    let mut b = runtime.session("B", b_out);

    a.handle_position(Position::new("A", 5.0, 0.0, 5.0)).await.unwrap();
    b.handle_position(Position::new("B", 6.0, 0.0, 6.0)).await.unwrap();
    a.active_topics().await.unwrap();

    b.close().await;

    let left = wait_for(&mut a_client, Duration::from_secs(1), |m| {
        matches!(m, ServerMessage::PlayerLeft { player_id } if player_id == "B")
    })
    .await;
    assert!(left.is_some());

    a.close().await;
    runtime.shutdown().await;
}
