//! Queue ordering, readiness, idempotency, and preemption properties

use chrono::{Duration, Utc};
use nalgae::models::{Post, PostMetadata, PriorityClass};
use nalgae::platform::Platform;
use nalgae::queue::{PriorityQueue, QueueError};
use proptest::prelude::*;

fn post(priority: PriorityClass) -> Post {
    Post::new(
        "/media/clip.mp4",
        PostMetadata::default(),
        vec![Platform::Youtube],
        priority,
    )
}

// ============================================================================
// Ordering and readiness
// ============================================================================

#[tokio::test]
async fn dequeue_never_returns_future_scheduled_posts() {
    let queue = PriorityQueue::new();

    for offset_mins in [5, 30, 120] {
        let p = post(PriorityClass::Breaking)
            .with_schedule(Utc::now() + Duration::minutes(offset_mins));
        queue.enqueue(p).await.unwrap();
    }

    assert!(queue.dequeue_ready().await.is_none());
    assert_eq!(queue.len().await, 3);
}

#[tokio::test]
async fn eligible_posts_come_out_in_priority_then_time_then_fifo_order() {
    let queue = PriorityQueue::new();
    let base = Utc::now() - Duration::hours(1);

    // Insertion order deliberately scrambled
    let scheduled = post(PriorityClass::Scheduled).with_schedule(base);
    let normal_late = post(PriorityClass::Normal).with_schedule(base + Duration::minutes(30));
    let normal_early = post(PriorityClass::Normal).with_schedule(base);
    let urgent_a = post(PriorityClass::Urgent).with_schedule(base);
    let urgent_b = post(PriorityClass::Urgent).with_schedule(base);
    let breaking = post(PriorityClass::Breaking);

    let expected = [
        breaking.id.clone(),
        urgent_a.id.clone(),
        urgent_b.id.clone(),
        normal_early.id.clone(),
        normal_late.id.clone(),
        scheduled.id.clone(),
    ];

    for p in [scheduled, normal_late, urgent_a, normal_early, urgent_b, breaking] {
        queue.enqueue(p).await.unwrap();
    }

    // urgent_a and urgent_b share priority and schedule time; insertion
    // order breaks the tie
    let mut order = Vec::new();
    while let Some((p, _token)) = queue.dequeue_ready().await {
        order.push(p.id.clone());
        queue.complete(&p.id).await;
    }
    assert_eq!(order, expected);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Among all-eligible posts, dequeue order always matches the sorted
    /// (priority, effective time, insertion order) tuple
    #[test]
    fn dequeue_order_matches_sort_key(entries in prop::collection::vec((0u8..4, 0i64..3600), 1..20)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async {
            let queue = PriorityQueue::new();
            let base = Utc::now() - Duration::hours(2);
            let mut expected: Vec<(u8, i64, usize, String)> = Vec::new();

            for (seq, (priority_raw, offset_secs)) in entries.iter().enumerate() {
                let priority = match priority_raw {
                    0 => PriorityClass::Breaking,
                    1 => PriorityClass::Urgent,
                    2 => PriorityClass::Normal,
                    _ => PriorityClass::Scheduled,
                };
                let at = base + Duration::seconds(*offset_secs);
                let p = post(priority).with_schedule(at);
                expected.push((*priority_raw, *offset_secs, seq, p.id.clone()));
                queue.enqueue(p).await.unwrap();
            }

            expected.sort();

            let mut actual = Vec::new();
            while let Some((p, _token)) = queue.dequeue_ready().await {
                actual.push(p.id.clone());
                queue.complete(&p.id).await;
            }

            let expected_ids: Vec<String> = expected.into_iter().map(|e| e.3).collect();
            prop_assert_eq!(actual, expected_ids);
            Ok(())
        })?;
    }
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn duplicate_enqueue_is_a_noop() {
    let queue = PriorityQueue::new();
    let p = post(PriorityClass::Normal);

    queue.enqueue(p.clone()).await.unwrap();
    let before = queue.len().await;

    let second = queue.enqueue(p).await;
    assert!(matches!(second, Err(QueueError::Duplicate(_))));
    assert_eq!(queue.len().await, before);

    // Exactly one dispatch comes out
    assert!(queue.dequeue_ready().await.is_some());
    assert!(queue.dequeue_ready().await.is_none());
}

// ============================================================================
// Preemption
// ============================================================================

#[tokio::test]
async fn preempted_post_reappears_exactly_once() {
    let queue = PriorityQueue::new();

    queue.enqueue(post(PriorityClass::Normal)).await.unwrap();
    let (dispatched, token) = queue.dequeue_ready().await.unwrap();
    let original_id = dispatched.id.clone();

    let signalled = queue.preempt("breaking-post").await;
    assert_eq!(signalled, 1);
    assert!(token.is_cancelled());

    assert!(queue.requeue_preempted(dispatched.clone()).await);
    assert!(!queue.requeue_preempted(dispatched).await);

    let (reappeared, _token) = queue.dequeue_ready().await.unwrap();
    assert_eq!(reappeared.id, original_id);
    assert_eq!(reappeared.attempts, 1);
    assert!(queue.dequeue_ready().await.is_none());
}

#[tokio::test]
async fn two_simultaneous_breaking_posts_both_preempt_in_insertion_order() {
    let queue = PriorityQueue::new();

    queue.enqueue(post(PriorityClass::Normal)).await.unwrap();
    let (_, normal_token) = queue.dequeue_ready().await.unwrap();

    let breaking_a = post(PriorityClass::Breaking);
    let breaking_b = post(PriorityClass::Breaking);
    let first_id = breaking_a.id.clone();
    let second_id = breaking_b.id.clone();

    queue.enqueue(breaking_a).await.unwrap();
    queue.enqueue(breaking_b).await.unwrap();

    // Both preempt; relative order between them is insertion order
    let (first, _t1) = queue.dequeue_ready().await.unwrap();
    queue.preempt(&first.id).await;
    let (second, _t2) = queue.dequeue_ready().await.unwrap();
    queue.preempt(&second.id).await;

    assert_eq!(first.id, first_id);
    assert_eq!(second.id, second_id);
    assert!(normal_token.is_cancelled());
}

#[tokio::test]
async fn breaking_posts_are_not_cancelled_by_preemption() {
    let queue = PriorityQueue::new();

    queue.enqueue(post(PriorityClass::Breaking)).await.unwrap();
    let (breaking, breaking_token) = queue.dequeue_ready().await.unwrap();

    queue.enqueue(post(PriorityClass::Normal)).await.unwrap();
    let (_, normal_token) = queue.dequeue_ready().await.unwrap();

    queue.preempt("another-breaking").await;

    assert!(normal_token.is_cancelled());
    assert!(!breaking_token.is_cancelled());
    queue.complete(&breaking.id).await;
}
