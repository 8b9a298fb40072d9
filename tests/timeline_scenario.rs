//! Cross-crate scenarios: frame and element timelines backed by a shared
//! buffer manager, with dumping to disk in between.

use rust_timeline::tl_core::limits::DEFAULT_MAXIMUM_SIZE;
use rust_timeline::{
    BufferManager, Direction, DumpPolicy, ElementTimeline, FrameTimeline, PixelType, Timeline,
    TimelineBuffer, Timestamp,
};
use serial_test::serial;
use std::sync::Arc;

const T1: f64 = 1_700_000_000_000.0;

fn frame_timeline() -> (tempfile::TempDir, Arc<BufferManager>, FrameTimeline) {
    let dir = tempfile::tempdir().unwrap();
    let manager = BufferManager::with_dump_dir(dir.path());
    let timeline = FrameTimeline::with_manager(Arc::clone(&manager));
    timeline.init_pool_size(10, 20, PixelType::U8, 3).unwrap();
    (dir, manager, timeline)
}

fn push_filled(timeline: &FrameTimeline, millis: f64, value: u8) -> Arc<TimelineBuffer> {
    let mut frame = timeline.create_buffer(Timestamp::from_millis(millis)).unwrap();
    frame.fill(value).unwrap();
    let frame = Arc::new(frame);
    timeline.push_object(Arc::clone(&frame));
    frame
}

#[test]
fn frame_push_lookup_and_clear() {
    let (_dir, _manager, timeline) = frame_timeline();
    assert_eq!(timeline.maximum_size(), DEFAULT_MAXIMUM_SIZE);

    let pushed_first = push_filled(&timeline, T1, 1);
    let pushed_second = push_filled(&timeline, T1 + 42.0, 2);

    let first = timeline.get_object(Timestamp::from_millis(T1)).unwrap();
    assert!(Arc::ptr_eq(&first, &pushed_first));
    let second = timeline.get_object(Timestamp::from_millis(T1 + 42.0)).unwrap();
    assert!(Arc::ptr_eq(&second, &pushed_second));

    let near_first = timeline
        .get_closest_object(Timestamp::from_millis(T1 + 1.5), Direction::default())
        .unwrap();
    assert!(Arc::ptr_eq(&near_first, &pushed_first));
    {
        let pixels = first.lock().unwrap();
        assert_eq!(pixels.len(), 600);
        assert_eq!(pixels[0], 1);
        assert_eq!(pixels[300], 1);
        assert_eq!(pixels[599], 1);
    }

    assert_eq!(timeline.get_newer_timestamp(), Some(Timestamp::from_millis(T1 + 42.0)));
    assert!(Arc::ptr_eq(&timeline.get_newer_object().unwrap(), &pushed_second));

    let closest = timeline
        .get_closest_object(Timestamp::from_millis(T1 + 30.0), Direction::Both)
        .unwrap();
    assert_eq!(closest.timestamp(), Timestamp::from_millis(T1 + 42.0));

    timeline.clear_timeline();
    assert!(timeline.is_empty());
    assert!(timeline.get_newer_object().is_none());
    // The consumer's handle outlives the clear
    assert_eq!(first.lock().unwrap()[599], 1);
}

#[test]
fn idle_frames_are_dumped_and_restored() {
    let (_dir, manager, timeline) = frame_timeline();
    for i in 0..4u8 {
        push_filled(&timeline, T1 + f64::from(i), i + 10);
    }
    assert_eq!(manager.buffer_stats().total_managed, 4 * 600);

    manager.set_dump_policy(DumpPolicy::barrier(1200));
    let stats = manager.buffer_stats();
    assert_eq!(stats.total_dumped, 1200);
    assert!(stats.total_resident() <= 1200);

    // The two oldest frames went to disk first
    let oldest = timeline.get_object(Timestamp::from_millis(T1)).unwrap();
    assert!(oldest.is_dumped());
    assert_eq!(oldest.lock().unwrap()[123], 10);
    assert!(!oldest.is_dumped());
    assert!(manager.buffer_stats().total_resident() <= 1200);

    manager.set_dump_policy(DumpPolicy::Never);
    for i in 0..4u8 {
        let frame = timeline.get_object(Timestamp::from_millis(T1 + f64::from(i))).unwrap();
        assert!(frame.lock().unwrap().iter().all(|&b| b == i + 10));
    }
}

#[test]
fn capacity_evicts_and_returns_chunks() {
    let (_dir, manager, timeline) = frame_timeline();
    timeline.set_maximum_size(3);
    for i in 0..10u8 {
        push_filled(&timeline, T1 + f64::from(i), i);
    }

    assert_eq!(timeline.len(), 3);
    assert_eq!(
        timeline.timestamps(),
        (7..10).map(|i| Timestamp::from_millis(T1 + f64::from(i))).collect::<Vec<_>>()
    );
    let pool = timeline.pool_stats().unwrap();
    assert_eq!(pool.outstanding, 3);
    assert!(pool.reused > 0);
    assert_eq!(manager.len(), 3);
}

#[test]
fn deep_copy_across_managers() {
    let (_dir, _manager, source) = frame_timeline();
    push_filled(&source, T1, 3);
    push_filled(&source, T1 + 1.0, 4);

    let other_dir = tempfile::tempdir().unwrap();
    let other = BufferManager::with_dump_dir(other_dir.path());
    let copy = Timeline::with_manager(Arc::clone(&other));
    copy.deep_copy(&source).unwrap();

    assert_eq!(&copy, source.timeline());
    assert_eq!(other.len(), 2);
    assert_eq!(copy.get_object(Timestamp::from_millis(T1 + 1.0)).unwrap().lock().unwrap()[0], 4);
}

#[test]
fn element_presence_survives_dump() {
    let dir = tempfile::tempdir().unwrap();
    let manager = BufferManager::with_dump_dir(dir.path());
    let timeline = ElementTimeline::<[f64; 3]>::with_manager(Arc::clone(&manager));
    timeline.init_pool_size(4).unwrap();

    let mut markers = timeline.create_buffer(Timestamp::from_millis(T1)).unwrap();
    markers.set_element([1.0, 2.0, 3.0], 1).unwrap();
    markers.set_element([4.0, 5.0, 6.0], 3).unwrap();
    timeline.push_buffer(markers);

    manager.set_dump_policy(DumpPolicy::Always);
    let found = timeline.get_newer_object().unwrap();
    assert!(found.is_dumped());

    let reader = timeline.read(&found).unwrap();
    assert_eq!(reader.present_element_num(), 2);
    assert_eq!(
        reader.present_elements().collect::<Vec<_>>(),
        vec![(1, [1.0, 2.0, 3.0]), (3, [4.0, 5.0, 6.0])]
    );
    assert_eq!(reader.element(0), [0.0; 3]);
}

#[test]
#[serial]
fn default_timelines_share_global_manager() {
    let timeline = FrameTimeline::new();
    assert!(Arc::ptr_eq(timeline.manager(), BufferManager::global()));
    timeline.init_pool_size(2, 2, PixelType::U8, 1).unwrap();

    let before = BufferManager::global().len();
    let frame = timeline.create_buffer(Timestamp::now()).unwrap();
    assert_eq!(BufferManager::global().len(), before + 1);
    drop(frame);
    assert_eq!(BufferManager::global().len(), before);
}
