//! Producer/consumer soak harness.
//!
//! Drives one [`FrameTimeline`] the way an acquisition pipeline does: a
//! producer task creates, fills and pushes a frame every
//! `producer_period_ms`, while a consumer task looks up the closest frame
//! every `consumer_period_ms` and reads it through a buffer lock. Every frame
//! is filled with a single byte value, so a torn read is detected.
//!
//! Frame work may block on dump files, so it runs on the blocking pool and the
//! async tasks only keep time.

use crate::config::TimelineConfig;
use anyhow::{ensure, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tl_core::{
    BufferManager, BufferStats, Direction, FrameTimeline, PoolStats, TimelineBuffer, Timestamp,
};
use tokio::task::spawn_blocking;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Counters gathered by [`run_soak`].
#[derive(Debug, Clone, Serialize)]
pub struct SoakReport {
    /// Frames pushed by the producer
    pub frames_pushed: u64,
    /// Lookups issued by the consumer
    pub queries: u64,
    /// Lookups that found a frame
    pub hits: u64,
    /// Lookups on an empty timeline
    pub misses: u64,
    /// Payload bytes read by the consumer
    pub bytes_read: u64,
    /// Entries left in the timeline
    pub final_len: usize,
    /// Chunk pool counters at the end of the run
    pub pool: Option<PoolStats>,
    /// Buffer manager figures at the end of the run
    pub memory: BufferStats,
}

#[derive(Debug, Default)]
struct ConsumerCounters {
    queries: u64,
    hits: u64,
    misses: u64,
    bytes_read: u64,
}

/// Run the producer and consumer against a fresh frame timeline for `duration`.
pub async fn run_soak(
    config: &TimelineConfig,
    manager: Arc<BufferManager>,
    duration: Duration,
) -> Result<SoakReport> {
    let section = &config.timeline;
    let timeline = Arc::new(FrameTimeline::with_manager(Arc::clone(&manager)));
    timeline.set_maximum_size(section.maximum_size);
    timeline
        .init_pool_size(section.width, section.height, section.pixel_type, section.components)
        .context("configuring frame timeline")?;

    info!(
        width = section.width,
        height = section.height,
        components = section.components,
        pixel_type = %section.pixel_type,
        maximum_size = section.maximum_size,
        policy = %manager.dump_policy(),
        duration_ms = duration.as_millis() as u64,
        "soak started"
    );

    let deadline = Instant::now() + duration;
    let producer = tokio::spawn(produce(
        Arc::clone(&timeline),
        Duration::from_millis(config.soak.producer_period_ms),
        deadline,
    ));
    let consumer = tokio::spawn(consume(
        Arc::clone(&timeline),
        Duration::from_millis(config.soak.consumer_period_ms),
        deadline,
    ));

    let (produced, consumed) = tokio::join!(producer, consumer);
    let frames_pushed = produced.context("producer task panicked")??;
    let counters = consumed.context("consumer task panicked")??;

    let report = SoakReport {
        frames_pushed,
        queries: counters.queries,
        hits: counters.hits,
        misses: counters.misses,
        bytes_read: counters.bytes_read,
        final_len: timeline.len(),
        pool: timeline.pool_stats(),
        memory: manager.buffer_stats(),
    };
    info!(
        frames_pushed = report.frames_pushed,
        hits = report.hits,
        misses = report.misses,
        dumped = report.memory.total_dumped,
        "soak finished"
    );
    Ok(report)
}

async fn produce(timeline: Arc<FrameTimeline>, period: Duration, deadline: Instant) -> Result<u64> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut pushed = 0u64;

    loop {
        ticker.tick().await;
        if Instant::now() >= deadline {
            break;
        }

        let value = (pushed % 251) as u8;
        let target = Arc::clone(&timeline);
        spawn_blocking(move || -> Result<()> {
            let mut frame = target.create_buffer(Timestamp::now())?;
            frame.fill(value)?;
            target.push_object(Arc::new(frame));
            Ok(())
        })
        .await
        .context("producer frame task panicked")??;
        pushed += 1;

        if pushed % 1000 == 0 {
            debug!(pushed, len = timeline.len(), "producer progress");
        }
    }
    Ok(pushed)
}

async fn consume(
    timeline: Arc<FrameTimeline>,
    period: Duration,
    deadline: Instant,
) -> Result<ConsumerCounters> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut counters = ConsumerCounters::default();

    loop {
        ticker.tick().await;
        if Instant::now() >= deadline {
            break;
        }

        counters.queries += 1;
        let source = Arc::clone(&timeline);
        let read = spawn_blocking(move || {
            source
                .get_closest_object(Timestamp::now(), Direction::Past)
                .map(|frame| read_frame(&frame))
                .transpose()
        })
        .await
        .context("consumer read task panicked")??;
        match read {
            Some(bytes) => {
                counters.bytes_read += bytes;
                counters.hits += 1;
            }
            None => counters.misses += 1,
        }
    }
    Ok(counters)
}

/// Read a whole frame under its lock and check it is uniformly filled.
fn read_frame(frame: &TimelineBuffer) -> Result<u64> {
    let payload = frame.lock()?;
    let first = payload.first().copied().unwrap_or_default();
    ensure!(
        payload.iter().all(|&byte| byte == first),
        "frame at {} was modified while published",
        frame.timestamp()
    );
    Ok(payload.len() as u64)
}
