//! The consumer: a pump thread pulling frames from the connected producer.
//!
//! Lifecycle is `Stopped → Starting → Running → Stopping → Stopped`. The
//! pump pulls a frame, stops at end of stream, forces image and audio
//! evaluation and hands the result on. With `real_time = 0` the pump also
//! presents; otherwise a presentation thread takes frames from a bounded
//! queue. Presentation sleeps until each frame is due and, away from unit
//! speed, drops frames that are already too late.
//!
//! While the producer is paused the pump presents the current frame once
//! and blocks until [`Consumer::refresh`] or [`Consumer::stop`].

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use weft_core::{
    defaults, AudioRequest, Frame, ImageRequest, Profile, Result, SharedProfile, SharedResource,
    WeftError,
};
use weft_timeline::{Producer, Service, ServiceBase, ServiceKind, EOS};

use crate::config::ConsumerConfig;
use crate::output::{OutputClaim, OutputDevice};
use crate::pacing::Pacer;
use crate::queue::FrameQueue;
use crate::sink::{Rendered, Sink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsumerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// A rendered frame on its way to presentation.
struct Pending {
    rendered: Rendered,
    speed: f64,
    resync: bool,
}

/// State shared with the worker threads.
struct Shared {
    name: String,
    state: Mutex<ConsumerState>,
    state_changed: Condvar,
    running: AtomicBool,
    queue: Mutex<Option<Arc<FrameQueue<Pending>>>>,
    refresh: Mutex<bool>,
    refresh_changed: Condvar,
    wake: Mutex<()>,
    woken: Condvar,
    resync: AtomicBool,
    sink: Mutex<Box<dyn Sink>>,
    claim: Mutex<Option<OutputClaim>>,
    live_workers: AtomicUsize,
    presented: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn set_state(&self, state: &mut ConsumerState, next: ConsumerState) {
        debug!(consumer = %self.name, from = %state, to = %next, "Consumer state");
        *state = next;
        self.state_changed.notify_all();
    }

    /// Block until a refresh is requested or the consumer stops.
    fn wait_for_refresh(&self) {
        let mut pending = self.refresh.lock();
        while !*pending && self.is_running() {
            self.refresh_changed.wait(&mut pending);
        }
        *pending = false;
    }

    fn request_refresh(&self) {
        *self.refresh.lock() = true;
        self.refresh_changed.notify_all();
    }

    /// Sleep until `deadline` in steps of at most `MAX_PACING_SLEEP`.
    /// Returns `false` when woken by a stop.
    fn sleep_until(&self, deadline: Instant) -> bool {
        let mut guard = self.wake.lock();
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let step = (deadline - now).min(defaults::MAX_PACING_SLEEP);
            self.woken.wait_for(&mut guard, step);
        }
        false
    }

    /// Wake every thread blocked on the queue, the refresh condition or a
    /// pacing sleep. `running` must already be cleared.
    fn wake_all(&self) {
        if let Some(queue) = self.queue.lock().as_ref() {
            queue.close();
        }
        {
            let _pending = self.refresh.lock();
            self.refresh_changed.notify_all();
        }
        let _guard = self.wake.lock();
        self.woken.notify_all();
    }

    /// The last worker to exit on its own finishes the stop.
    fn worker_exited(&self) {
        if self.live_workers.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let mut state = self.state.lock();
        if matches!(*state, ConsumerState::Running | ConsumerState::Starting) {
            self.running.store(false, Ordering::Release);
            self.sink.lock().close();
            self.claim.lock().take();
            self.set_state(&mut state, ConsumerState::Stopped);
            info!(consumer = %self.name, "Consumer stopped on its own");
        }
    }
}

#[derive(Default)]
struct ExitSignal {
    finished: Mutex<bool>,
    changed: Condvar,
}

/// Runs on worker exit, panics included.
struct ExitGuard {
    shared: Arc<Shared>,
    signal: Arc<ExitSignal>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.shared.worker_exited();
        *self.signal.finished.lock() = true;
        self.signal.changed.notify_all();
    }
}

struct Worker {
    name: String,
    handle: JoinHandle<()>,
    signal: Arc<ExitSignal>,
}

impl Worker {
    fn spawn(name: String, shared: &Arc<Shared>, body: impl FnOnce() + Send + 'static) -> Result<Self> {
        let signal = Arc::new(ExitSignal::default());
        let guard = ExitGuard {
            shared: shared.clone(),
            signal: signal.clone(),
        };
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let _guard = guard;
            body();
        })?;
        Ok(Self {
            name,
            handle,
            signal,
        })
    }

    /// Join, giving up after `timeout`. A thread that does not exit in time
    /// is detached.
    fn join(self, timeout: Duration) {
        if self.handle.thread().id() == thread::current().id() {
            warn!(thread = %self.name, "Consumer stopped from its own worker, detaching");
            return;
        }
        let deadline = Instant::now() + timeout;
        let finished = {
            let mut finished = self.signal.finished.lock();
            while !*finished {
                if self.signal.changed.wait_until(&mut finished, deadline).timed_out() {
                    break;
                }
            }
            *finished
        };
        if !finished {
            warn!(thread = %self.name, ?timeout, "Worker did not exit in time, detaching");
            return;
        }
        if self.handle.join().is_err() {
            warn!(thread = %self.name, "Worker panicked");
        }
    }
}

/// Pulls frames from its producer and presents them to a [`Sink`].
pub struct Consumer {
    base: ServiceBase,
    shared: Arc<Shared>,
    workers: Mutex<Vec<Worker>>,
    output: Mutex<Option<SharedResource<OutputDevice>>>,
    control: Mutex<()>,
}

impl Consumer {
    pub fn new(profile: SharedProfile, sink: impl Sink) -> Self {
        let name = sink.name().to_owned();
        let base = ServiceBase::new(ServiceKind::Consumer, &name, profile);
        ConsumerConfig::default().apply(base.properties());
        Self {
            base,
            shared: Arc::new(Shared {
                name,
                state: Mutex::new(ConsumerState::Stopped),
                state_changed: Condvar::new(),
                running: AtomicBool::new(false),
                queue: Mutex::new(None),
                refresh: Mutex::new(false),
                refresh_changed: Condvar::new(),
                wake: Mutex::new(()),
                woken: Condvar::new(),
                resync: AtomicBool::new(false),
                sink: Mutex::new(Box::new(sink)),
                claim: Mutex::new(None),
                live_workers: AtomicUsize::new(0),
                presented: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            workers: Mutex::new(Vec::new()),
            output: Mutex::new(None),
            control: Mutex::new(()),
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.shared.state.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ConsumerState::Stopped
    }

    pub fn config(&self) -> ConsumerConfig {
        ConsumerConfig::from_properties(self.properties())
    }

    /// Takes effect on the next `start`.
    pub fn set_config(&self, config: &ConsumerConfig) {
        config.apply(self.properties());
    }

    /// Present through an exclusive output. Each `start` claims it and fails
    /// with a resource error while another consumer holds it.
    pub fn set_output(&self, output: SharedResource<OutputDevice>) {
        *self.output.lock() = Some(output);
    }

    /// Frames handed to the sink since the last start.
    pub fn frames_presented(&self) -> u64 {
        self.shared.presented.load(Ordering::Relaxed)
    }

    /// Late frames dropped since the last start.
    pub fn frames_dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Start the worker threads. Does nothing when already running.
    pub fn start(&self) -> Result<()> {
        let _control = self.control.lock();
        let producer = self
            .base
            .upstream()
            .ok_or_else(|| WeftError::Consumer("No producer connected".into()))?;
        {
            let mut state = self.shared.state.lock();
            if *state != ConsumerState::Stopped {
                return Ok(());
            }
        }
        let claim = match self.output.lock().as_ref() {
            Some(output) => Some(OutputClaim::take(output, &self.id().to_string())?),
            None => None,
        };
        *self.shared.claim.lock() = claim;
        {
            let mut state = self.shared.state.lock();
            self.shared.set_state(&mut state, ConsumerState::Starting);
        }
        self.reap();

        let config = self.config();
        let threaded = config.real_time != 0;
        let queue = Arc::new(FrameQueue::new(config.buffer));
        *self.shared.queue.lock() = Some(queue.clone());
        *self.shared.refresh.lock() = false;
        self.shared.resync.store(false, Ordering::Release);
        self.shared.presented.store(0, Ordering::Relaxed);
        self.shared.dropped.store(0, Ordering::Relaxed);
        self.shared.running.store(true, Ordering::Release);
        self.shared
            .live_workers
            .store(if threaded { 2 } else { 1 }, Ordering::Release);
        {
            let mut state = self.shared.state.lock();
            self.shared.set_state(&mut state, ConsumerState::Running);
        }
        info!(
            consumer = %self.shared.name,
            producer = producer.service_name(),
            real_time = config.real_time,
            paced = config.paced,
            "Consumer started"
        );

        let presenter = Presenter {
            shared: self.shared.clone(),
            pacer: Pacer::new(self.profile().frame_rate),
            paced: config.paced,
        };
        if let Err(e) = self.spawn_workers(producer, config, queue, presenter) {
            warn!(consumer = %self.shared.name, error = %e, "Could not spawn consumer thread");
            drop(_control);
            self.stop()?;
            return Err(e);
        }
        Ok(())
    }

    fn spawn_workers(
        &self,
        producer: Producer,
        config: ConsumerConfig,
        queue: Arc<FrameQueue<Pending>>,
        presenter: Presenter,
    ) -> Result<()> {
        let inline = if config.real_time != 0 {
            let queue = queue.clone();
            let worker = Worker::spawn(
                format!("weft-{}-present", self.shared.name),
                &self.shared,
                move || presenter.run(&queue),
            )?;
            self.workers.lock().push(worker);
            None
        } else {
            Some(presenter)
        };
        let shared = self.shared.clone();
        let worker = Worker::spawn(
            format!("weft-{}-pump", self.shared.name),
            &self.shared,
            move || pump(&shared, &producer, &config, &queue, inline),
        )?;
        self.workers.lock().push(worker);
        Ok(())
    }

    /// Stop the workers: clear the running flag, wake every wait, join each
    /// thread with a timeout and close the sink.
    pub fn stop(&self) -> Result<()> {
        let _control = self.control.lock();
        {
            let mut state = self.shared.state.lock();
            if *state == ConsumerState::Stopped {
                drop(state);
                self.reap();
                return Ok(());
            }
            self.shared.set_state(&mut state, ConsumerState::Stopping);
        }
        self.shared.running.store(false, Ordering::Release);
        self.shared.wake_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            worker.join(defaults::JOIN_TIMEOUT);
        }
        if let Some(queue) = self.shared.queue.lock().as_ref() {
            queue.purge(0);
        }
        self.shared.sink.lock().close();
        self.shared.claim.lock().take();

        let mut state = self.shared.state.lock();
        self.shared.set_state(&mut state, ConsumerState::Stopped);
        info!(
            consumer = %self.shared.name,
            presented = self.frames_presented(),
            dropped = self.frames_dropped(),
            "Consumer stopped"
        );
        Ok(())
    }

    /// Join workers that already exited on their own.
    fn reap(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            worker.join(defaults::JOIN_TIMEOUT);
        }
    }

    /// Block until stopped or `timeout` passes. Returns whether it stopped.
    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while *state != ConsumerState::Stopped {
            if self
                .shared
                .state_changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return *state == ConsumerState::Stopped;
            }
        }
        true
    }

    /// Drop queued frames after a seek. One frame is kept when the producer
    /// is not at unit speed so scrubbing still shows something.
    pub fn purge(&self) {
        let speed = self.base.upstream().map_or(1.0, |p| p.speed());
        let keep = usize::from(speed != 1.0);
        if let Some(queue) = self.shared.queue.lock().as_ref() {
            let dropped = queue.purge(keep);
            debug!(consumer = %self.shared.name, dropped, keep, "Queue purged");
        }
        self.shared.resync.store(true, Ordering::Release);
    }

    /// Wake a paused pump so it renders the current frame again.
    pub fn refresh(&self) {
        self.shared.request_refresh();
    }
}

impl Service for Consumer {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    /// The next frame of the connected producer.
    fn get_frame(&self, _index: usize) -> Result<Frame> {
        self.base
            .upstream()
            .ok_or_else(|| WeftError::Consumer("No producer connected".into()))?
            .get_frame()
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("service", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(consumer = %self.shared.name, error = %e, "Consumer failed to stop on drop");
        }
    }
}

struct Presenter {
    shared: Arc<Shared>,
    pacer: Pacer,
    paced: bool,
}

impl Presenter {
    fn run(mut self, queue: &FrameQueue<Pending>) {
        debug!(consumer = %self.shared.name, "Presentation started");
        while let Some(pending) = queue.pop() {
            if !self.shared.is_running() {
                break;
            }
            self.present(pending);
        }
        debug!(consumer = %self.shared.name, "Presentation finished");
    }

    fn present(&mut self, pending: Pending) {
        let position = pending.rendered.position;
        if pending.resync {
            self.pacer.reset();
        }
        if self.paced {
            let now = Instant::now();
            let due = self.pacer.due(now);
            if now < due {
                if !self.shared.sleep_until(due) {
                    return;
                }
            } else if pending.speed != 1.0
                && pending.speed != 0.0
                && now - due > defaults::LATE_FRAME_THRESHOLD
            {
                self.pacer.advance();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(position, late = ?(now - due), "Late frame dropped");
                return;
            }
            self.pacer.advance();
        }
        if let Err(e) = self.shared.sink.lock().render(pending.rendered) {
            warn!(consumer = %self.shared.name, position, error = %e, "Sink rejected frame");
        }
        self.shared.presented.fetch_add(1, Ordering::Relaxed);
    }
}

/// Force evaluation. Frames without an image source render no image.
fn evaluate(mut frame: Frame, config: &ConsumerConfig, profile: &Profile) -> Rendered {
    let position = frame.position();
    let image = if !config.video_off && (frame.has_image() || frame.is_test_image()) {
        let request = ImageRequest::new(config.format, config.width, config.height);
        frame.get_image(&request).ok()
    } else {
        None
    };
    let audio = if !config.audio_off && (frame.has_audio() || frame.is_test_audio()) {
        let request = AudioRequest::for_position(
            profile.frame_rate,
            config.frequency,
            config.channels,
            position,
        );
        frame.get_audio(&request).ok()
    } else {
        None
    };
    trace!(position, "Frame evaluated");
    Rendered {
        position,
        image,
        audio,
    }
}

fn pump(
    shared: &Shared,
    producer: &Producer,
    config: &ConsumerConfig,
    queue: &FrameQueue<Pending>,
    mut inline: Option<Presenter>,
) {
    let profile = producer.profile().clone();
    let mut resync = true;
    debug!(consumer = %shared.name, "Pump started");
    while shared.is_running() {
        let frame = match producer.get_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(consumer = %shared.name, error = %e, "Could not pull a frame, stopping");
                break;
            }
        };
        if frame.properties().get_bool(EOS) {
            info!(consumer = %shared.name, position = frame.position(), "End of stream");
            break;
        }
        let speed = producer.speed();
        let pending = Pending {
            rendered: evaluate(frame, config, &profile),
            speed,
            resync: resync | shared.resync.swap(false, Ordering::AcqRel),
        };
        resync = false;
        match inline.as_mut() {
            Some(presenter) => presenter.present(pending),
            None => {
                if queue.push(pending).is_err() {
                    break;
                }
            }
        }
        if speed == 0.0 {
            if config.terminate_on_pause {
                info!(consumer = %shared.name, "Producer paused, terminating");
                break;
            }
            trace!(consumer = %shared.name, "Paused, waiting for refresh");
            shared.wait_for_refresh();
            resync = true;
        }
    }
    queue.close();
    debug!(consumer = %shared.name, "Pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{CollectSink, NullSink};
    use weft_core::{FrameRate, Position};
    use weft_effects::Colour;
    use weft_timeline::EofPolicy;

    fn profile() -> SharedProfile {
        Profile::preview(8, 6, FrameRate::new(100, 1)).shared()
    }

    fn clip(length: Position) -> Producer {
        let p = Colour::producer(profile(), Some("red")).unwrap();
        p.set_in_and_out(0, length - 1).unwrap();
        p
    }

    fn consumer(sink: &CollectSink, real_time: i32, paced: bool) -> Consumer {
        let consumer = Consumer::new(profile(), sink.clone());
        consumer.set_config(&ConsumerConfig {
            real_time,
            paced,
            ..ConsumerConfig::default()
        });
        consumer
    }

    #[test]
    fn test_start_without_producer_fails() {
        let consumer = Consumer::new(profile(), NullSink::new());
        assert!(consumer.start().is_err());
        assert!(consumer.is_stopped());
    }

    #[test]
    fn test_plays_to_end_of_stream() {
        for real_time in [0, 1] {
            let sink = CollectSink::new();
            let consumer = consumer(&sink, real_time, false);
            let p = clip(10);
            p.set_eof_policy(EofPolicy::Terminate);
            consumer.connect_producer(&p).unwrap();
            consumer.start().unwrap();
            assert!(consumer.wait_until_stopped(Duration::from_secs(5)));
            assert_eq!(sink.positions(), (0..10).collect::<Vec<_>>());
            assert!(sink.presented().iter().all(|f| f.has_image && f.has_audio));
            assert_eq!(sink.close_count(), 1);
            assert_eq!(consumer.frames_presented(), 10);
        }
    }

    #[test]
    fn test_start_is_idempotent_and_stop_joins() {
        let sink = CollectSink::new();
        let consumer = consumer(&sink, 1, true);
        let p = clip(1000);
        consumer.connect_producer(&p).unwrap();
        consumer.start().unwrap();
        consumer.start().unwrap();
        assert_eq!(consumer.state(), ConsumerState::Running);
        thread::sleep(Duration::from_millis(50));
        consumer.stop().unwrap();
        assert!(consumer.is_stopped());
        assert!(consumer.workers.lock().is_empty());
        let seen = sink.len();
        assert!(seen > 0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.len(), seen);
        consumer.stop().unwrap();
    }

    #[test]
    fn test_terminate_on_pause() {
        let sink = CollectSink::new();
        let consumer = consumer(&sink, 0, false);
        consumer.properties().set_int("terminate_on_pause", 1);
        let p = clip(5);
        consumer.connect_producer(&p).unwrap();
        consumer.start().unwrap();
        assert!(consumer.wait_until_stopped(Duration::from_secs(5)));
        assert_eq!(sink.positions(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_paused_waits_for_refresh() {
        let sink = CollectSink::new();
        let consumer = consumer(&sink, 1, false);
        let p = clip(3);
        consumer.connect_producer(&p).unwrap();
        consumer.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(sink.positions(), vec![0, 1, 2]);
        assert_eq!(consumer.state(), ConsumerState::Running);

        consumer.refresh();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(sink.positions(), vec![0, 1, 2, 2]);
        consumer.stop().unwrap();
    }

    #[test]
    fn test_pacing_follows_frame_rate() {
        let sink = CollectSink::new();
        let consumer = consumer(&sink, 1, true);
        let p = clip(10);
        p.set_eof_policy(EofPolicy::Terminate);
        consumer.connect_producer(&p).unwrap();
        consumer.start().unwrap();
        assert!(consumer.wait_until_stopped(Duration::from_secs(5)));
        let presented = sink.presented();
        assert_eq!(presented.len(), 10);
        // 10 frames at 100 fps: nine frame intervals between first and last.
        let span = presented[9].at - presented[0].at;
        assert!(span >= Duration::from_millis(85), "{span:?}");
        assert!(span < Duration::from_millis(400), "{span:?}");
    }

    #[test]
    fn test_purge_resyncs() {
        let sink = CollectSink::new();
        let consumer = consumer(&sink, 1, true);
        let p = clip(1000);
        consumer.connect_producer(&p).unwrap();
        consumer.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        p.seek(500);
        consumer.purge();
        thread::sleep(Duration::from_millis(60));
        consumer.stop().unwrap();
        assert!(sink.positions().iter().any(|&p| p >= 500));
    }

    #[test]
    fn test_output_handed_between_consumers() {
        let output = crate::output::output_slot("display");
        let first = Consumer::new(profile(), NullSink::new());
        let second = Consumer::new(profile(), NullSink::new());
        for c in [&first, &second] {
            c.set_output(output.clone());
            c.connect_producer(&clip(1000)).unwrap();
        }
        first.start().unwrap();
        assert_eq!(output.owner(), Some(first.id().to_string()));
        assert!(matches!(second.start(), Err(WeftError::Resource(_))));
        assert!(second.is_stopped());
        first.stop().unwrap();
        assert!(output.owner().is_none());
        second.start().unwrap();
        assert_eq!(output.owner(), Some(second.id().to_string()));
        second.stop().unwrap();
        assert!(!output.is_live());
    }

    #[test]
    fn test_consumer_get_frame_pulls_upstream() {
        let consumer = Consumer::new(profile(), NullSink::new());
        let p = clip(4);
        consumer.connect_producer(&p).unwrap();
        assert_eq!(consumer.get_frame(0).unwrap().position(), 0);
        assert_eq!(consumer.get_frame(0).unwrap().position(), 1);
        assert_eq!(consumer.properties().get_string("service").as_deref(), Some("null"));
    }
}
