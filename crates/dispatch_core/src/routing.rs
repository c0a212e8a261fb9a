//! Routing oracle: the path/travel-time collaborator the executor defers to.
//!
//! Path lookup is treated as asynchronous. [`RoutingOracle::compute_path`] hands
//! back a [`PathFuture`] that the directive executor polls once per tick; a
//! synchronous oracle simply returns an already-resolved future.
//!
//! Implementations, selectable via [`OracleKind`]:
//!
//! - **`SyncOracle`**: runs a [`PathCalculator`] inline. Futures are ready immediately.
//! - **`ThreadedOracle`**: runs the calculator on the rayon pool. Futures resolve later.
//!
//! Either can wrap a [`CachedCalculator`] (LRU over time-independent path shapes).

use std::num::NonZeroUsize;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use bevy_ecs::prelude::Resource;
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::spatial::Location;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// One leg of a path: drive to `to`, taking `travel_time` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathSegment {
    pub to: Location,
    pub travel_time: f64,
}

/// A timed path between two locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub origin: Location,
    pub segments: Vec<PathSegment>,
    /// Departure time (simulation seconds).
    pub departure: f64,
    /// Arrival time at the last segment's end.
    pub arrival: f64,
    /// Driven distance in metres.
    pub distance_m: f64,
}

impl Path {
    /// A zero-length path that "arrives" at the moment it departs.
    pub fn stationary(at: Location, departure: f64) -> Self {
        Self {
            origin: at,
            segments: Vec::new(),
            departure,
            arrival: departure,
            distance_m: 0.0,
        }
    }

    pub fn destination(&self) -> Location {
        self.segments.last().map_or(self.origin, |s| s.to)
    }

    pub fn travel_time(&self) -> f64 {
        self.arrival - self.departure
    }

    /// Same shape, departing at `departure`.
    pub fn retimed(&self, departure: f64) -> Path {
        let shift = departure - self.departure;
        Path {
            origin: self.origin,
            segments: self.segments.clone(),
            departure,
            arrival: self.arrival + shift,
            distance_m: self.distance_m,
        }
    }

    /// Earliest point at or after `time` from which the path may be changed:
    /// the end of the segment being driven at `time`, and the moment it is reached.
    pub fn divertable_point(&self, time: f64) -> (Location, f64) {
        if time <= self.departure {
            return (self.origin, self.departure);
        }
        let mut clock = self.departure;
        for segment in &self.segments {
            clock += segment.travel_time;
            if clock >= time {
                return (segment.to, clock);
            }
        }
        (self.destination(), self.arrival)
    }

    /// Interpolated position at `time`, for reporting only.
    pub fn position_at(&self, time: f64) -> Location {
        if time <= self.departure {
            return self.origin;
        }
        let mut clock = self.departure;
        let mut from = self.origin;
        for segment in &self.segments {
            let end = clock + segment.travel_time;
            if time < end && segment.travel_time > 0.0 {
                return from.lerp(&segment.to, (time - clock) / segment.travel_time);
            }
            clock = end;
            from = segment.to;
        }
        self.destination()
    }

    /// Metres driven between departure and `time`.
    pub fn distance_driven_until(&self, time: f64) -> f64 {
        if time >= self.arrival {
            return self.distance_m;
        }
        let mut clock = self.departure;
        let mut from = self.origin;
        let mut driven = 0.0;
        for segment in &self.segments {
            let end = clock + segment.travel_time;
            let length = from.distance_to(&segment.to);
            if time < end {
                if segment.travel_time > 0.0 {
                    driven += length * ((time - clock) / segment.travel_time).clamp(0.0, 1.0);
                }
                return driven;
            }
            driven += length;
            clock = end;
            from = segment.to;
        }
        driven
    }
}

/// Write side of a pending [`PathFuture`].
pub struct PathPromise(Arc<Mutex<Option<Path>>>);

impl PathPromise {
    pub fn fulfil(self, path: Path) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(path);
        }
    }
}

enum FutureState {
    Ready(Option<Path>),
    Pending(Arc<Mutex<Option<Path>>>),
}

/// Result of a path lookup that may not have completed yet.
pub struct PathFuture {
    state: FutureState,
}

impl std::fmt::Debug for PathFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            FutureState::Ready(Some(_)) => "ready",
            FutureState::Ready(None) => "taken",
            FutureState::Pending(_) => "pending",
        };
        f.debug_struct("PathFuture").field("state", &state).finish()
    }
}

impl PathFuture {
    pub fn ready(path: Path) -> Self {
        Self {
            state: FutureState::Ready(Some(path)),
        }
    }

    /// A future plus the promise that will complete it.
    pub fn pending() -> (Self, PathPromise) {
        let slot = Arc::new(Mutex::new(None));
        (
            Self {
                state: FutureState::Pending(Arc::clone(&slot)),
            },
            PathPromise(slot),
        )
    }

    /// Take the path if it has resolved. Returns `None` while still pending
    /// (or once the path has already been taken).
    pub fn poll(&mut self) -> Option<Path> {
        match &mut self.state {
            FutureState::Ready(path) => path.take(),
            FutureState::Pending(slot) => slot.lock().ok()?.take(),
        }
    }
}

/// Synchronous least-cost path calculation.
pub trait PathCalculator: Send + Sync {
    fn calc_path(&self, from: Location, to: Location, start: f64) -> Path;
}

/// Trait for routing backends. Implementations must be `Send + Sync` so the
/// oracle can be stored as a shared ECS resource.
pub trait RoutingOracle: Send + Sync {
    /// Start a path lookup departing `from` at `start`.
    fn compute_path(&self, from: Location, to: Location, start: f64) -> PathFuture;

    /// Compute a path on the calling thread. Used where the vehicle is standing
    /// and the path must exist before the task queue is extended.
    fn compute_path_now(&self, from: Location, to: Location, start: f64) -> Path;
}

/// ECS resource wrapping a boxed routing oracle.
#[derive(Resource)]
pub struct RoutingOracleResource(pub Box<dyn RoutingOracle>);

impl Deref for RoutingOracleResource {
    type Target = dyn RoutingOracle;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// Which routing backend to use.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum OracleKind {
    /// Beeline paths computed inline.
    StraightLine { speed_mps: f64 },
    /// Beeline paths computed on worker threads; results arrive on a later poll.
    Threaded { speed_mps: f64 },
}

impl Default for OracleKind {
    fn default() -> Self {
        OracleKind::StraightLine {
            speed_mps: DEFAULT_SPEED_MPS,
        }
    }
}

/// Free-flow city speed, roughly 30 km/h.
pub const DEFAULT_SPEED_MPS: f64 = 8.33;

/// Paths are cut into segments no longer than this, which bounds how far a
/// vehicle travels before it can be diverted.
pub const DEFAULT_MAX_SEGMENT_M: f64 = 250.0;

// ---------------------------------------------------------------------------
// Straight-line calculator (always available)
// ---------------------------------------------------------------------------

/// Beeline path at constant speed, cut into equal segments.
#[derive(Debug, Clone, Copy)]
pub struct StraightLineCalculator {
    pub speed_mps: f64,
    pub max_segment_m: f64,
}

impl StraightLineCalculator {
    pub fn new(speed_mps: f64) -> Self {
        Self {
            speed_mps,
            max_segment_m: DEFAULT_MAX_SEGMENT_M,
        }
    }
}

impl Default for StraightLineCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED_MPS)
    }
}

impl PathCalculator for StraightLineCalculator {
    fn calc_path(&self, from: Location, to: Location, start: f64) -> Path {
        let distance = from.distance_to(&to);
        if distance <= 0.0 || self.speed_mps <= 0.0 {
            return Path::stationary(from, start);
        }
        let pieces = (distance / self.max_segment_m.max(1.0)).ceil().max(1.0) as usize;
        let leg_time = distance / self.speed_mps / pieces as f64;
        let segments = (1..=pieces)
            .map(|i| PathSegment {
                to: from.lerp(&to, i as f64 / pieces as f64),
                travel_time: leg_time,
            })
            .collect();
        Path {
            origin: from,
            segments,
            departure: start,
            arrival: start + distance / self.speed_mps,
            distance_m: distance,
        }
    }
}

// ---------------------------------------------------------------------------
// Caching wrapper
// ---------------------------------------------------------------------------

/// LRU cache in front of a calculator. Paths are stored departing at t=0 and
/// re-timed on a hit, so the cache is valid for time-independent calculators only.
pub struct CachedCalculator<C> {
    inner: C,
    cache: Mutex<LruCache<((i64, i64), (i64, i64)), Path>>,
}

impl<C: PathCalculator> CachedCalculator<C> {
    pub fn new(inner: C, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl<C: PathCalculator> PathCalculator for CachedCalculator<C> {
    fn calc_path(&self, from: Location, to: Location, start: f64) -> Path {
        let key = (from.quantized(), to.quantized());

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(cached) = cache.get(&key) {
                return cached.retimed(start);
            }
        }

        let path = self.inner.calc_path(from, to, 0.0);
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, path.clone());
        }
        path.retimed(start)
    }
}

// ---------------------------------------------------------------------------
// Oracles
// ---------------------------------------------------------------------------

/// Resolves every lookup before returning.
pub struct SyncOracle<C>(pub C);

impl<C: PathCalculator> RoutingOracle for SyncOracle<C> {
    fn compute_path(&self, from: Location, to: Location, start: f64) -> PathFuture {
        PathFuture::ready(self.0.calc_path(from, to, start))
    }

    fn compute_path_now(&self, from: Location, to: Location, start: f64) -> Path {
        self.0.calc_path(from, to, start)
    }
}

/// Computes paths on the rayon thread pool. The dispatch thread only ever
/// sees finished paths through [`PathFuture::poll`].
pub struct ThreadedOracle<C> {
    calculator: Arc<C>,
}

impl<C: PathCalculator + 'static> ThreadedOracle<C> {
    pub fn new(calculator: C) -> Self {
        Self {
            calculator: Arc::new(calculator),
        }
    }
}

impl<C: PathCalculator + 'static> RoutingOracle for ThreadedOracle<C> {
    fn compute_path(&self, from: Location, to: Location, start: f64) -> PathFuture {
        let (future, promise) = PathFuture::pending();
        let calculator = Arc::clone(&self.calculator);
        rayon::spawn(move || promise.fulfil(calculator.calc_path(from, to, start)));
        future
    }

    fn compute_path_now(&self, from: Location, to: Location, start: f64) -> Path {
        self.calculator.calc_path(from, to, start)
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Default path cache capacity.
const DEFAULT_PATH_CACHE_CAPACITY: usize = 20_000;

/// Construct a boxed [`RoutingOracle`] from an [`OracleKind`] descriptor.
pub fn build_routing_oracle(kind: &OracleKind) -> Box<dyn RoutingOracle> {
    match kind {
        OracleKind::StraightLine { speed_mps } => Box::new(SyncOracle(CachedCalculator::new(
            StraightLineCalculator::new(*speed_mps),
            DEFAULT_PATH_CACHE_CAPACITY,
        ))),
        OracleKind::Threaded { speed_mps } => Box::new(ThreadedOracle::new(
            CachedCalculator::new(
                StraightLineCalculator::new(*speed_mps),
                DEFAULT_PATH_CACHE_CAPACITY,
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn straight_line_path_is_segmented_and_timed() {
        let calc = StraightLineCalculator {
            speed_mps: 10.0,
            max_segment_m: 100.0,
        };
        let path = calc.calc_path(Location::new(0.0, 0.0), Location::new(250.0, 0.0), 5.0);
        assert_eq!(path.segments.len(), 3);
        assert!((path.arrival - 30.0).abs() < 1e-9);
        assert_eq!(path.destination(), Location::new(250.0, 0.0));

        let (divert_at, divert_time) = path.divertable_point(10.0);
        assert!((divert_at.x - 250.0 / 3.0).abs() < 1e-9);
        assert!((divert_time - (5.0 + 25.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn zero_length_path_arrives_on_departure() {
        let calc = StraightLineCalculator::default();
        let here = Location::new(3.0, 4.0);
        let path = calc.calc_path(here, here, 12.0);
        assert!(path.segments.is_empty());
        assert_eq!(path.arrival, 12.0);
        assert_eq!(path.divertable_point(50.0), (here, 12.0));
    }

    #[test]
    fn cache_retimes_hits() {
        let cached = CachedCalculator::new(StraightLineCalculator::new(10.0), 4);
        let a = Location::new(0.0, 0.0);
        let b = Location::new(100.0, 0.0);
        let first = cached.calc_path(a, b, 0.0);
        let second = cached.calc_path(a, b, 40.0);
        assert_eq!(cached.cached_len(), 1);
        assert_eq!(first.segments, second.segments);
        assert!((second.arrival - 50.0).abs() < 1e-9);
    }

    #[test]
    fn sync_future_is_ready_once() {
        let oracle = SyncOracle(StraightLineCalculator::default());
        let mut future = oracle.compute_path(Location::new(0.0, 0.0), Location::new(10.0, 0.0), 0.0);
        assert!(future.poll().is_some());
        assert!(future.poll().is_none());
    }

    #[test]
    fn threaded_future_resolves_eventually() {
        let oracle = ThreadedOracle::new(StraightLineCalculator::default());
        let mut future = oracle.compute_path(Location::new(0.0, 0.0), Location::new(10.0, 0.0), 0.0);
        let deadline = Instant::now() + Duration::from_secs(5);
        let path = loop {
            if let Some(path) = future.poll() {
                break path;
            }
            assert!(Instant::now() < deadline, "threaded path never resolved");
            std::thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(path.destination(), Location::new(10.0, 0.0));
    }
}
