//! Viewport-driven fetch scheduling.
//!
//! Each lane (POIs, routes) runs its own small state machine:
//!
//! ```text
//! Idle -> Debouncing -> InFlight -> Idle
//!            ^             |
//!            +-- event ----+   (a newer cycle supersedes the request)
//! ```
//!
//! The scheduler performs no I/O and owns no clock. The host feeds it
//! events with a millisecond timestamp, calls [`ViewportFetchScheduler::poll`]
//! once [`ViewportFetchScheduler::next_deadline`] has passed, executes the
//! returned [`FetchCommand`]s, and reports each outcome back through
//! [`ViewportFetchScheduler::on_fetch_completed`].

use log::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::FetchFailure;
use crate::geo_types::{Filters, Lane, ViewportBounds};
use crate::options::SchedulerConfig;
use crate::store::{GeoDataStore, LaneData};

/// Milliseconds on the host's monotonic-ish clock.
pub type Millis = u64;

/// Parameters of one area fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub lane: Lane,
    pub bounds: ViewportBounds,
    /// Canonical (sorted, deduplicated) filter values for this lane.
    pub filters: Vec<String>,
}

impl FetchRequest {
    /// Canonical key: lane, bounds rounded to 1e-6 degrees, filters.
    pub fn fingerprint(&self) -> Fingerprint {
        let b = &self.bounds;
        Fingerprint(format!(
            "{}|{:.6},{:.6},{:.6},{:.6}|{}",
            self.lane.as_str(),
            b.min_lng(),
            b.min_lat(),
            b.max_lng(),
            b.max_lat(),
            self.filters.join(",")
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A fetch the host must perform. `cancel` fires if the request is superseded
/// or the session is torn down.
#[derive(Debug, Clone)]
pub struct FetchCommand {
    pub lane: Lane,
    pub seq: u64,
    pub request: FetchRequest,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanePhase {
    Idle,
    Debouncing,
    InFlight,
}

/// What happened to a reported fetch outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Items were written to the store.
    Applied,
    /// The lane error was recorded in the store.
    Failed,
    /// Superseded or torn down; nothing was written.
    Discarded,
}

#[derive(Debug)]
struct InFlight {
    seq: u64,
    cancel: CancelToken,
}

#[derive(Debug)]
struct FetchLane {
    lane: Lane,
    deadline: Option<Millis>,
    in_flight: Option<InFlight>,
    last_issued: Option<Fingerprint>,
    last_seq: u64,
}

impl FetchLane {
    fn new(lane: Lane) -> Self {
        Self {
            lane,
            deadline: None,
            in_flight: None,
            last_issued: None,
            last_seq: 0,
        }
    }

    fn phase(&self) -> LanePhase {
        if self.deadline.is_some() {
            LanePhase::Debouncing
        } else if self.in_flight.is_some() {
            LanePhase::InFlight
        } else {
            LanePhase::Idle
        }
    }

    /// Debounce, not throttle: every event pushes the deadline out again.
    fn arm(&mut self, now: Millis, quiet_ms: Millis) {
        self.deadline = Some(now.saturating_add(quiet_ms));
    }

    fn is_due(&self, now: Millis) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    fn fire(&mut self, request: FetchRequest) -> Option<FetchCommand> {
        self.deadline = None;

        let fingerprint = request.fingerprint();
        if self.last_issued.as_ref() == Some(&fingerprint) {
            debug!(
                "{}: fingerprint unchanged ({}), skipping fetch",
                self.lane.as_str(),
                fingerprint.as_str()
            );
            return None;
        }

        if let Some(previous) = self.in_flight.take() {
            info!(
                "{}: superseding request #{} before it completed",
                self.lane.as_str(),
                previous.seq
            );
            previous.cancel.cancel();
        }

        self.last_seq += 1;
        let cancel = CancelToken::new();
        self.in_flight = Some(InFlight {
            seq: self.last_seq,
            cancel: cancel.clone(),
        });
        debug!(
            "{}: issuing request #{} ({})",
            self.lane.as_str(),
            self.last_seq,
            fingerprint.as_str()
        );
        self.last_issued = Some(fingerprint);

        Some(FetchCommand {
            lane: self.lane,
            seq: self.last_seq,
            request,
            cancel,
        })
    }

    /// True if `seq` is the current request, which is then cleared.
    fn settle(&mut self, seq: u64) -> bool {
        match &self.in_flight {
            Some(current) if current.seq == seq => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    fn shutdown(&mut self) {
        self.deadline = None;
        if let Some(current) = self.in_flight.take() {
            current.cancel.cancel();
        }
    }
}

/// Turns bursts of viewport/filter events into at most one current fetch
/// per lane.
#[derive(Debug)]
pub struct ViewportFetchScheduler {
    config: SchedulerConfig,
    bounds: Option<ViewportBounds>,
    filters: Filters,
    pois: FetchLane,
    routes: FetchLane,
    torn_down: bool,
}

impl ViewportFetchScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            bounds: None,
            filters: Filters::default(),
            pois: FetchLane::new(Lane::Pois),
            routes: FetchLane::new(Lane::Routes),
            torn_down: false,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Record new bounds and filters and (re)arm both lanes. Returns false if
    /// the event was refused (torn down, or bounds containing NaN).
    pub fn on_viewport_changed(&mut self, bounds: ViewportBounds, filters: &Filters, now: Millis) -> bool {
        if self.torn_down {
            warn!("Viewport change after teardown ignored");
            return false;
        }
        let Some(bounds) = bounds.clamped() else {
            warn!("Viewport bounds are not numeric, ignoring: {bounds:?}");
            return false;
        };
        self.bounds = Some(bounds);
        self.filters = filters.clone();
        self.arm_all(now);
        true
    }

    /// Filter change without a viewport change.
    pub fn on_filters_changed(&mut self, filters: &Filters, now: Millis) -> bool {
        if self.torn_down {
            warn!("Filter change after teardown ignored");
            return false;
        }
        self.filters = filters.clone();
        if self.bounds.is_some() {
            self.arm_all(now);
        }
        true
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn bounds(&self) -> Option<ViewportBounds> {
        self.bounds
    }

    /// Earliest pending debounce deadline, if any lane is debouncing.
    pub fn next_deadline(&self) -> Option<Millis> {
        [self.pois.deadline, self.routes.deadline]
            .into_iter()
            .flatten()
            .min()
    }

    /// Fire every lane whose quiet period has elapsed. Early or duplicate
    /// polls return nothing.
    pub fn poll(&mut self, now: Millis) -> Vec<FetchCommand> {
        if self.torn_down {
            return Vec::new();
        }
        let Some(bounds) = self.bounds else {
            return Vec::new();
        };

        let mut commands = Vec::new();
        for lane in Lane::ALL {
            if !self.lane(lane).is_due(now) {
                continue;
            }
            let request = FetchRequest {
                lane,
                bounds,
                filters: self.filters.canonical_for(lane),
            };
            if let Some(command) = self.lane_mut(lane).fire(request) {
                commands.push(command);
            }
        }
        commands
    }

    /// Report the outcome of a command. Results for anything other than the
    /// lane's current request are dropped.
    pub fn on_fetch_completed(
        &mut self,
        lane: Lane,
        seq: u64,
        result: Result<LaneData, FetchFailure>,
        store: &mut GeoDataStore,
    ) -> Completion {
        if self.torn_down {
            debug!("{}: result #{seq} arrived after teardown, dropped", lane.as_str());
            return Completion::Discarded;
        }
        let state = self.lane_mut(lane);
        if !state.settle(seq) {
            debug!("{}: stale result #{seq} discarded", lane.as_str());
            return Completion::Discarded;
        }

        match result {
            Ok(data) if data.lane() == lane => {
                store.replace(data);
                store.set_lane_error(lane, None);
                Completion::Applied
            }
            Ok(data) => {
                // Never written into the wrong lane.
                state.last_issued = None;
                let failure = FetchFailure::Decode(format!(
                    "{} response delivered for {} lane",
                    data.lane().as_str(),
                    lane.as_str()
                ));
                warn!("{}: {failure}", lane.as_str());
                store.set_lane_error(lane, Some(failure));
                Completion::Failed
            }
            Err(FetchFailure::Cancelled) => {
                state.last_issued = None;
                debug!("{}: request #{seq} reported cancelled", lane.as_str());
                Completion::Discarded
            }
            Err(failure) => {
                // Forget the fingerprint so returning to the same view retries.
                state.last_issued = None;
                warn!("{}: fetch #{seq} failed: {failure}", lane.as_str());
                store.set_lane_error(lane, Some(failure));
                Completion::Failed
            }
        }
    }

    pub fn phase(&self, lane: Lane) -> LanePhase {
        self.lane(lane).phase()
    }

    /// Cancel outstanding requests and refuse all further events.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        info!("Tearing down fetch scheduler");
        self.torn_down = true;
        self.pois.shutdown();
        self.routes.shutdown();
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    fn arm_all(&mut self, now: Millis) {
        let quiet = self.config.debounce_ms;
        self.pois.arm(now, quiet);
        self.routes.arm(now, quiet);
    }

    fn lane(&self, lane: Lane) -> &FetchLane {
        match lane {
            Lane::Pois => &self.pois,
            Lane::Routes => &self.routes,
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut FetchLane {
        match lane {
            Lane::Pois => &mut self.pois,
            Lane::Routes => &mut self.routes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_types::{Coordinate, Poi};

    fn bounds(offset: f64) -> ViewportBounds {
        ViewportBounds::new(
            Coordinate::new(39.8 + offset, 116.3 + offset),
            Coordinate::new(40.0 + offset, 116.5 + offset),
        )
    }

    fn scheduler() -> ViewportFetchScheduler {
        ViewportFetchScheduler::new(SchedulerConfig { debounce_ms: 500 })
    }

    fn poi(id: &str) -> Poi {
        Poi {
            id: id.to_string(),
            name: id.to_string(),
            coordinate: Coordinate::new(39.9, 116.4),
            category: "scenic".to_string(),
            address: None,
            description: None,
            opening_hours: None,
            contact_phone: None,
        }
    }

    fn for_lane(commands: &[FetchCommand], lane: Lane) -> Vec<&FetchCommand> {
        commands.iter().filter(|c| c.lane == lane).collect()
    }

    #[test]
    fn test_burst_fires_once_with_last_bounds() {
        let mut s = scheduler();
        let filters = Filters::default();
        for (i, t) in [0, 50, 100, 150, 200].into_iter().enumerate() {
            assert!(s.on_viewport_changed(bounds(i as f64 * 0.01), &filters, t));
        }
        assert_eq!(s.phase(Lane::Pois), LanePhase::Debouncing);
        assert_eq!(s.next_deadline(), Some(700));
        assert!(s.poll(600).is_empty());

        let commands = s.poll(700);
        let pois = for_lane(&commands, Lane::Pois);
        assert_eq!(pois.len(), 1);
        assert_eq!(pois[0].request.bounds, bounds(0.04));
        assert_eq!(for_lane(&commands, Lane::Routes).len(), 1);
        assert_eq!(s.phase(Lane::Pois), LanePhase::InFlight);

        assert!(s.poll(2_000).is_empty());
    }

    #[test]
    fn test_superseded_result_is_discarded() {
        let mut s = scheduler();
        let mut store = GeoDataStore::new();
        let filters = Filters::default();

        s.on_viewport_changed(bounds(0.0), &filters, 0);
        let first = for_lane(&s.poll(500), Lane::Pois)[0].clone();

        s.on_viewport_changed(bounds(0.5), &filters, 600);
        let second = for_lane(&s.poll(1_100), Lane::Pois)[0].clone();

        assert!(first.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());
        assert!(second.seq > first.seq);

        let applied = s.on_fetch_completed(
            Lane::Pois,
            second.seq,
            Ok(LaneData::Pois(vec![poi("new")])),
            &mut store,
        );
        assert_eq!(applied, Completion::Applied);

        // The old request resolves late anyway.
        let late = s.on_fetch_completed(
            Lane::Pois,
            first.seq,
            Ok(LaneData::Pois(vec![poi("old")])),
            &mut store,
        );
        assert_eq!(late, Completion::Discarded);
        assert_eq!(store.pois()[0].id, "new");
        assert_eq!(s.phase(Lane::Pois), LanePhase::Idle);
    }

    #[test]
    fn test_stale_result_before_current_completes() {
        let mut s = scheduler();
        let mut store = GeoDataStore::new();
        let filters = Filters::default();

        s.on_viewport_changed(bounds(0.0), &filters, 0);
        let first = for_lane(&s.poll(500), Lane::Pois)[0].clone();
        s.on_viewport_changed(bounds(0.5), &filters, 600);
        s.poll(1_100);

        let late = s.on_fetch_completed(
            Lane::Pois,
            first.seq,
            Ok(LaneData::Pois(vec![poi("old")])),
            &mut store,
        );
        assert_eq!(late, Completion::Discarded);
        assert!(store.pois().is_empty());
        assert_eq!(s.phase(Lane::Pois), LanePhase::InFlight);
    }

    #[test]
    fn test_same_fingerprint_is_noop() {
        let mut s = scheduler();
        let mut store = GeoDataStore::new();
        let filters = Filters::default();

        s.on_viewport_changed(bounds(0.0), &filters, 0);
        let first = s.poll(500);
        assert_eq!(first.len(), 2);
        for cmd in &first {
            let data = match cmd.lane {
                Lane::Pois => LaneData::Pois(Vec::new()),
                Lane::Routes => LaneData::Routes(Vec::new()),
            };
            s.on_fetch_completed(cmd.lane, cmd.seq, Ok(data), &mut store);
        }

        // Pan away and back within one debounce window.
        s.on_viewport_changed(bounds(0.3), &filters, 1_000);
        s.on_viewport_changed(bounds(0.0), &filters, 1_100);
        assert!(s.poll(1_600).is_empty());
        assert_eq!(s.phase(Lane::Pois), LanePhase::Idle);
    }

    #[test]
    fn test_noop_keeps_matching_request_in_flight() {
        let mut s = scheduler();
        let filters = Filters::default();
        s.on_viewport_changed(bounds(0.0), &filters, 0);
        let first = s.poll(500);
        s.on_viewport_changed(bounds(0.0), &filters, 600);
        assert!(s.poll(1_100).is_empty());
        assert!(first.iter().all(|c| !c.cancel.is_cancelled()));
        assert_eq!(s.phase(Lane::Routes), LanePhase::InFlight);
    }

    #[test]
    fn test_filter_change_refetches_only_affected_lane() {
        let mut s = scheduler();
        let mut store = GeoDataStore::new();
        let mut filters = Filters::default();

        s.on_viewport_changed(bounds(0.0), &filters, 0);
        for cmd in s.poll(500) {
            let data = match cmd.lane {
                Lane::Pois => LaneData::Pois(Vec::new()),
                Lane::Routes => LaneData::Routes(Vec::new()),
            };
            s.on_fetch_completed(cmd.lane, cmd.seq, Ok(data), &mut store);
        }

        filters.poi_types = vec!["museum".to_string()];
        assert!(s.on_filters_changed(&filters, 1_000));
        let commands = s.poll(1_500);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].lane, Lane::Pois);
        assert_eq!(commands[0].request.filters, vec!["museum".to_string()]);
    }

    #[test]
    fn test_filters_before_any_viewport_do_not_fetch() {
        let mut s = scheduler();
        s.on_filters_changed(&Filters::default(), 0);
        assert!(s.next_deadline().is_none());
        assert!(s.poll(10_000).is_empty());
    }

    #[test]
    fn test_failure_is_lane_scoped_and_not_retried() {
        let mut s = scheduler();
        let mut store = GeoDataStore::new();
        let filters = Filters::default();

        s.on_viewport_changed(bounds(0.0), &filters, 0);
        let commands = s.poll(500);
        let routes = for_lane(&commands, Lane::Routes)[0].clone();
        let outcome = s.on_fetch_completed(
            Lane::Routes,
            routes.seq,
            Err(FetchFailure::Http { status: 503 }),
            &mut store,
        );
        assert_eq!(outcome, Completion::Failed);
        assert_eq!(store.lane_error(Lane::Routes), Some(&FetchFailure::Http { status: 503 }));
        assert!(store.lane_error(Lane::Pois).is_none());

        // No automatic retry.
        assert!(s.next_deadline().is_none());
        assert!(s.poll(5_000).is_empty());

        // The next natural trigger retries, even for the same bounds.
        s.on_viewport_changed(bounds(0.0), &filters, 6_000);
        let retry = s.poll(6_500);
        let retry_routes = for_lane(&retry, Lane::Routes);
        assert_eq!(retry_routes.len(), 1);
        s.on_fetch_completed(
            Lane::Routes,
            retry_routes[0].seq,
            Ok(LaneData::Routes(Vec::new())),
            &mut store,
        );
        assert!(store.lane_error(Lane::Routes).is_none());
    }

    #[test]
    fn test_teardown_cancels_and_refuses() {
        let mut s = scheduler();
        let mut store = GeoDataStore::new();
        let filters = Filters::default();

        s.on_viewport_changed(bounds(0.0), &filters, 0);
        let commands = s.poll(500);
        s.on_viewport_changed(bounds(0.1), &filters, 600);

        s.teardown();
        assert!(commands.iter().all(|c| c.cancel.is_cancelled()));
        assert!(s.next_deadline().is_none());
        assert!(!s.on_viewport_changed(bounds(0.2), &filters, 700));
        assert!(s.poll(10_000).is_empty());

        let pois = for_lane(&commands, Lane::Pois)[0];
        let outcome = s.on_fetch_completed(
            Lane::Pois,
            pois.seq,
            Ok(LaneData::Pois(vec![poi("late")])),
            &mut store,
        );
        assert_eq!(outcome, Completion::Discarded);
        assert!(store.pois().is_empty());
    }

    #[test]
    fn test_nan_bounds_refused() {
        let mut s = scheduler();
        let bad = ViewportBounds::new(Coordinate::new(f64::NAN, 0.0), Coordinate::new(1.0, 1.0));
        assert!(!s.on_viewport_changed(bad, &Filters::default(), 0));
        assert!(s.next_deadline().is_none());
    }

    #[test]
    fn test_world_view_bounds_are_clamped() {
        let mut s = scheduler();
        let wide = ViewportBounds::new(Coordinate::new(-85.0, -540.0), Coordinate::new(85.0, 540.0));
        assert!(s.on_viewport_changed(wide, &Filters::default(), 0));
        let commands = s.poll(500);
        assert_eq!(commands[0].request.bounds.min_lng(), -180.0);
        assert_eq!(commands[0].request.bounds.max_lng(), 180.0);
    }

    #[test]
    fn test_fingerprint_is_canonical() {
        let a = FetchRequest {
            lane: Lane::Pois,
            bounds: bounds(0.0),
            filters: vec!["a".into(), "b".into()],
        };
        let mut b = a.clone();
        b.bounds.south_west.latitude += 1e-9;
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = a.clone();
        c.lane = Lane::Routes;
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
