//! The instrumentation state shared by every thread: the ledger, the overall
//! counter and the report gate, all behind one [`FutexLock`].
//!
//! Every mutation and every read runs inside a [`SuppressionScope`], so whatever
//! the bookkeeping itself allocates goes straight to the real allocator and
//! never comes back here to take the lock a second time.

use std::{
    ffi::c_void,
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    alloc::{
        guard::SuppressionScope,
        ledger::{AllocationRecord, Ledger},
    },
    config::ReportConfig,
    snapshot::{LedgerSnapshot, SnapshotWriteError},
    stats::{gate::RateGate, histogram::HistogramSnapshot, report},
    sync::futex_lock::FutexLock,
    util::{print::write_stderr, time},
};

/// Wall-clock source, in whole seconds since the epoch
pub type Clock = fn() -> u64;

/// Where rendered reports go
pub type Sink = fn(&[u8]);

#[derive(Clone, Copy, Debug)]
enum ConfigSource {
    /// [`ReportConfig::get()`], read lazily because a `static` cannot read the
    /// environment
    Environment,
    Fixed(ReportConfig),
}

struct State {
    ledger: Ledger,
    /// Successful allocations, zero-allocations and reallocations so far
    overall: u64,
    gate: RateGate,
}

pub struct Instrumentor {
    state: FutexLock<State>,
    frozen: AtomicBool,
    config: ConfigSource,
    clock: Clock,
    sink: Sink,
}

/// The instance the exported entry points feed
pub static INSTRUMENTOR: Instrumentor = Instrumentor::new();

impl Instrumentor {
    /// Configured from the environment, timed by the system clock, reporting
    /// to stderr
    pub const fn new() -> Self {
        Self {
            state: FutexLock::new(State {
                ledger: Ledger::new(),
                overall: 0,
                gate: RateGate::new(),
            }),
            frozen: AtomicBool::new(false),
            config: ConfigSource::Environment,
            clock: time::now_secs,
            sink: write_stderr,
        }
    }

    pub fn with_config(mut self, config: ReportConfig) -> Self {
        self.config = ConfigSource::Fixed(config);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Sink) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> ReportConfig {
        match self.config {
            ConfigSource::Environment => *ReportConfig::get(),
            ConfigSource::Fixed(config) => config,
        }
    }

    /// Current time according to this instance's clock
    pub fn now(&self) -> u64 {
        (self.clock)()
    }

    /// Record that `address` now holds a live block of `size` bytes. Does
    /// nothing when called from the engine's own allocation traffic.
    pub fn on_allocate(&self, address: usize, size: u64) {
        let Some(_scope) = SuppressionScope::enter() else {
            return;
        };
        let now = self.now();
        let mut state = self.state.lock();
        state.overall += 1;
        let record = AllocationRecord::new(size, now, state.overall);
        state.ledger.record_allocation(address, record);
        let due = self.due_report(&mut state, now);
        drop(state);
        self.emit(due);
    }

    /// Stop tracking `address`. Must run *before* the block is handed back
    /// to the real allocator: once it is, another thread may get the same
    /// address and record it, and removing afterwards would drop that record.
    pub fn on_deallocate(&self, address: usize) {
        let Some(_scope) = SuppressionScope::enter() else {
            return;
        };
        let now = self.now();
        let mut state = self.state.lock();
        state.ledger.record_deallocation(address);
        let due = self.due_report(&mut state, now);
        drop(state);
        self.emit(due);
    }

    /// Run `realloc`, the real reallocation of `old` to `new_size` bytes,
    /// with the ledger locked, and record its outcome. Holding the lock
    /// across the call keeps both the freed `old` and the returned block from
    /// being recorded by another thread before we are done with them.
    ///
    /// A null result leaves `old` tracked, except for `new_size == 0`, where
    /// glibc frees `old` and returns null.
    pub fn track_reallocation<F>(&self, old: *mut c_void, new_size: u64, realloc: F) -> *mut c_void
    where
        F: FnOnce() -> *mut c_void,
    {
        let Some(_scope) = SuppressionScope::enter() else {
            return realloc();
        };
        let now = self.now();
        let mut state = self.state.lock();
        let new = realloc();
        if !new.is_null() {
            state.overall += 1;
            let record = AllocationRecord::new(new_size, now, state.overall);
            state
                .ledger
                .record_reallocation(old as usize, new as usize, record);
        } else if new_size == 0 && !old.is_null() {
            state.ledger.record_deallocation(old as usize);
        }
        let due = self.due_report(&mut state, now);
        drop(state);
        self.emit(due);
        new
    }

    /// Emit a report if the gate allows it at `now`. Returns whether one was
    /// emitted.
    pub fn maybe_report(&self, now: u64) -> bool {
        let Some(_scope) = SuppressionScope::enter() else {
            return false;
        };
        let mut state = self.state.lock();
        let due = self.due_report(&mut state, now);
        drop(state);
        let emitted = due.is_some();
        self.emit(due);
        emitted
    }

    fn due_report(&self, state: &mut State, now: u64) -> Option<HistogramSnapshot> {
        if self.is_frozen() {
            return None;
        }
        let config = self.config();
        if !config.reports_enabled || !state.gate.try_pass(now, config.period_secs) {
            return None;
        }
        Some(HistogramSnapshot::from_ledger(
            &state.ledger,
            state.overall,
            now,
        ))
    }

    fn emit(&self, due: Option<HistogramSnapshot>) {
        let Some(snapshot) = due else {
            return;
        };
        let mut timestamp = [0u8; 64];
        let timestamp = time::format_local(snapshot.taken_at, &mut timestamp);
        let buf = report::render_to_buf(&snapshot, timestamp);
        (self.sink)(buf.as_bytes());
    }

    /// Stop emitting reports until [`Instrumentor::unfreeze()`]. Tracking
    /// carries on.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn unfreeze(&self) {
        self.frozen.store(false, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Copy every live `(address, record)` pair, in address order, into a
    /// new collection of the caller's choosing. The copy's own allocations
    /// are not tracked.
    ///
    /// Must not be called from a report sink: the ledger is locked there.
    pub fn snapshot<M>(&self) -> M
    where
        M: FromIterator<(usize, AllocationRecord)>,
    {
        let _scope = SuppressionScope::enter();
        let state = self.state.lock();
        state
            .ledger
            .iter()
            .map(|(&address, &record)| (address, record))
            .collect()
    }

    /// Live records in the order they were recorded
    pub fn chronological_snapshot(&self) -> Vec<(usize, AllocationRecord)> {
        let _scope = SuppressionScope::enter();
        self.state.lock().ledger.chronological()
    }

    /// The histograms a report would show right now
    pub fn histogram(&self) -> HistogramSnapshot {
        let _scope = SuppressionScope::enter();
        let now = self.now();
        let state = self.state.lock();
        HistogramSnapshot::from_ledger(&state.ledger, state.overall, now)
    }

    pub fn current_allocations(&self) -> u64 {
        self.state.lock().ledger.len() as u64
    }

    pub fn overall_allocations(&self) -> u64 {
        self.state.lock().overall
    }

    /// Sum of the sizes of all live allocations
    pub fn total_bytes(&self) -> u64 {
        self.state.lock().ledger.total_bytes()
    }

    /// Serializable copy of the whole ledger
    pub fn export_snapshot(&self) -> LedgerSnapshot {
        let _scope = SuppressionScope::enter();
        let now = self.now();
        let state = self.state.lock();
        LedgerSnapshot::new(&state.ledger, state.overall, now)
    }

    /// [`Instrumentor::export_snapshot()`] written as JSON to `path`. The
    /// export is not recorded in the ledger it describes.
    pub fn dump_json<P>(&self, path: P) -> Result<(), SnapshotWriteError>
    where
        P: AsRef<Path>,
    {
        let _scope = SuppressionScope::enter();
        self.export_snapshot().write_to_file(path)
    }
}

impl Default for Instrumentor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        ptr,
        sync::{
            atomic::{AtomicU64, AtomicUsize},
            Mutex,
        },
    };

    use super::*;

    fn quiet() -> ReportConfig {
        ReportConfig {
            reports_enabled: false,
            ..ReportConfig::default()
        }
    }

    fn fixed_clock() -> u64 {
        1_000
    }

    #[test]
    fn allocate_and_deallocate_track_the_ledger() {
        let inst = Instrumentor::new()
            .with_config(quiet())
            .with_clock(fixed_clock);
        inst.on_allocate(0x1000, 10);
        inst.on_allocate(0x2000, 20);
        assert_eq!(inst.current_allocations(), 2);
        assert_eq!(inst.overall_allocations(), 2);
        assert_eq!(inst.total_bytes(), 30);

        inst.on_deallocate(0x1000);
        inst.on_deallocate(0xdead);
        assert_eq!(inst.current_allocations(), 1);
        assert_eq!(inst.overall_allocations(), 2);

        let map: HashMap<usize, AllocationRecord> = inst.snapshot();
        assert_eq!(map[&0x2000], AllocationRecord::new(20, 1_000, 2));
    }

    #[test]
    fn engine_traffic_is_not_recorded() {
        let inst = Instrumentor::new().with_config(quiet());
        {
            let _scope = SuppressionScope::enter().unwrap();
            inst.on_allocate(0x1000, 10);
        }
        assert_eq!(inst.current_allocations(), 0);
        assert_eq!(inst.overall_allocations(), 0);
    }

    #[test]
    fn reallocation_outcomes() {
        let inst = Instrumentor::new().with_config(quiet());
        let old = 0x1000 as *mut c_void;
        let moved = 0x2000 as *mut c_void;
        inst.on_allocate(old as usize, 8);

        assert_eq!(inst.track_reallocation(old, 100, || moved), moved);
        assert_eq!(inst.overall_allocations(), 2);
        let map: HashMap<usize, AllocationRecord> = inst.snapshot();
        assert_eq!(map.len(), 1);
        assert_eq!(map[&0x2000].size, 100);

        // failure keeps the original and is not counted
        assert!(inst.track_reallocation(moved, 1 << 50, ptr::null_mut).is_null());
        assert_eq!(inst.overall_allocations(), 2);
        assert_eq!(inst.current_allocations(), 1);

        // `realloc(p, 0)` that frees
        assert!(inst.track_reallocation(moved, 0, ptr::null_mut).is_null());
        assert_eq!(inst.current_allocations(), 0);
        assert_eq!(inst.overall_allocations(), 2);

        // `realloc(NULL, n)`
        inst.track_reallocation(ptr::null_mut(), 4, || old);
        assert_eq!(inst.current_allocations(), 1);
        assert_eq!(inst.overall_allocations(), 3);
    }

    #[test]
    fn reallocation_runs_under_the_lock() {
        let inst = Instrumentor::new().with_config(quiet());
        let seen = AtomicUsize::new(usize::MAX);
        inst.track_reallocation(ptr::null_mut(), 1, || {
            // the scope is active, so nested traffic is dropped instead of
            // deadlocking on the held lock
            inst.on_allocate(0x5000, 1);
            seen.store(usize::from(SuppressionScope::is_active()), Ordering::Relaxed);
            0x6000 as *mut c_void
        });
        assert_eq!(seen.load(Ordering::Relaxed), 1);
        let map: HashMap<usize, AllocationRecord> = inst.snapshot();
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), [0x6000]);
    }

    #[test]
    fn chronological_snapshot_uses_recording_order() {
        let inst = Instrumentor::new().with_config(quiet());
        inst.on_allocate(0x3000, 1);
        inst.on_allocate(0x1000, 2);
        inst.on_allocate(0x2000, 3);
        let order: Vec<usize> = inst
            .chronological_snapshot()
            .into_iter()
            .map(|(address, _)| address)
            .collect();
        assert_eq!(order, [0x3000, 0x1000, 0x2000]);
    }

    #[test]
    fn reports_respect_gate_and_freeze() {
        static NOW: AtomicU64 = AtomicU64::new(100);
        static REPORTS: Mutex<Vec<String>> = Mutex::new(Vec::new());
        fn clock() -> u64 {
            NOW.load(Ordering::Relaxed)
        }
        fn sink(bytes: &[u8]) {
            REPORTS
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(bytes).into_owned());
        }

        let inst = Instrumentor::new()
            .with_config(ReportConfig::default())
            .with_clock(clock)
            .with_sink(sink);

        // primes
        inst.on_allocate(0x1000, 3);
        NOW.store(104, Ordering::Relaxed);
        inst.on_allocate(0x2000, 5000);
        assert!(REPORTS.lock().unwrap().is_empty());

        NOW.store(105, Ordering::Relaxed);
        inst.on_deallocate(0x3000);
        {
            let reports = REPORTS.lock().unwrap();
            assert_eq!(reports.len(), 1);
            assert!(reports[0].contains("\n2 Current allocations\n"));
            assert!(reports[0].contains("\n2 Overall allocations since start\n"));
            assert!(reports[0].contains("0 - 4 bytes: ########## \n"));
            assert!(reports[0].contains("4096 + bytes: ########## \n"));
            assert!(reports[0].contains("< 1 sec: ########## \n"));
            assert!(reports[0].contains("< 10 sec: ########## \n"));
        }

        inst.freeze();
        assert!(inst.is_frozen());
        assert!(!inst.maybe_report(200));
        inst.unfreeze();
        assert!(inst.maybe_report(200));
        assert!(!inst.maybe_report(201));
        assert_eq!(REPORTS.lock().unwrap().len(), 2);
    }

    #[test]
    fn quiet_config_never_reports() {
        let inst = Instrumentor::new()
            .with_config(quiet())
            .with_sink(|_| panic!("reports are disabled"));
        assert!(!inst.maybe_report(0));
        assert!(!inst.maybe_report(1_000_000));
    }

    #[test]
    fn export_carries_every_record() {
        let inst = Instrumentor::new()
            .with_config(quiet())
            .with_clock(fixed_clock);
        inst.on_allocate(0x10, 1);
        inst.on_allocate(0x20, 2);
        let snapshot = inst.export_snapshot();
        assert_eq!(snapshot.taken_at, 1_000);
        assert_eq!(snapshot.current_allocations, 2);
        assert_eq!(snapshot.overall_allocations, 2);
        assert_eq!(snapshot.total_bytes, 3);
        assert_eq!(snapshot.records.len(), 2);
        assert_eq!(snapshot.records[0].address, 0x10);
    }
}
