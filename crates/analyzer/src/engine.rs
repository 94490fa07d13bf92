//! AnalyzerCore: lifecycle state machine and per-frame pipeline.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use contracts::{
    AlgoConfig, AlgoDescriptor, AlgoType, Algorithm, AuxLightCapability, AuxLightConfig,
    AuxLightDevice, EffectiveExposureSource, EngineConfig, EngineError, EngineResult,
    EngineState, ExposureUpdate, FrameEvent, FrameInput, FullParams, ParamSlot, PrepareParams,
    RawBuffer, ResultGroup, SensorDescriptor, SensorFlags, StatsKind, StatsSnapshot,
    WorkingMode,
};
use exposure_sync::ExposureSyncController;
use observability::{
    record_exposure_write, record_pass, record_pool_usage, record_stats_cache_depth, PassStatus,
};
use param_pool::{CheckedOut, ParameterPool, PoolItem, StatsCache};
use stream_aligner::{AlignerStats, StreamAligner};
use tracing::{debug, info, instrument, trace, warn};

use crate::algorithms::builtin_descriptor;
use crate::aux_light::AuxLightController;
use crate::gate::PassGate;
use crate::pipeline::{prepare_all, run_stages, StageOutcome};
use crate::registry::{lock_context, AlgoContext, AlgoRegistry, HandleInfo};
use crate::workers::{RawJob, WorkerThreads};

/// Receives every published result, from a worker thread; must not block
pub type ResultCallback = Arc<dyn Fn(PoolItem<FullParams>) + Send + Sync>;

/// Mutable state shared by every pass, guarded for a whole pass
#[derive(Debug, Default)]
struct PassContext {
    prepare: Option<PrepareParams>,
    flags: SensorFlags,
    working_mode: WorkingMode,
    /// Passes since the last prepare
    passes: u64,
    last_frame_id: u64,
    cur_exposure: Option<ExposureUpdate>,
    prev_exposure: Option<ExposureUpdate>,
    /// Exposure the latest aligned raw frame was captured with
    raw_exposure: Option<ExposureUpdate>,
    raw_sequence: Option<u64>,
}

/// Input of one pass
struct PassInput<'a> {
    frame_id: u64,
    group: ResultGroup,
    stats: Option<&'a StatsSnapshot>,
    event: Option<&'a FrameEvent>,
    exposure: Option<ExposureUpdate>,
}

/// Builder for [`AnalyzerCore`]
pub struct AnalyzerBuilder {
    config: EngineConfig,
    defaults: Vec<AlgoDescriptor>,
    exposure_sync: Option<Arc<ExposureSyncController>>,
    effective: Option<Arc<dyn EffectiveExposureSource>>,
    aligner: Option<StreamAligner>,
    aux_device: Option<Arc<dyn AuxLightDevice>>,
    callback: Option<ResultCallback>,
}

impl AnalyzerBuilder {
    /// Replace the built-in handle of a type
    pub fn with_default(mut self, descriptor: AlgoDescriptor) -> Self {
        self.defaults
            .retain(|d| d.algo_type != descriptor.algo_type);
        self.defaults.push(descriptor);
        self
    }

    /// Drive sensor writes from start-of-frame events and look up effective
    /// exposure from the same controller
    pub fn with_exposure_sync(mut self, controller: Arc<ExposureSyncController>) -> Self {
        if self.effective.is_none() {
            let source: Arc<dyn EffectiveExposureSource> = controller.clone();
            self.effective = Some(source);
        }
        self.exposure_sync = Some(controller);
        self
    }

    /// Effective exposure lookup other than the exposure sync controller
    pub fn with_effective_source(mut self, source: Arc<dyn EffectiveExposureSource>) -> Self {
        self.effective = Some(source);
        self
    }

    /// Route raw buffers through a stream aligner
    pub fn with_stream_aligner(mut self, aligner: StreamAligner) -> Self {
        self.aligner = Some(aligner);
        self
    }

    /// Auxiliary light device probed on `init`
    pub fn with_aux_light_device(mut self, device: Arc<dyn AuxLightDevice>) -> Self {
        self.aux_device = Some(device);
        self
    }

    /// Result callback
    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: Fn(PoolItem<FullParams>) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Arc<AnalyzerCore> {
        let config = self.config;
        Arc::new(AnalyzerCore {
            state: Mutex::new(EngineState::Invalid),
            registry: AlgoRegistry::new(config.algo_mode),
            defaults: self.defaults,
            gate: PassGate::new(),
            params_pool: ParameterPool::new("full_params", config.params_pool_size),
            stats_pool: ParameterPool::new("stats", config.stats_pool_size),
            stats_cache: StatsCache::new(config.stats_cache_size),
            context: Mutex::new(PassContext::default()),
            aux_light: Mutex::new(AuxLightController::new(AuxLightCapability::none())),
            aux_device: self.aux_device,
            exposure_sync: self.exposure_sync,
            effective: self.effective,
            aligner: self.aligner.map(Mutex::new),
            callback: self.callback,
            workers: Mutex::new(None),
            config,
        })
    }
}

/// 3A analysis engine
///
/// Lifecycle: `Invalid → Inited → Prepared → Started → Running → Stopped`,
/// and `Stopped` may be prepared or started again.
pub struct AnalyzerCore {
    config: EngineConfig,
    state: Mutex<EngineState>,
    registry: AlgoRegistry,
    defaults: Vec<AlgoDescriptor>,
    gate: PassGate,
    params_pool: ParameterPool<FullParams>,
    stats_pool: ParameterPool<StatsSnapshot>,
    stats_cache: StatsCache<PoolItem<StatsSnapshot>>,
    context: Mutex<PassContext>,
    aux_light: Mutex<AuxLightController>,
    aux_device: Option<Arc<dyn AuxLightDevice>>,
    exposure_sync: Option<Arc<ExposureSyncController>>,
    effective: Option<Arc<dyn EffectiveExposureSource>>,
    aligner: Option<Mutex<StreamAligner>>,
    callback: Option<ResultCallback>,
    workers: Mutex<Option<WorkerThreads>>,
}

impl fmt::Debug for AnalyzerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyzerCore")
            .field("state", &self.state())
            .field("registry", &self.registry)
            .field("params_pool", &self.params_pool)
            .field("stats_cache", &self.stats_cache)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AnalyzerCore {
    pub fn builder(config: EngineConfig) -> AnalyzerBuilder {
        AnalyzerBuilder {
            config,
            defaults: Vec::new(),
            exposure_sync: None,
            effective: None,
            aligner: None,
            aux_device: None,
            callback: None,
        }
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.state)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========== Lifecycle ==========

    /// Register the default handle of every type and probe the aux light
    #[instrument(name = "analyzer_init", skip(self))]
    pub fn init(&self) -> EngineResult<()> {
        let mut state = lock(&self.state);
        if *state != EngineState::Invalid {
            return Err(EngineError::state("init", *state));
        }

        for algo in AlgoType::ALL {
            let descriptor = self
                .defaults
                .iter()
                .find(|d| d.algo_type == algo)
                .cloned()
                .unwrap_or_else(|| builtin_descriptor(algo));
            self.registry.register_default(descriptor);
        }

        let capability = self
            .aux_device
            .as_ref()
            .map(|device| device.capability())
            .unwrap_or_else(AuxLightCapability::none);
        lock(&self.aux_light).set_capability(capability);

        *state = EngineState::Inited;
        info!(handles = self.registry.len(), mode = ?self.registry.mode(), "analyzer initialized");
        Ok(())
    }

    /// Prepare every current handle for `sensor` and publish a bootstrap result
    ///
    /// The bootstrap pass runs both groups on statistics marked invalid so
    /// every register table starts from sane defaults. Its measurement
    /// exposure is written to the sensor right away.
    #[instrument(name = "analyzer_prepare", skip(self, sensor), fields(sensor = %sensor.name, ?working_mode))]
    pub fn prepare(&self, sensor: &SensorDescriptor, working_mode: WorkingMode) -> EngineResult<()> {
        let mut state = lock(&self.state);
        if matches!(
            *state,
            EngineState::Invalid | EngineState::Started | EngineState::Running
        ) {
            return Err(EngineError::state("prepare", *state));
        }

        let flags = sensor.flags();
        let params = PrepareParams {
            working_mode,
            flags,
            width: sensor.width,
            height: sensor.height,
            calibration: sensor.calibration.clone(),
        };
        prepare_all(&self.registry.current_handles(), &params)?;

        // bootstrap on a fresh context; the engine's own context, aligner and
        // state only change once nothing else can fail
        let mut fresh = PassContext {
            prepare: Some(params),
            flags,
            working_mode,
            ..PassContext::default()
        };
        let mut published = Vec::with_capacity(2);
        for kind in [StatsKind::Measurement, StatsKind::Post] {
            let stats = StatsSnapshot::invalid(0, kind);
            let input = PassInput {
                frame_id: 0,
                group: kind.group(),
                stats: Some(&stats),
                event: None,
                exposure: None,
            };
            let (item, _) = self.run_pass(&mut fresh, input)?;
            published.push(item);
        }

        // the bootstrap exposure goes out immediately instead of through
        // the delay queues
        let bootstrap = published.iter().find_map(|item| item.read().exposure);
        if let Some(sync) = &self.exposure_sync {
            sync.reset();
            if let Some(update) = bootstrap {
                sync.prime(update)?;
            }
        }
        fresh.cur_exposure = bootstrap;
        fresh.passes = 0;
        fresh.last_frame_id = 0;

        if let Some(aligner) = &self.aligner {
            lock(aligner).set_hdr_mode(working_mode);
        }
        *lock(&self.context) = fresh;
        *state = EngineState::Prepared;
        drop(state);
        info!(
            black_white = flags.black_white,
            gray_mode = flags.gray_mode,
            "analyzer prepared"
        );

        for item in published {
            self.publish(item);
        }
        Ok(())
    }

    /// Start worker threads
    #[instrument(name = "analyzer_start", skip(self))]
    pub fn start(self: &Arc<Self>) -> EngineResult<()> {
        let mut state = lock(&self.state);
        if !matches!(*state, EngineState::Prepared | EngineState::Stopped) {
            return Err(EngineError::state("start", *state));
        }

        let workers = WorkerThreads::spawn(self)?;
        self.stats_cache.start();
        *lock(&self.workers) = Some(workers);
        *state = EngineState::Started;
        info!("analyzer started");
        Ok(())
    }

    /// Stop worker threads and drop cached statistics
    ///
    /// Threads blocked in [`acquire_stats`](Self::acquire_stats) return
    /// `Stopped`. Stopping a stopped engine succeeds without effect.
    #[instrument(name = "analyzer_stop", skip(self))]
    pub fn stop(&self) -> EngineResult<()> {
        let workers = {
            let mut state = lock(&self.state);
            match *state {
                EngineState::Stopped => return Ok(()),
                EngineState::Started | EngineState::Running => {}
                other => return Err(EngineError::state("stop", other)),
            }
            *state = EngineState::Stopped;
            lock(&self.workers).take()
        };

        self.stats_cache.stop();
        if let Some(workers) = workers {
            workers.shutdown();
        }
        info!("analyzer stopped");
        Ok(())
    }

    /// Release every handle
    #[instrument(name = "analyzer_deinit", skip(self))]
    pub fn deinit(&self) -> EngineResult<()> {
        let mut state = lock(&self.state);
        if state.is_active() {
            return Err(EngineError::state("deinit", *state));
        }
        self.registry.clear();
        *lock(&self.context) = PassContext::default();
        *state = EngineState::Invalid;
        info!("analyzer deinitialized");
        Ok(())
    }

    // ========== Pipeline ==========

    /// Started → Running on the first pass
    fn enter_pipeline(&self, op: &'static str) -> EngineResult<()> {
        let mut state = lock(&self.state);
        match *state {
            EngineState::Running => Ok(()),
            EngineState::Started => {
                *state = EngineState::Running;
                info!("first pipeline pass, analyzer running");
                Ok(())
            }
            other => Err(EngineError::state(op, other)),
        }
    }

    /// Run the group selected by the statistics kind and publish the result
    ///
    /// # Errors
    /// - `State` outside Started/Running
    /// - `ResourceExhausted` when no result record is free; nothing is published
    #[instrument(
        level = "debug",
        name = "analyzer_analyze",
        skip(self, stats),
        fields(frame_id = tracing::field::Empty)
    )]
    pub fn analyze(&self, stats: PoolItem<StatsSnapshot>) -> EngineResult<()> {
        self.enter_pipeline("analyze")?;
        let started = Instant::now();
        let group = stats.read().kind.group();
        let pass = self.gate.begin_pass();

        let result = {
            let snapshot = stats.read();
            tracing::Span::current().record("frame_id", snapshot.frame_id);
            let mut ctx = lock(&self.context);
            let input = PassInput {
                frame_id: snapshot.frame_id,
                group,
                stats: Some(&*snapshot),
                event: None,
                exposure: self.effective_exposure(&ctx, snapshot.frame_id),
            };
            self.run_pass(&mut ctx, input)
        };
        drop(pass);

        match result {
            Ok((item, outcome)) => {
                if self.stats_cache.push(stats) {
                    record_stats_cache_depth(
                        self.stats_cache.cached_len(),
                        self.stats_cache.checked_out_len(),
                    );
                }
                record_pass(group, status(outcome), elapsed_ms(started));
                self.publish(item);
                Ok(())
            }
            Err(e) => {
                record_pass(group, PassStatus::Dropped, 0.0);
                Err(e)
            }
        }
    }

    /// Recompute the other group on start of frame
    ///
    /// The previous and current effective exposure are rolled forward before
    /// the pass. Other events are ignored.
    #[instrument(
        level = "debug",
        name = "analyzer_analyze_events",
        skip(self, event),
        fields(frame_id = event.frame_id)
    )]
    pub fn analyze_events(&self, event: &FrameEvent) -> EngineResult<()> {
        if !event.is_sof() {
            trace!(kind = ?event.kind, "event ignored");
            return Ok(());
        }
        self.enter_pipeline("analyze_events")?;
        let started = Instant::now();
        let pass = self.gate.begin_pass();

        let result = {
            let mut ctx = lock(&self.context);
            let exposure = self.effective_exposure(&ctx, event.frame_id);
            ctx.prev_exposure = ctx.cur_exposure;
            ctx.cur_exposure = exposure;
            let input = PassInput {
                frame_id: event.frame_id,
                group: ResultGroup::Other,
                stats: None,
                event: Some(event),
                exposure,
            };
            self.run_pass(&mut ctx, input)
        };
        drop(pass);

        match result {
            Ok((item, outcome)) => {
                record_pass(ResultGroup::Other, status(outcome), elapsed_ms(started));
                self.publish(item);
                Ok(())
            }
            Err(e) => {
                record_pass(ResultGroup::Other, PassStatus::Dropped, 0.0);
                Err(e)
            }
        }
    }

    /// Record the exposure an aligned raw frame was captured with
    #[instrument(level = "debug", name = "analyzer_analyze_raw", skip(self, prior_exposure))]
    pub fn analyze_raw(&self, sequence: u64, prior_exposure: Option<ExposureUpdate>) -> EngineResult<()> {
        self.enter_pipeline("analyze_raw")?;
        let mut ctx = lock(&self.context);
        if let Some(last) = ctx.raw_sequence {
            if sequence <= last {
                debug!(sequence, last, "raw sequence not increasing");
            }
        }
        ctx.raw_sequence = Some(sequence);
        if prior_exposure.is_some() {
            ctx.raw_exposure = prior_exposure;
        }
        Ok(())
    }

    fn effective_exposure(&self, ctx: &PassContext, frame_id: u64) -> Option<ExposureUpdate> {
        self.effective
            .as_ref()
            .and_then(|source| source.effective_exposure(frame_id))
            .or(ctx.raw_exposure)
            .or(ctx.cur_exposure)
    }

    /// One pass: stages, aux light, exposure hand-off
    fn run_pass(
        &self,
        ctx: &mut PassContext,
        input: PassInput<'_>,
    ) -> EngineResult<(PoolItem<FullParams>, StageOutcome)> {
        let item = self.params_pool.acquire()?;
        record_pool_usage(
            self.params_pool.name(),
            self.params_pool.in_use(),
            self.params_pool.capacity(),
        );

        let handles = self.registry.active_handles(input.group);
        let outcome = {
            let mut out = item.write();
            out.frame_id = input.frame_id;
            out.group = input.group;

            let frame = FrameInput {
                frame_id: input.frame_id,
                group: input.group,
                stats: input.stats,
                event: input.event,
                exposure: input.exposure.as_ref(),
                prev_exposure: ctx.prev_exposure.as_ref(),
                flags: ctx.flags,
                working_mode: ctx.working_mode,
            };
            let outcome = run_stages(&handles, &frame, &mut out);

            let aux = lock(&self.aux_light).generate(input.exposure.as_ref(), ctx.flags);
            out.set_aux_light(aux);

            self.forward_exposure(&out);
            outcome
        };

        ctx.passes += 1;
        ctx.last_frame_id = input.frame_id;
        debug!(
            frame_id = input.frame_id,
            group = input.group.name(),
            handles = outcome.handles,
            failed = outcome.failed,
            "pass complete"
        );
        Ok((item, outcome))
    }

    /// Queue the pass's exposure decision for delay-compensated writing
    fn forward_exposure(&self, params: &FullParams) {
        let Some(sync) = &self.exposure_sync else {
            return;
        };
        if !params.update_mask.contains(ParamSlot::Exposure) {
            return;
        }
        if !params.exposure_table.is_empty() {
            sync.set_exposure_table(&params.exposure_table);
        } else if let Some(update) = params.exposure {
            sync.set_exposure(update);
        }
    }

    fn publish(&self, item: PoolItem<FullParams>) {
        if let Some(callback) = &self.callback {
            callback(item);
        }
    }

    // ========== Worker entry points ==========

    pub(crate) fn process_stats(&self, stats: PoolItem<StatsSnapshot>) {
        if let Err(e) = self.analyze(stats) {
            log_worker_error("stats", &e);
        }
    }

    pub(crate) fn process_event(&self, event: FrameEvent) {
        if event.is_sof() {
            if let Some(sync) = &self.exposure_sync {
                match sync.handle_sof(event.frame_id) {
                    Ok(Some(applied)) => record_exposure_write(&applied),
                    Ok(None) => {}
                    Err(e) => warn!(frame_id = event.frame_id, error = %e, "exposure write failed"),
                }
            }
        }
        if let Err(e) = self.analyze_events(&event) {
            log_worker_error("events", &e);
        }
    }

    pub(crate) fn process_raw(&self, buffer: RawBuffer, prior_exposure: Option<ExposureUpdate>) {
        let sequences: Vec<u64> = match &self.aligner {
            Some(aligner) => {
                let outcome = lock(aligner).push(buffer);
                for (sequence, e) in &outcome.failures {
                    warn!(sequence, error = %e, "readback failed");
                }
                outcome.reports.iter().map(|r| r.sequence).collect()
            }
            None => vec![buffer.sequence],
        };
        for sequence in sequences {
            if let Err(e) = self.analyze_raw(sequence, prior_exposure) {
                log_worker_error("raw", &e);
            }
        }
    }

    // ========== Producer side ==========

    fn with_workers<F>(&self, op: &'static str, send: F) -> EngineResult<()>
    where
        F: FnOnce(&WorkerThreads) -> EngineResult<()>,
    {
        let sent = lock(&self.workers).as_ref().map(send);
        match sent {
            Some(result) => result,
            None => Err(EngineError::state(op, self.state())),
        }
    }

    /// Queue statistics for the statistics worker
    pub fn push_stats(&self, stats: PoolItem<StatsSnapshot>) -> EngineResult<()> {
        self.with_workers("push_stats", |w| w.send_stats(stats))
    }

    /// Queue a hardware event for the event worker
    pub fn push_event(&self, event: FrameEvent) -> EngineResult<()> {
        self.with_workers("push_event", |w| w.send_event(event))
    }

    /// Queue a raw buffer and the exposure it was captured with
    pub fn push_raw_buffer(
        &self,
        buffer: RawBuffer,
        prior_exposure: Option<ExposureUpdate>,
    ) -> EngineResult<()> {
        self.with_workers("push_raw_buffer", |w| {
            w.send_raw(RawJob {
                buffer,
                prior_exposure,
            })
        })
    }

    /// Take a free statistics record
    pub fn alloc_stats(&self) -> EngineResult<PoolItem<StatsSnapshot>> {
        self.stats_pool.acquire()
    }

    // ========== Consumer side ==========

    /// Wait for a cached statistics snapshot
    ///
    /// # Errors
    /// `Timeout` when nothing arrives in time, `Stopped` when the engine stops
    pub fn acquire_stats(
        &self,
        timeout: Option<Duration>,
    ) -> EngineResult<CheckedOut<PoolItem<StatsSnapshot>>> {
        self.stats_cache.acquire(timeout)
    }

    pub fn release_stats(&self, handle: CheckedOut<PoolItem<StatsSnapshot>>) {
        self.stats_cache.release(handle);
    }

    /// Exposure in effect on `frame_id`
    pub fn get_effective_exp_params(&self, frame_id: u64) -> Option<ExposureUpdate> {
        self.effective
            .as_ref()
            .and_then(|source| source.effective_exposure(frame_id))
    }

    /// Result record pool
    pub fn params_pool(&self) -> &ParameterPool<FullParams> {
        &self.params_pool
    }

    /// Passes run since the last prepare
    pub fn pass_count(&self) -> u64 {
        lock(&self.context).passes
    }

    // ========== Algorithm management ==========

    fn require_inited(&self, op: &'static str) -> EngineResult<EngineState> {
        let state = self.state();
        if state == EngineState::Invalid {
            return Err(EngineError::state(op, state));
        }
        Ok(state)
    }

    /// Register an additional handle
    pub fn add_algo(&self, descriptor: AlgoDescriptor) -> EngineResult<u32> {
        self.require_inited("add_algo")?;
        Ok(self.registry.add_algo(descriptor))
    }

    /// Enable or disable a handle behind the safe-enable barrier
    ///
    /// Once prepared, a newly enabled handle is prepared before it becomes
    /// current.
    ///
    /// # Errors
    /// `Timeout` when in-flight passes do not finish within
    /// `safe_enable_timeout_ms`. Callers decide whether to retry.
    #[instrument(name = "analyzer_enable_algo", skip(self))]
    pub fn enable_algo(&self, algo: AlgoType, id: u32, on: bool) -> EngineResult<()> {
        let state = self.require_inited("enable_algo")?;
        let timeout = Duration::from_millis(self.config.safe_enable_timeout_ms);
        let _guard = self.gate.begin_enable(timeout).inspect_err(|e| {
            warn!(algo = %algo, id, error = %e, "safe enable barrier timed out");
        })?;

        let prepare = if on && state.is_prepared() {
            lock(&self.context).prepare.clone()
        } else {
            None
        };
        self.registry.enable(algo, id, on, prepare.as_ref())
    }

    /// Remove a handle
    pub fn remove_algo(&self, algo: AlgoType, id: u32) -> EngineResult<()> {
        self.require_inited("remove_algo")?;
        self.registry.remove(algo, id)
    }

    pub fn is_algo_enabled(&self, algo: AlgoType, id: u32) -> bool {
        self.registry.is_enabled(algo, id)
    }

    /// Algorithm context of a handle, for callers that downcast it
    pub fn get_algo_context(&self, algo: AlgoType, id: u32) -> EngineResult<AlgoContext> {
        self.registry.get_context(algo, id)
    }

    /// Forward a tuning document to a handle
    pub fn update_algo_config(&self, algo: AlgoType, id: u32, config: &AlgoConfig) -> EngineResult<()> {
        self.require_inited("update_algo_config")?;
        self.registry.update_config(algo, id, config)
    }

    /// Registered handles
    pub fn algorithms(&self) -> Vec<HandleInfo> {
        self.registry.list()
    }

    /// Run `f` on the context of a handle
    pub fn with_algo_context<R>(
        &self,
        algo: AlgoType,
        id: u32,
        f: impl FnOnce(&dyn Algorithm) -> R,
    ) -> EngineResult<R> {
        let context = self.registry.get_context(algo, id)?;
        let guard = lock_context(&context);
        Ok(f(&**guard))
    }

    // ========== Collaborator control ==========

    pub fn set_aux_light_config(&self, config: AuxLightConfig) -> EngineResult<()> {
        lock(&self.aux_light).set_config(config)
    }

    pub fn query_aux_light_capability(&self) -> AuxLightCapability {
        lock(&self.aux_light).capability().clone()
    }

    fn exposure_sync(&self) -> EngineResult<&ExposureSyncController> {
        self.exposure_sync
            .as_deref()
            .ok_or_else(|| EngineError::UnsupportedMode {
                message: "no exposure sync controller attached".to_string(),
            })
    }

    fn with_aligner<R>(&self, f: impl FnOnce(&mut StreamAligner) -> R) -> EngineResult<R> {
        let aligner = self
            .aligner
            .as_ref()
            .ok_or_else(|| EngineError::UnsupportedMode {
                message: "no stream aligner attached".to_string(),
            })?;
        let mut aligner = lock(aligner);
        Ok(f(&mut aligner))
    }

    /// Configure sensor register delays in frames
    pub fn set_exposure_delays(&self, time: u32, gain: u32, dcg: u32) -> EngineResult<()> {
        self.exposure_sync()?.set_delays(time, gain, dcg)
    }

    /// Switch the aligner to another HDR mode, recycling pending buffers
    pub fn set_hdr_mode(&self, mode: WorkingMode) -> EngineResult<()> {
        self.with_aligner(|a| a.set_hdr_mode(mode))
    }

    /// Force the readback pass count of one sequence
    pub fn request_readback(&self, sequence: u64, passes: u8) -> EngineResult<()> {
        self.with_aligner(|a| a.request_readback(sequence, passes))?
    }

    /// Discard `count` aligned frames starting at `start`
    pub fn set_skip_frames(&self, start: u64, count: u64) -> EngineResult<()> {
        self.with_aligner(|a| a.set_skip_frames(start, count))
    }

    /// Extra readback passes hinted by luma detection
    pub fn set_luma_hint(&self, sequence: u64, extra_passes: u8) -> EngineResult<()> {
        self.with_aligner(|a| a.set_luma_hint(sequence, extra_passes))
    }

    pub fn aligner_stats(&self) -> Option<AlignerStats> {
        self.aligner.as_ref().map(|a| lock(a).stats())
    }
}

fn status(outcome: StageOutcome) -> PassStatus {
    if outcome.failed > 0 {
        PassStatus::Degraded
    } else {
        PassStatus::Published
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn log_worker_error(worker: &'static str, error: &EngineError) {
    match error {
        EngineError::State { .. } => debug!(worker, error = %error, "pass rejected"),
        e if e.is_per_cycle() => debug!(worker, error = %e, "pass dropped"),
        e => warn!(worker, error = %e, "pass failed"),
    }
}
