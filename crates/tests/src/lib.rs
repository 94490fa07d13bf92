//! # Integration Tests
//!
//! End-to-end tests across the engine crates, driven by the mock sensor
//! driver, the mock readback device and mock algorithms.

#[cfg(test)]
mod contract_tests {
    use contracts::{AlgoType, ResultGroup};

    #[test]
    fn test_algo_groups_are_stable() {
        let measurement: Vec<_> = AlgoType::ALL
            .iter()
            .filter(|a| a.group() == ResultGroup::Measurement)
            .map(|a| a.name())
            .collect();
        assert_eq!(measurement, vec!["ae", "awb", "af", "afd", "asd"]);
        assert_eq!(AlgoType::ALL.len(), 25);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::{Arc, Mutex, PoisonError};
    use std::thread;
    use std::time::Duration;

    use analyzer::{AnalyzerCore, BuiltinAlgorithm, MockAlgorithm, MockProbe};
    use bytes::Bytes;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        AlgoType, Algorithm, EngineBlueprint, EngineConfig, EngineError, EngineState, FrameEvent,
        RawBuffer, ResultGroup, StatsKind, WorkingMode,
    };
    use exposure_sync::{ExposureSyncController, MockSensorDriver};
    use observability::EngineMetricsAggregator;
    use stream_aligner::{MockReadbackDevice, StreamAligner};

    const CONFIG: &str = r#"
        [sensor]
        name = "imx415"
        pixel_format = "bayer_rggb10"
        width = 1920
        height = 1080

        [sensor.calibration.ae]
        target_luma = 50

        [engine]
        working_mode = "hdr2"
        params_pool_size = 6
    "#;

    struct Rig {
        core: Arc<AnalyzerCore>,
        driver: Arc<MockSensorDriver>,
        device: Arc<MockReadbackDevice>,
        aggregator: Arc<Mutex<EngineMetricsAggregator>>,
        probe: MockProbe,
    }

    fn blueprint() -> EngineBlueprint {
        ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap()
    }

    /// Engine with mock AE/AWB/ADRC, exposure sync and stream aligner
    fn rig(blueprint: &EngineBlueprint) -> Rig {
        let probe = MockProbe::new();
        let driver = Arc::new(MockSensorDriver::new(blueprint.sensor.name.clone()));
        let sync = Arc::new(ExposureSyncController::new(driver.clone(), blueprint.exposure).unwrap());
        let device = Arc::new(MockReadbackDevice::new());
        let aligner = StreamAligner::new(
            blueprint.aligner.clone(),
            blueprint.engine.working_mode,
            device.clone(),
        );
        let aggregator = Arc::new(Mutex::new(EngineMetricsAggregator::new()));
        let sink = aggregator.clone();

        let core = AnalyzerCore::builder(blueprint.engine.clone())
            .with_default(MockAlgorithm::descriptor(AlgoType::Ae, "ae", &probe))
            .with_default(MockAlgorithm::descriptor(AlgoType::Awb, "awb", &probe))
            .with_default(MockAlgorithm::descriptor(AlgoType::Adrc, "adrc", &probe))
            .with_exposure_sync(sync)
            .with_stream_aligner(aligner)
            .on_result(move |item| {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record_result(&item.read());
            })
            .build();

        Rig {
            core,
            driver,
            device,
            aggregator,
            probe,
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..400 {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn push_frame(core: &AnalyzerCore, frame: u64, channels: usize) {
        core.push_event(FrameEvent::sof(frame, frame * 33_000_000)).unwrap();
        for kind in [StatsKind::Measurement, StatsKind::Post] {
            let item = core.alloc_stats().unwrap();
            {
                let mut snapshot = item.write();
                snapshot.frame_id = frame;
                snapshot.kind = kind;
                snapshot.mean_luma = 48.0;
                snapshot.set_block(AlgoType::Ae, Bytes::from_static(b"ae"));
            }
            core.push_stats(item).unwrap();
        }
        let exposure = core.get_effective_exp_params(frame);
        for channel in 0..channels {
            let descriptor = (frame * 4) as u32 + channel as u32;
            core.push_raw_buffer(RawBuffer::new(channel, frame, descriptor), exposure)
                .unwrap();
        }
    }

    /// Drain the stats cache from a separate thread until stopped
    fn spawn_consumer(core: Arc<AnalyzerCore>) -> thread::JoinHandle<u64> {
        thread::spawn(move || {
            let mut consumed = 0;
            loop {
                match core.acquire_stats(Some(Duration::from_millis(50))) {
                    Ok(handle) => {
                        consumed += 1;
                        core.release_stats(handle);
                    }
                    Err(EngineError::Timeout { .. }) => continue,
                    Err(_) => break,
                }
            }
            consumed
        })
    }

    /// Config -> engine -> sensor writes, readbacks and published results
    #[test]
    fn test_e2e_hdr_pipeline() {
        let blueprint = blueprint();
        let rig = rig(&blueprint);
        let core = &rig.core;

        core.init().unwrap();
        core.prepare(&blueprint.sensor, blueprint.engine.working_mode)
            .unwrap();
        // bootstrap exposure is written before the first frame
        assert_eq!(rig.driver.writes().len(), 1);
        core.start().unwrap();
        let consumer = spawn_consumer(core.clone());

        let frames = 6;
        for frame in 1..=frames {
            push_frame(core, frame, 2);
            thread::sleep(Duration::from_millis(5));
        }

        assert!(wait_until(|| rig.device.triggered_sequences().len() == frames as usize));
        assert!(wait_until(|| core.pass_count() >= frames * 3));
        assert_eq!(core.state(), EngineState::Running);

        // HDR2 pairs the two channels of every sequence
        let groups = rig.device.triggered_groups();
        assert!(groups.iter().all(|g| g.len() == 2 && g[0] == g[1]));
        assert_eq!(rig.device.recycled_count(), frames as usize * 2);

        core.stop().unwrap();
        let consumed = consumer.join().unwrap();
        assert!(consumed >= 1);

        let summary = rig
            .aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .summary();
        assert!(summary.measurement_results > frames);
        assert!(summary.other_results > frames);
        assert_eq!(summary.dropped, 0);

        assert!(rig.driver.writes().len() > 1);
        assert!(rig.driver.writes().iter().all(|w| w.gain == 2.0));
        assert_eq!(core.aligner_stats().unwrap().delivered, frames);

        core.deinit().unwrap();
        assert_eq!(core.state(), EngineState::Invalid);
    }

    #[test]
    fn test_e2e_calibration_reaches_builtin_ae() {
        let blueprint = blueprint();
        let core = AnalyzerCore::builder(blueprint.engine.clone()).build();
        core.init().unwrap();
        core.prepare(&blueprint.sensor, WorkingMode::Normal).unwrap();

        let target = core
            .with_algo_context(AlgoType::Ae, 0, |algo| {
                algo.as_any()
                    .downcast_ref::<BuiltinAlgorithm>()
                    .map(BuiltinAlgorithm::target_luma)
            })
            .unwrap();
        assert_eq!(target, Some(50.0));

        // tuning documents override calibration at runtime
        core.update_algo_config(AlgoType::Ae, 0, &serde_json::json!({ "target_luma": 80 }))
            .unwrap();
        let target = core
            .with_algo_context(AlgoType::Ae, 0, |algo| {
                algo.as_any()
                    .downcast_ref::<BuiltinAlgorithm>()
                    .map(BuiltinAlgorithm::target_luma)
            })
            .unwrap();
        assert_eq!(target, Some(80.0));
    }

    #[test]
    fn test_e2e_mock_sees_every_stage() {
        let blueprint = blueprint();
        let rig = rig(&blueprint);
        rig.core.init().unwrap();
        rig.core
            .prepare(&blueprint.sensor, WorkingMode::Normal)
            .unwrap();
        assert_eq!(
            rig.probe.stages("ae"),
            vec!["prepare", "pre_process", "processing", "post_process"]
        );
        assert!(rig.probe.stages("adrc").contains(&"prepare"));
    }

    #[test]
    fn test_e2e_sensor_failure_surfaces_on_prepare() {
        let blueprint = blueprint();
        let rig = rig(&blueprint);
        rig.core.init().unwrap();
        rig.driver.set_fail(true);

        let err = rig
            .core
            .prepare(&blueprint.sensor, blueprint.engine.working_mode)
            .unwrap_err();
        assert!(matches!(err, EngineError::HardwareIo { .. }));
        assert_eq!(rig.core.state(), EngineState::Inited);

        rig.driver.set_fail(false);
        rig.core
            .prepare(&blueprint.sensor, blueprint.engine.working_mode)
            .unwrap();
        assert_eq!(rig.core.state(), EngineState::Prepared);
    }

    #[test]
    fn test_e2e_stalled_consumer_exhausts_params_pool() {
        let mut blueprint = blueprint();
        blueprint.engine.params_pool_size = 2;
        let held = Arc::new(Mutex::new(Vec::new()));
        let keep = held.clone();
        let core = AnalyzerCore::builder(blueprint.engine.clone())
            .on_result(move |item| keep.lock().unwrap_or_else(PoisonError::into_inner).push(item))
            .build();
        core.init().unwrap();
        core.prepare(&blueprint.sensor, WorkingMode::Normal).unwrap();
        core.start().unwrap();

        // both records are held by the bootstrap results
        let item = core.alloc_stats().unwrap();
        item.write().frame_id = 1;
        assert!(matches!(
            core.analyze(item),
            Err(EngineError::ResourceExhausted { .. })
        ));

        held.lock().unwrap_or_else(PoisonError::into_inner).clear();
        let item = core.alloc_stats().unwrap();
        item.write().frame_id = 2;
        core.analyze(item).unwrap();
        core.stop().unwrap();
    }

    #[test]
    fn test_e2e_group_results_are_tagged() {
        let blueprint = blueprint();
        let groups = Arc::new(Mutex::new(Vec::new()));
        let sink = groups.clone();
        let core = AnalyzerCore::builder(blueprint.engine.clone())
            .on_result(move |item| {
                let params = item.read();
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((params.frame_id, params.group));
            })
            .build();
        core.init().unwrap();
        core.prepare(&blueprint.sensor, WorkingMode::Normal).unwrap();
        core.start().unwrap();
        core.analyze_events(&FrameEvent::sof(3, 0)).unwrap();

        let groups = groups.lock().unwrap_or_else(PoisonError::into_inner).clone();
        assert_eq!(
            groups,
            vec![
                (0, ResultGroup::Measurement),
                (0, ResultGroup::Other),
                (3, ResultGroup::Other)
            ]
        );
        core.stop().unwrap();
    }

    #[test]
    fn test_e2e_pool_sizes_follow_config() {
        let config = EngineConfig {
            params_pool_size: 5,
            stats_pool_size: 7,
            ..Default::default()
        };
        let core = AnalyzerCore::builder(config).build();
        assert_eq!(core.params_pool().capacity(), 5);
        let held: Vec<_> = (0..7).map(|_| core.alloc_stats().unwrap()).collect();
        assert!(matches!(
            core.alloc_stats(),
            Err(EngineError::ResourceExhausted { .. })
        ));
        drop(held);
        assert!(core.alloc_stats().is_ok());
    }
}
