#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use rosc::{OscMessage, OscType};
    use scbridge_types::{
        DefinitionError, InstrumentDef, NoteId, ParamSpec, RecordingStatus, ReleasePolicy,
        UnknownNotePolicy,
    };

    use crate::config::DispatchSettings;
    use crate::dispatch::*;
    use crate::engine::backend::{TestBackend, TestOp};
    use crate::engine::{GROUP_RECORD, GROUP_VOICES};
    use crate::voices::{mtof, NoteIdInUse};

    fn pluck() -> InstrumentDef {
        let mut def = InstrumentDef::with_mandatory("pluck");
        def.params.push(ParamSpec::new("cutoff", 2000.0));
        def.params.push(ParamSpec::new("res", 0.2));
        def
    }

    fn setup(policy: ReleasePolicy) -> (Dispatcher, Arc<TestBackend>) {
        let backend = Arc::new(TestBackend::new());
        let settings = DispatchSettings {
            release_policy: policy,
            unknown_note: UnknownNotePolicy::Strict,
            ..DispatchSettings::default()
        };
        let dispatcher = Dispatcher::new(
            Box::new(backend.clone()),
            settings,
            vec![pluck()],
        )
        .unwrap();
        (dispatcher, backend)
    }

    fn msg(addr: &str, args: Vec<OscType>) -> OscMessage {
        OscMessage {
            addr: addr.to_string(),
            args,
        }
    }

    fn start(id: i32, pitch: f32, volume: f32) -> OscMessage {
        msg(
            "/pluck/start_note",
            vec![OscType::Int(id), OscType::Float(pitch), OscType::Float(volume)],
        )
    }

    fn synced(id: i32) -> OscMessage {
        msg("/synced", vec![OscType::Int(id)])
    }

    fn sender() -> Option<SocketAddr> {
        Some("127.0.0.1:9000".parse().unwrap())
    }

    fn last_sync(backend: &TestBackend) -> i32 {
        *backend.sync_ids().last().unwrap()
    }

    #[test]
    fn test_registration_installs_three_plus_optional_updates() {
        let (dispatcher, _) = setup(ReleasePolicy::Retain);
        // start_note + end_note/change_pitch/change_volume + 2 optional
        assert_eq!(dispatcher.routes().count_for("pluck"), 6);
        assert_eq!(dispatcher.routes().len(), 6 + 4);
        assert_eq!(
            dispatcher.routes().resolve("/pluck/change_parameter/res"),
            Some(&Route::ChangeParameter {
                instrument: "pluck".into(),
                param: "res".into()
            })
        );
    }

    #[test]
    fn test_invalid_definition_installs_nothing() {
        let (mut dispatcher, _) = setup(ReleasePolicy::Retain);
        let before = dispatcher.routes().len();
        let mut def = InstrumentDef::with_mandatory("broken");
        def.params.retain(|p| p.name != "gate");

        assert!(matches!(
            dispatcher.register_instrument(def),
            Err(DefinitionError::MissingParams { .. })
        ));
        assert_eq!(dispatcher.routes().count_for("broken"), 0);
        assert_eq!(dispatcher.routes().len(), before);
        assert!(dispatcher.instrument("broken").is_none());
    }

    #[test]
    fn test_invalid_startup_instrument_aborts() {
        let mut def = InstrumentDef::with_mandatory("nofreq");
        def.params.retain(|p| p.name != "freq");
        let result = Dispatcher::new(
            Box::new(TestBackend::new()),
            DispatchSettings::default(),
            vec![def],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_start_note_then_change_pitch() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let now = Instant::now();
        assert_eq!(d.handle_control(&start(1, 60.0, 80.0), None, now), Ok(Flow::Continue));

        let created = backend.find(|op| matches!(op, TestOp::CreateSynth { .. })).unwrap();
        match created {
            TestOp::CreateSynth { def_name, node_id, group_id, params } => {
                assert_eq!(def_name, "pluck");
                assert_eq!(node_id, 1000);
                assert_eq!(group_id, GROUP_VOICES);
                assert_eq!(params[0].0, "freq");
                assert!((params[0].1 - mtof(60.0, 440.0)).abs() < 1e-3);
                assert_eq!(params[1], ("volume".to_string(), 80.0));
                assert_eq!(params[2], ("gate".to_string(), 1.0));
                assert_eq!(params.len(), 3);
            }
            other => panic!("unexpected op {:?}", other),
        }

        let change = msg(
            "/pluck/change_pitch",
            vec![OscType::Int(1), OscType::Float(62.0)],
        );
        d.handle_control(&change, None, now).unwrap();

        let voice = d.voices().get(&NoteId::Int(1)).unwrap();
        assert!((voice.freq().unwrap() - mtof(62.0, 440.0)).abs() < 1e-3);
        assert_eq!(voice.volume(), Some(80.0));
        assert_eq!(voice.param("cutoff"), Some(2000.0));
        assert_eq!(
            backend.count(|op| matches!(op, TestOp::SetParam { node_id: 1000, param, .. } if param == "freq")),
            1
        );
    }

    #[test]
    fn test_start_note_inline_overrides() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let mut note = start(7, 69.0, 0.5);
        note.args.extend([
            OscType::String("cutoff".into()),
            OscType::Float(900.0),
            OscType::String("bogus".into()),
            OscType::Float(1.0),
        ]);
        d.handle_control(&note, None, Instant::now()).unwrap();

        let params = match backend.find(|op| matches!(op, TestOp::CreateSynth { .. })) {
            Some(TestOp::CreateSynth { params, .. }) => params,
            other => panic!("unexpected {:?}", other),
        };
        assert!(params.contains(&("cutoff".to_string(), 900.0)));
        assert!(!params.iter().any(|(name, _)| name == "bogus"));

        let voice = d.voices().get(&NoteId::Int(7)).unwrap();
        assert_eq!(voice.param("cutoff"), Some(900.0));
        assert_eq!(voice.param("res"), Some(0.2));
    }

    #[test]
    fn test_odd_override_list_is_bad_arguments() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let mut note = start(1, 60.0, 0.5);
        note.args.push(OscType::String("cutoff".into()));
        assert!(matches!(
            d.handle_control(&note, None, Instant::now()),
            Err(DispatchError::BadArguments { .. })
        ));
        assert!(backend.operations().is_empty());
        assert!(d.voices().is_empty());
    }

    #[test]
    fn test_end_note_retained_entry_rejects_reuse() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let now = Instant::now();
        d.handle_control(&start(1, 60.0, 80.0), None, now).unwrap();
        d.handle_control(&msg("/pluck/end_note", vec![OscType::Int(1)]), None, now)
            .unwrap();

        assert_eq!(
            backend.count(|op| *op == TestOp::SetParam { node_id: 1000, param: "gate".into(), value: 0.0 }),
            1
        );
        let voice = d.voices().get(&NoteId::Int(1)).unwrap();
        assert_eq!(voice.gate(), Some(0.0));
        assert!(voice.is_released());

        let err = d.handle_control(&start(1, 64.0, 80.0), None, now).unwrap_err();
        assert_eq!(
            err,
            DispatchError::NoteIdInUse(NoteIdInUse { id: NoteId::Int(1), released: true })
        );
        assert_eq!(backend.count(|op| matches!(op, TestOp::CreateSynth { .. })), 1);
    }

    #[test]
    fn test_start_while_sounding_rejected() {
        let (mut d, _) = setup(ReleasePolicy::Retain);
        let now = Instant::now();
        d.handle_control(&start(3, 60.0, 1.0), None, now).unwrap();
        assert!(matches!(
            d.handle_control(&start(3, 60.0, 1.0), None, now),
            Err(DispatchError::NoteIdInUse(NoteIdInUse { released: false, .. }))
        ));
    }

    #[test]
    fn test_remove_policy_allows_reuse() {
        let (mut d, backend) = setup(ReleasePolicy::Remove);
        let now = Instant::now();
        d.handle_control(&start(1, 60.0, 1.0), None, now).unwrap();
        d.handle_control(&msg("/pluck/end_note", vec![OscType::Int(1)]), None, now)
            .unwrap();
        assert!(d.voices().is_empty());
        d.handle_control(&start(1, 62.0, 1.0), None, now).unwrap();
        assert_eq!(d.voices().get(&NoteId::Int(1)).unwrap().node_id, 1001);
        assert_eq!(backend.count(|op| matches!(op, TestOp::CreateSynth { .. })), 2);
    }

    #[test]
    fn test_linger_prunes_on_tick() {
        let (mut d, _) = setup(ReleasePolicy::Linger(Duration::from_millis(300)));
        let t0 = Instant::now();
        d.handle_control(&start(1, 60.0, 1.0), None, t0).unwrap();
        d.handle_control(&msg("/pluck/end_note", vec![OscType::Int(1)]), None, t0)
            .unwrap();

        d.tick(t0 + Duration::from_millis(100));
        assert_eq!(d.voices().len(), 1);
        d.tick(t0 + Duration::from_millis(300));
        assert!(d.voices().is_empty());
    }

    #[test]
    fn test_unknown_note_strict_and_ignore() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let change = msg("/pluck/change_volume", vec![OscType::Int(42), OscType::Float(0.1)]);
        assert_eq!(
            d.handle_control(&change, None, Instant::now()),
            Err(DispatchError::UnknownNote { instrument: "pluck".into(), id: NoteId::Int(42) })
        );

        let settings = DispatchSettings {
            unknown_note: UnknownNotePolicy::Ignore,
            ..DispatchSettings::default()
        };
        let mut lenient =
            Dispatcher::new(Box::new(backend.clone()), settings, vec![pluck()]).unwrap();
        assert_eq!(lenient.handle_control(&change, None, Instant::now()), Ok(Flow::Continue));
        assert!(backend.operations().is_empty());
    }

    #[test]
    fn test_note_of_other_instrument_is_unknown() {
        let (mut d, _) = setup(ReleasePolicy::Retain);
        let now = Instant::now();
        d.register_instrument(InstrumentDef::with_mandatory("pad")).unwrap();
        d.handle_control(&start(1, 60.0, 1.0), None, now).unwrap();
        let change = msg("/pad/change_volume", vec![OscType::Int(1), OscType::Float(0.1)]);
        assert!(matches!(
            d.handle_control(&change, None, now),
            Err(DispatchError::UnknownNote { .. })
        ));
    }

    #[test]
    fn test_change_parameter_and_string_ids() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let now = Instant::now();
        let note = msg(
            "/pluck/start_note",
            vec![OscType::String("n-1".into()), OscType::Int(60), OscType::Double(0.7)],
        );
        d.handle_control(&note, None, now).unwrap();
        let change = msg(
            "/pluck/change_parameter/cutoff",
            vec![OscType::String("n-1".into()), OscType::Float(500.0)],
        );
        d.handle_control(&change, None, now).unwrap();

        assert_eq!(
            d.voices().get(&NoteId::from("n-1")).unwrap().param("cutoff"),
            Some(500.0)
        );
        assert!(backend
            .find(|op| *op == TestOp::SetParam { node_id: 1000, param: "cutoff".into(), value: 500.0 })
            .is_some());
    }

    #[test]
    fn test_unknown_route_and_bad_arguments() {
        let (mut d, _) = setup(ReleasePolicy::Retain);
        let now = Instant::now();
        assert_eq!(
            d.handle_control(&msg("/nope/start_note", vec![]), None, now),
            Err(DispatchError::UnknownRoute("/nope/start_note".into()))
        );
        assert!(matches!(
            d.handle_control(&msg("/pluck/start_note", vec![OscType::Int(1)]), None, now),
            Err(DispatchError::BadArguments { .. })
        ));
    }

    #[test]
    fn test_engine_failure_is_recoverable() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        backend.fail_with(Some("socket closed"));
        assert!(matches!(
            d.handle_control(&start(1, 60.0, 1.0), None, Instant::now()),
            Err(DispatchError::Engine(_))
        ));
        assert!(d.voices().is_empty());

        backend.fail_with(None);
        assert!(d.handle_control(&start(1, 60.0, 1.0), None, Instant::now()).is_ok());
    }

    #[test]
    fn test_compile_acks_only_after_sync() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let now = Instant::now();
        let compile = msg(
            "/compile/synth_def",
            vec![OscType::String(
                r"SynthDef(\buzz, { |freq=440, volume=0.5, gate=1, width=0.5| })".into(),
            )],
        );
        d.handle_control(&compile, sender(), now).unwrap();

        // Routes are live before the engine settles
        assert_eq!(d.routes().count_for("buzz"), 5);
        assert_eq!(d.pending_syncs(), 1);

        let mut replies = Vec::new();
        d.handle_engine(&synced(last_sync(&backend)), now, &mut replies).unwrap();
        assert_eq!(
            replies,
            vec![Reply {
                target: sender().unwrap(),
                message: msg(DONE_COMPILING, vec![OscType::String("buzz".into())]),
            }]
        );

        // A repeated /synced does not ack twice
        replies.clear();
        d.handle_engine(&synced(last_sync(&backend)), now, &mut replies).unwrap();
        assert!(replies.is_empty());
    }

    #[test]
    fn test_compile_twice_replaces_routes_and_acks_both() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let now = Instant::now();
        let first = r#"{"name": "pad", "params": [{"name": "freq"}, {"name": "volume"}, {"name": "gate"}, {"name": "cutoff"}]}"#;
        let second = r#"{"name": "pad", "params": [{"name": "freq"}, {"name": "volume"}, {"name": "gate"}, {"name": "res"}, {"name": "pan"}]}"#;

        let mut replies = Vec::new();
        for text in [first, second] {
            let compile = msg("/compile/synth_def", vec![OscType::String(text.into())]);
            d.handle_control(&compile, sender(), now).unwrap();
            d.handle_engine(&synced(last_sync(&backend)), now, &mut replies).unwrap();
        }

        assert_eq!(replies.len(), 2);
        assert_eq!(d.routes().count_for("pad"), 6);
        assert!(d.routes().resolve("/pad/change_parameter/cutoff").is_none());
        assert!(d.routes().resolve("/pad/change_parameter/pan").is_some());
    }

    #[test]
    fn test_recompile_keeps_live_voices() {
        let (mut d, _) = setup(ReleasePolicy::Retain);
        let now = Instant::now();
        d.handle_control(&start(1, 60.0, 1.0), None, now).unwrap();
        let compile = msg("/compile/synth_def", vec![OscType::String("pluck".into())]);
        d.handle_control(&compile, sender(), now).unwrap();

        // Bare name reuses the known schema
        assert_eq!(d.routes().count_for("pluck"), 6);
        let change = msg("/pluck/change_volume", vec![OscType::Int(1), OscType::Float(0.3)]);
        assert!(d.handle_control(&change, None, now).is_ok());
    }

    #[test]
    fn test_compile_blob_is_sent_before_sync() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let compile = msg(
            "/compile/synth_def",
            vec![OscType::String("\\pad".into()), OscType::Blob(vec![0u8; 32])],
        );
        d.handle_control(&compile, sender(), Instant::now()).unwrap();

        let recv = backend.position(|op| *op == TestOp::SendSynthDef(32)).unwrap();
        let sync = backend.position(|op| matches!(op, TestOp::Sync(_))).unwrap();
        assert!(recv < sync);
    }

    #[test]
    fn test_compile_with_path_loads_def() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let text = r#"{"name": "pad", "params": [{"name": "freq"}, {"name": "volume"}, {"name": "gate"}], "synthdef_path": "/defs/pad.scsyndef"}"#;
        let compile = msg("/compile/synth_def", vec![OscType::String(text.into())]);
        d.handle_control(&compile, sender(), Instant::now()).unwrap();
        assert!(backend
            .find(|op| *op == TestOp::LoadSynthDef("/defs/pad.scsyndef".into()))
            .is_some());
    }

    #[test]
    fn test_invalid_compile_sends_nothing() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let compile = msg(
            "/compile/synth_def",
            vec![OscType::String(r"SynthDef(\thin, { |freq=440| })".into())],
        );
        assert!(matches!(
            d.handle_control(&compile, sender(), Instant::now()),
            Err(DispatchError::Definition(DefinitionError::MissingParams { .. }))
        ));
        assert_eq!(d.routes().count_for("thin"), 0);
        assert!(backend.operations().is_empty());
        assert_eq!(d.pending_syncs(), 0);
    }

    #[test]
    fn test_compile_timeout_sends_no_ack() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let t0 = Instant::now();
        let compile = msg("/compile/synth_def", vec![OscType::String("pad".into())]);
        d.handle_control(&compile, sender(), t0).unwrap();
        let id = last_sync(&backend);

        d.tick(t0 + Duration::from_secs(6));
        assert_eq!(d.pending_syncs(), 0);

        let mut replies = Vec::new();
        d.handle_engine(&synced(id), t0 + Duration::from_secs(7), &mut replies).unwrap();
        assert!(replies.is_empty());
    }

    #[test]
    fn test_ack_target_overrides_sender() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let coordinator: SocketAddr = "127.0.0.1:7777".parse().unwrap();
        d.set_ack_target(Some(coordinator));
        let compile = msg("/compile/synth_def", vec![OscType::String("pad".into())]);
        d.handle_control(&compile, sender(), Instant::now()).unwrap();

        let mut replies = Vec::new();
        d.handle_engine(&synced(last_sync(&backend)), Instant::now(), &mut replies).unwrap();
        assert_eq!(replies[0].target, coordinator);
    }

    #[test]
    fn test_recording_waits_for_sync() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let now = Instant::now();
        let rec = msg(
            "/recording/start",
            vec![OscType::String("/tmp/out.wav".into()), OscType::Int(2)],
        );
        d.handle_control(&rec, None, now).unwrap();
        assert!(matches!(d.recording_status(now), RecordingStatus::Armed { channels: 2, .. }));
        assert_eq!(backend.count(|op| matches!(op, TestOp::CreateSynth { .. })), 0);

        let mut replies = Vec::new();
        d.handle_engine(&synced(last_sync(&backend)), now, &mut replies).unwrap();
        let create = backend.position(|op| matches!(op, TestOp::CreateSynth { group_id, .. } if *group_id == GROUP_RECORD));
        let open = backend.position(|op| matches!(op, TestOp::OpenBufferForWrite { .. }));
        assert!(open.unwrap() < create.unwrap());
        assert!(matches!(d.recording_status(now), RecordingStatus::Recording { .. }));
        assert!(replies.is_empty());
    }

    #[test]
    fn test_recording_start_then_immediate_stop() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let now = Instant::now();
        let rec = msg(
            "/recording/start",
            vec![OscType::String("/tmp/out.wav".into()), OscType::Float(2.0)],
        );
        d.handle_control(&rec, None, now).unwrap();
        let id = last_sync(&backend);
        d.handle_control(&msg("/recording/stop", vec![]), None, now).unwrap();

        let mut replies = Vec::new();
        d.handle_engine(&synced(id), now, &mut replies).unwrap();
        assert_eq!(backend.count(|op| matches!(op, TestOp::CreateSynth { .. })), 0);
        assert_eq!(backend.count(|op| matches!(op, TestOp::CloseBuffer(_))), 1);
        assert_eq!(d.recording_status(now), RecordingStatus::Inactive);
    }

    #[test]
    fn test_recording_restart_survives_deferred_buffer_free() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let t0 = Instant::now();
        let start = |path: &str| {
            msg(
                "/recording/start",
                vec![OscType::String(path.into()), OscType::Int(2)],
            )
        };
        let mut replies = Vec::new();

        d.handle_control(&start("/tmp/first.wav"), None, t0).unwrap();
        d.handle_engine(&synced(last_sync(&backend)), t0, &mut replies).unwrap();
        d.handle_control(&msg("/recording/stop", vec![]), None, t0).unwrap();

        let restart = t0 + Duration::from_millis(100);
        d.handle_control(&start("/tmp/second.wav"), None, restart).unwrap();
        d.handle_engine(&synced(last_sync(&backend)), restart, &mut replies).unwrap();

        d.tick(t0 + Duration::from_secs(1));
        assert_eq!(backend.count(|op| matches!(op, TestOp::FreeBuffer(_))), 0);
        assert!(matches!(
            d.recording_status(restart),
            RecordingStatus::Recording { ref path, .. } if path.ends_with("second.wav")
        ));
    }

    #[test]
    fn test_recording_errors() {
        let (mut d, _) = setup(ReleasePolicy::Retain);
        let now = Instant::now();
        let bad_channels = msg(
            "/recording/start",
            vec![OscType::String("/tmp/out.wav".into()), OscType::Int(0)],
        );
        assert!(matches!(
            d.handle_control(&bad_channels, None, now),
            Err(DispatchError::Recording(_))
        ));

        let rec = msg(
            "/recording/start",
            vec![OscType::String("/tmp/out.wav".into()), OscType::Int(1)],
        );
        d.handle_control(&rec, None, now).unwrap();
        assert!(matches!(
            d.handle_control(&rec, None, now),
            Err(DispatchError::Recording(_))
        ));
        assert_eq!(d.pending_syncs(), 1);

        // Stop with nothing recording is a no-op
        d.handle_control(&msg("/recording/stop", vec![]), None, now).unwrap();
        assert!(d.handle_control(&msg("/recording/stop", vec![]), None, now).is_ok());
    }

    #[test]
    fn test_recording_sync_timeout_aborts() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        let t0 = Instant::now();
        let rec = msg(
            "/recording/start",
            vec![OscType::String("/tmp/out.wav".into()), OscType::Int(2)],
        );
        d.handle_control(&rec, None, t0).unwrap();
        d.tick(t0 + Duration::from_secs(5));
        assert_eq!(d.recording_status(t0), RecordingStatus::Inactive);
        assert_eq!(backend.count(|op| matches!(op, TestOp::CloseBuffer(_))), 1);
    }

    #[test]
    fn test_quit() {
        let (mut d, _) = setup(ReleasePolicy::Retain);
        assert_eq!(
            d.handle_control(&msg("/quit", vec![]), None, Instant::now()),
            Ok(Flow::Quit)
        );
    }

    #[test]
    fn test_setup_groups_and_engine_check() {
        let (mut d, backend) = setup(ReleasePolicy::Retain);
        d.setup_groups().unwrap();
        let id = d.check_engine(Instant::now()).unwrap();

        let ops = backend.operations();
        assert_eq!(ops[0], TestOp::CreateGroup { group_id: GROUP_VOICES, add_action: 0, target: 0 });
        assert_eq!(ops[1], TestOp::CreateGroup { group_id: GROUP_RECORD, add_action: 1, target: 0 });
        assert_eq!(ops[2], TestOp::Sync(id));

        let mut replies = Vec::new();
        d.handle_engine(&synced(id), Instant::now(), &mut replies).unwrap();
        assert_eq!(d.pending_syncs(), 0);
    }

    #[test]
    fn test_prefixed_channels() {
        let backend = Arc::new(TestBackend::new());
        let settings = DispatchSettings {
            prefix: "/scamp".to_string(),
            ..DispatchSettings::default()
        };
        let mut d = Dispatcher::new(Box::new(backend), settings, vec![pluck()]).unwrap();
        let note = msg(
            "/scamp/pluck/start_note",
            vec![OscType::Int(1), OscType::Float(60.0), OscType::Float(0.5)],
        );
        assert!(d.handle_control(&note, None, Instant::now()).is_ok());
        assert!(d.routes().resolve("/pluck/start_note").is_none());
    }
}
