use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    mpsc, Arc,
};

use slotplate::{
    analysis::Analysis,
    datatypes::{ElementType, MeshModel},
    error::SlotPlateError,
    geometry::Geometry,
    mesher::{BlockMesher, MeshService},
    model::InputData,
    sweep::{FailurePolicy, SweepController, SweepParameter, SweepRequest, SweepState},
    worker::SolveWorker,
};

/// Block mesher that fails on one chosen call, or raises a flag on it
struct ScriptedMesher {
    calls: AtomicUsize,
    trigger_on: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl ScriptedMesher {
    fn failing_on(call: usize) -> ScriptedMesher {
        ScriptedMesher {
            calls: AtomicUsize::new(0),
            trigger_on: call,
            cancel: None,
        }
    }

    fn cancelling_on(call: usize, cancel: Arc<AtomicBool>) -> ScriptedMesher {
        ScriptedMesher {
            calls: AtomicUsize::new(0),
            trigger_on: call,
            cancel: Some(cancel),
        }
    }
}

impl MeshService for ScriptedMesher {
    fn generate_mesh(
        &self,
        geometry: &Geometry,
        el_size_factor: f64,
        element_type: ElementType,
    ) -> Result<MeshModel, SlotPlateError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.trigger_on {
            match &self.cancel {
                Some(flag) => flag.store(true, Ordering::SeqCst),
                None => return Err(SlotPlateError::Mesher("injected failure".to_owned())),
            }
        }
        BlockMesher.generate_mesh(geometry, el_size_factor, element_type)
    }
}

fn coarse() -> InputData {
    InputData {
        el_size_factor: 1.0,
        ..Default::default()
    }
}

fn request(parameter: SweepParameter, input: &InputData, dir: &std::path::Path) -> SweepRequest {
    SweepRequest {
        output_dir: dir.to_path_buf(),
        ..SweepRequest::from_model(parameter, input)
    }
}

#[test]
fn slot_depth_sweep_writes_every_step() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = coarse();
    let original = input.clone();
    let request = request(SweepParameter::SlotDepth, &input, dir.path());

    let analysis = Analysis::default();
    let mut controller = SweepController::new(&analysis);
    let report = controller.run(&mut input, &request).unwrap();

    assert_eq!(controller.state(), SweepState::Done);
    assert_eq!(report.steps.len(), 10);
    assert!(report.failures.is_empty());
    assert_eq!(report.steps[0].value, 0.025);
    assert_eq!(report.steps[9].value, 0.0001);
    assert!(report.steps.windows(2).all(|w| w[1].value < w[0].value));

    for (i, step) in report.steps.iter().enumerate() {
        let name = format!("paramStudy_01_{:02}.vtk", i + 1);
        assert_eq!(step.index, i + 1);
        assert_eq!(step.path, dir.path().join(&name));
        assert!(step.path.exists(), "{name} missing");
        assert!(step.max_displacement > 0.0);
    }

    // a deeper slot leaves a thinner, softer ligament
    assert!(report.steps[0].max_displacement > report.steps[9].max_displacement);

    assert_eq!(input, original);
}

#[test]
fn edge_load_sweep_is_linear_in_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = coarse();
    let request = SweepRequest {
        steps: 4,
        ..request(SweepParameter::EdgeLoad, &input, dir.path())
    };

    let analysis = Analysis::default();
    let report = SweepController::new(&analysis)
        .run(&mut input, &request)
        .unwrap();

    let values: Vec<f64> = report.steps.iter().map(|s| s.value).collect();
    assert_eq!(values.first(), Some(&100e3));
    assert_eq!(values.last(), Some(&-100e3));

    // +q and -q give the same magnitudes
    let (first, last) = (&report.steps[0], &report.steps[3]);
    assert!((first.max_von_mises - last.max_von_mises).abs() < 1e-6 * first.max_von_mises);
    assert!((first.max_displacement - last.max_displacement).abs() < 1e-6 * first.max_displacement);

    assert!(dir.path().join("paramStudy_02_04.vtk").exists());
    assert_eq!(input.q, 100e3);
}

#[test]
fn failure_at_step_five_aborts_and_restores() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = coarse();
    let original = input.clone();
    let request = request(SweepParameter::SlotDepth, &input, dir.path());

    let analysis = Analysis::new(Box::new(ScriptedMesher::failing_on(5)));
    let mut controller = SweepController::new(&analysis);
    let result = controller.run(&mut input, &request);

    match result {
        Err(SlotPlateError::Sweep { step, source, .. }) => {
            assert_eq!(step, 5);
            assert!(matches!(*source, SlotPlateError::Mesher(_)));
        }
        other => panic!("expected sweep error, got {other:?}"),
    }
    assert_eq!(controller.state(), SweepState::Failed { step: 5 });

    assert_eq!(input.b, original.b);
    assert_eq!(input.q, original.q);

    assert!(dir.path().join("paramStudy_01_04.vtk").exists());
    assert!(!dir.path().join("paramStudy_01_05.vtk").exists());
    assert!(!dir.path().join("paramStudy_01_06.vtk").exists());
}

#[test]
fn skipped_failure_continues_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = coarse();
    let original = input.clone();
    let request = SweepRequest {
        policy: FailurePolicy::SkipAfterFirst,
        ..request(SweepParameter::SlotDepth, &input, dir.path())
    };

    let analysis = Analysis::new(Box::new(ScriptedMesher::failing_on(5)));
    let report = SweepController::new(&analysis)
        .run(&mut input, &request)
        .unwrap();

    assert_eq!(report.steps.len(), 9);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 5);
    assert!(dir.path().join("paramStudy_01_10.vtk").exists());
    assert_eq!(input, original);
}

#[test]
fn cancel_flag_stops_between_steps() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = coarse();
    let original = input.clone();
    let request = request(SweepParameter::EdgeLoad, &input, dir.path());

    let cancel = Arc::new(AtomicBool::new(false));
    let analysis = Analysis::new(Box::new(ScriptedMesher::cancelling_on(
        2,
        Arc::clone(&cancel),
    )));
    let mut controller = SweepController::new(&analysis).with_cancel_flag(cancel);
    let result = controller.run(&mut input, &request);

    // the running step finishes before the flag is seen
    assert!(matches!(result, Err(SlotPlateError::Cancelled { completed: 2 })));
    assert_eq!(controller.state(), SweepState::Cancelled { completed: 2 });
    assert!(dir.path().join("paramStudy_02_02.vtk").exists());
    assert!(!dir.path().join("paramStudy_02_03.vtk").exists());
    assert_eq!(input, original);
}

#[test]
fn background_sweep_returns_restored_model() {
    let dir = tempfile::tempdir().unwrap();
    let input = coarse();
    let original = input.clone();
    let request = SweepRequest {
        steps: 3,
        ..request(SweepParameter::SlotDepth, &input, dir.path())
    };

    let worker = SolveWorker::new();
    let (tx, rx) = mpsc::channel();
    let handle = worker
        .submit_sweep(
            input,
            Analysis::default(),
            request,
            Arc::new(AtomicBool::new(false)),
            move |input, result| {
                tx.send((input, result.map(|r| r.steps.len()))).unwrap();
            },
        )
        .unwrap();
    handle.join().unwrap();

    let (returned, steps) = rx.recv().unwrap();
    assert_eq!(returned, original);
    assert_eq!(steps.unwrap(), 3);
    assert!(!worker.is_busy());
}
