//! Background execution of solves and sweeps.
//!
//! A [`SolveWorker`] runs at most one job at a time on its own thread. The
//! caller hands over a value copy of the model, so nothing it keeps is touched
//! from the worker thread. Every job reports back through its callback
//! exactly once, after the worker has become free again.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use crate::{
    analysis::{Analysis, OutputData},
    error::SlotPlateError,
    model::InputData,
    sweep::{SweepController, SweepReport, SweepRequest},
};

/// Handle to a submitted job
#[derive(Debug)]
pub struct JobHandle {
    handle: JoinHandle<()>,
}

impl JobHandle {
    /// Waits for the job and its callback to finish
    pub fn join(self) -> Result<(), SlotPlateError> {
        match self.handle.join() {
            Ok(()) => Ok(()),
            Err(_) => Err(SlotPlateError::Worker(
                "Job callback panicked".to_owned(),
            )),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SolveWorker {
    busy: Arc<AtomicBool>,
}

impl SolveWorker {
    pub fn new() -> SolveWorker {
        SolveWorker::default()
    }

    /// Whether a job is running
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn claim(&self) -> Result<(), SlotPlateError> {
        match self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Ok(()),
            Err(_) => Err(SlotPlateError::Worker(
                "A solve is already running".to_owned(),
            )),
        }
    }

    /// Runs `job` on a new thread, clears the busy flag, then hands the result
    /// to `callback`
    fn spawn<T, J, F>(&self, name: &str, job: J, callback: F) -> Result<JobHandle, SlotPlateError>
    where
        T: Send + 'static,
        J: FnOnce() -> T + Send + 'static,
        F: FnOnce(Option<T>) + Send + 'static,
    {
        self.claim()?;

        let busy = Arc::clone(&self.busy);
        let spawned = std::thread::Builder::new()
            .name(format!("slotplate-{name}"))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(job)).ok();
                busy.store(false, Ordering::SeqCst);
                callback(outcome);
            });

        match spawned {
            Ok(handle) => Ok(JobHandle { handle }),
            Err(err) => {
                self.busy.store(false, Ordering::SeqCst);
                Err(SlotPlateError::Worker(format!(
                    "Failed to start worker thread: {err}"
                )))
            }
        }
    }

    /// Solves a snapshot of `input` in the background
    ///
    /// # Arguments
    /// * `input` - Model to solve. It is copied before the job starts.
    /// * `analysis` - Pipeline configuration, moved to the worker thread
    /// * `callback` - Receives the outcome once the worker is free
    pub fn submit_solve<F>(
        &self,
        input: &InputData,
        analysis: Analysis,
        callback: F,
    ) -> Result<JobHandle, SlotPlateError>
    where
        F: FnOnce(Result<OutputData, SlotPlateError>) + Send + 'static,
    {
        let snapshot = input.clone();

        self.spawn(
            "solve",
            move || analysis.execute(&snapshot),
            |outcome| {
                callback(outcome.unwrap_or_else(|| {
                    Err(SlotPlateError::Worker("Solve panicked".to_owned()))
                }))
            },
        )
    }

    /// Runs a sweep in the background
    ///
    /// The model is moved to the worker and handed back to the callback with
    /// its swept parameters restored.
    ///
    /// # Arguments
    /// * `input` - Model to sweep
    /// * `analysis` - Pipeline configuration
    /// * `request` - Sweep parameter, range and output directory
    /// * `cancel` - Flag checked between steps
    /// * `callback` - Receives the model and the sweep outcome
    pub fn submit_sweep<F>(
        &self,
        input: InputData,
        analysis: Analysis,
        request: SweepRequest,
        cancel: Arc<AtomicBool>,
        callback: F,
    ) -> Result<JobHandle, SlotPlateError>
    where
        F: FnOnce(InputData, Result<SweepReport, SlotPlateError>) + Send + 'static,
    {
        // Restored copy, kept for the case where the sweep panics
        let fallback = input.clone();

        self.spawn(
            "sweep",
            move || {
                let mut input = input;
                let result = SweepController::new(&analysis)
                    .with_cancel_flag(cancel)
                    .run(&mut input, &request);
                (input, result)
            },
            move |outcome| match outcome {
                Some((input, result)) => callback(input, result),
                None => callback(
                    fallback,
                    Err(SlotPlateError::Worker("Sweep panicked".to_owned())),
                ),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datatypes::{ElementType, MeshModel},
        geometry::Geometry,
        mesher::{BlockMesher, MeshService},
    };
    use std::sync::{mpsc, Mutex};

    /// Waits for a go signal before meshing
    struct GatedMesher {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl MeshService for GatedMesher {
        fn generate_mesh(
            &self,
            geometry: &Geometry,
            el_size_factor: f64,
            element_type: ElementType,
        ) -> Result<MeshModel, SlotPlateError> {
            let gate = self.gate.lock().unwrap();
            gate.recv().unwrap();
            BlockMesher.generate_mesh(geometry, el_size_factor, element_type)
        }
    }

    fn coarse_input() -> InputData {
        InputData {
            el_size_factor: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn solve_reports_once_after_becoming_idle() {
        let worker = SolveWorker::new();
        let (tx, rx) = mpsc::channel();

        let observer = worker.clone();
        let handle = worker
            .submit_solve(&coarse_input(), Analysis::default(), move |result| {
                tx.send((observer.is_busy(), result.is_ok())).unwrap();
            })
            .unwrap();
        handle.join().unwrap();

        let messages: Vec<(bool, bool)> = rx.try_iter().collect();
        assert_eq!(messages, vec![(false, true)]);
        assert!(!worker.is_busy());
    }

    #[test]
    fn second_submit_while_busy_is_rejected() {
        let worker = SolveWorker::new();
        let (go, gate) = mpsc::channel();
        let analysis = Analysis::new(Box::new(GatedMesher {
            gate: Mutex::new(gate),
        }));

        let (tx, rx) = mpsc::channel();
        let handle = worker
            .submit_solve(&coarse_input(), analysis, move |result| {
                tx.send(result.is_ok()).unwrap();
            })
            .unwrap();

        assert!(worker.is_busy());
        let second = worker.submit_solve(&coarse_input(), Analysis::default(), |_| {});
        assert!(matches!(second, Err(SlotPlateError::Worker(_))));

        go.send(()).unwrap();
        handle.join().unwrap();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![true]);
        assert!(!worker.is_busy());
    }

    #[test]
    fn failed_solve_reaches_callback() {
        let worker = SolveWorker::new();
        let (tx, rx) = mpsc::channel();
        let input = InputData {
            poisson_ratio: 0.5,
            ..coarse_input()
        };

        worker
            .submit_solve(&input, Analysis::default(), move |result| {
                tx.send(matches!(result, Err(SlotPlateError::Validation(_))))
                    .unwrap();
            })
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![true]);
    }
}
