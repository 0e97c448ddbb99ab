//! Parameter studies: repeated solves over a linearly spaced range of the
//! slot depth `b` or the edge load `q`.

use std::{
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use indicatif::ProgressBar;

use crate::{
    analysis::Analysis,
    error::{Constraint, SlotPlateError, ValidationReport},
    exporter::{step_file_name, write_vtk, StepFields},
    model::InputData,
};

/// Model parameter varied by a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepParameter {
    /// Slot depth `b`
    SlotDepth,
    /// Edge load `q`
    EdgeLoad,
}

impl SweepParameter {
    /// Index used in step file names
    pub fn kind(&self) -> usize {
        match self {
            SweepParameter::SlotDepth => 1,
            SweepParameter::EdgeLoad => 2,
        }
    }

    /// Model file key
    pub fn name(&self) -> &'static str {
        match self {
            SweepParameter::SlotDepth => "b",
            SweepParameter::EdgeLoad => "q",
        }
    }

    /// Range stored in the model: from the current value to its end value
    pub fn default_range(&self, input: &InputData) -> (f64, f64) {
        match self {
            SweepParameter::SlotDepth => (input.b, input.bend),
            SweepParameter::EdgeLoad => (input.q, input.qend),
        }
    }

    pub fn default_output_dir(&self) -> PathBuf {
        match self {
            SweepParameter::SlotDepth => PathBuf::from("vtks").join("bParam"),
            SweepParameter::EdgeLoad => PathBuf::from("vtks").join("qParam"),
        }
    }

    fn set(&self, input: &mut InputData, value: f64) {
        match self {
            SweepParameter::SlotDepth => input.b = value,
            SweepParameter::EdgeLoad => input.q = value,
        }
    }
}

impl FromStr for SweepParameter {
    type Err = SlotPlateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "b" => Ok(SweepParameter::SlotDepth),
            "q" => Ok(SweepParameter::EdgeLoad),
            other => Err(SlotPlateError::Model(format!(
                "Unknown sweep parameter '{other}', expected 'b' or 'q'"
            ))),
        }
    }
}

/// What to do when a step after the first fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop the sweep at the first failing step
    #[default]
    Abort,
    /// Record the failure and continue. A failing first step still aborts.
    SkipAfterFirst,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepRequest {
    pub parameter: SweepParameter,
    pub start: f64,
    pub end: f64,
    pub steps: usize,
    pub output_dir: PathBuf,
    pub policy: FailurePolicy,
}

impl SweepRequest {
    /// Request using the range, step count and output directory stored with
    /// the model
    pub fn from_model(parameter: SweepParameter, input: &InputData) -> SweepRequest {
        let (start, end) = parameter.default_range(input);
        SweepRequest {
            parameter,
            start,
            end,
            steps: usize::try_from(input.param_steps).unwrap_or(0),
            output_dir: parameter.default_output_dir(),
            policy: FailurePolicy::default(),
        }
    }

    fn validate(&self) -> Result<(), SlotPlateError> {
        let mut report = ValidationReport::default();
        if self.steps < 2 {
            report.push("paramSteps", self.steps as f64, Constraint::AtLeast(2));
        }
        if !self.start.is_finite() {
            report.push("start", self.start, Constraint::Finite);
        }
        if !self.end.is_finite() {
            report.push("end", self.end, Constraint::Finite);
        }

        if report.is_empty() {
            Ok(())
        } else {
            Err(SlotPlateError::Validation(report))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepStep {
    /// One-based step number
    pub index: usize,
    pub value: f64,
    pub path: PathBuf,
    pub max_von_mises: f64,
    pub max_displacement: f64,
}

#[derive(Debug)]
pub struct StepFailure {
    pub index: usize,
    pub value: f64,
    pub error: SlotPlateError,
}

#[derive(Debug)]
pub struct SweepReport {
    pub parameter: SweepParameter,
    pub steps: Vec<SweepStep>,
    pub failures: Vec<StepFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepState {
    #[default]
    Idle,
    Running {
        step: usize,
    },
    Done,
    Failed {
        step: usize,
    },
    Cancelled {
        completed: usize,
    },
}

/// `steps` evenly spaced values from `start` to `end`, both included. The
/// last value is exactly `end`.
pub fn linspace(start: f64, end: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => vec![],
        1 => vec![start],
        _ => {
            let increment = (end - start) / (steps - 1) as f64;
            let mut values: Vec<f64> = (0..steps).map(|i| start + i as f64 * increment).collect();
            values[steps - 1] = end;
            values
        }
    }
}

/// Holds the model while a sweep mutates it and puts `b` and `q` back when
/// dropped, whichever way the sweep exits.
struct ParameterRestore<'a> {
    input: &'a mut InputData,
    b: f64,
    q: f64,
}

impl<'a> ParameterRestore<'a> {
    fn new(input: &'a mut InputData) -> ParameterRestore<'a> {
        let (b, q) = (input.b, input.q);
        ParameterRestore { input, b, q }
    }

    fn set(&mut self, parameter: SweepParameter, value: f64) {
        parameter.set(self.input, value);
    }

    fn input(&self) -> &InputData {
        &*self.input
    }
}

impl Drop for ParameterRestore<'_> {
    fn drop(&mut self) {
        self.input.b = self.b;
        self.input.q = self.q;
    }
}

/// Runs sweeps one step after another with a borrowed pipeline
pub struct SweepController<'a> {
    analysis: &'a Analysis,
    cancel: Option<Arc<AtomicBool>>,
    state: SweepState,
}

impl<'a> SweepController<'a> {
    pub fn new(analysis: &'a Analysis) -> SweepController<'a> {
        SweepController {
            analysis,
            cancel: None,
            state: SweepState::Idle,
        }
    }

    /// Flag checked before each step. Setting it stops the sweep once the
    /// running step completes.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> SweepController<'a> {
        self.cancel = Some(cancel);
        self
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn run_step(
        &self,
        input: &InputData,
        request: &SweepRequest,
        index: usize,
        value: f64,
    ) -> Result<SweepStep, SlotPlateError> {
        let output = self.analysis.execute(input)?;

        let path = request
            .output_dir
            .join(step_file_name(request.parameter.kind(), index));
        let title = format!(
            "slotplate {} = {} (step {}/{})",
            request.parameter.name(),
            value,
            index,
            request.steps
        );
        write_vtk(&StepFields::from_output(&output, &title), &path)?;

        Ok(SweepStep {
            index,
            value,
            path,
            max_von_mises: output.max_von_mises,
            max_displacement: output.max_displacement(),
        })
    }

    /// Solves the model once per value of the swept parameter and exports
    /// each step.
    ///
    /// `b` and `q` on `input` are restored before this returns, on success,
    /// failure, cancellation or panic.
    ///
    /// # Arguments
    /// * `input` - Model to sweep
    /// * `request` - Parameter, range, step count and output directory
    ///
    /// # Returns
    /// The completed steps, and the failed ones when failures are skipped
    pub fn run(
        &mut self,
        input: &mut InputData,
        request: &SweepRequest,
    ) -> Result<SweepReport, SlotPlateError> {
        request.validate()?;

        if let Err(err) = std::fs::create_dir_all(&request.output_dir) {
            return Err(SlotPlateError::Export(format!(
                "Failed to create {}: {err}",
                request.output_dir.display()
            )));
        }

        let values = linspace(request.start, request.end, request.steps);
        println!(
            "info: sweeping {} from {} to {} in {} steps",
            request.parameter.name(),
            request.start,
            request.end,
            request.steps
        );

        let mut guard = ParameterRestore::new(input);
        let mut report = SweepReport {
            parameter: request.parameter,
            steps: Vec::with_capacity(values.len()),
            failures: Vec::new(),
        };

        let bar = ProgressBar::new(values.len() as u64);
        for (i, value) in values.into_iter().enumerate() {
            let index = i + 1;

            if self.cancelled() {
                bar.abandon();
                let completed = report.steps.len();
                self.state = SweepState::Cancelled { completed };
                println!("warning [sweep]: cancelled before step {index}");
                return Err(SlotPlateError::Cancelled { completed });
            }

            self.state = SweepState::Running { step: index };
            guard.set(request.parameter, value);

            match self.run_step(guard.input(), request, index, value) {
                Ok(step) => report.steps.push(step),
                Err(err) => {
                    if request.policy == FailurePolicy::Abort || index == 1 {
                        bar.abandon();
                        self.state = SweepState::Failed { step: index };
                        return Err(SlotPlateError::Sweep {
                            step: index,
                            value,
                            source: Box::new(err),
                        });
                    }

                    println!("warning [sweep]: step {index} ({value}) skipped: {err}");
                    report.failures.push(StepFailure {
                        index,
                        value,
                        error: err,
                    });
                }
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        self.state = SweepState::Done;
        println!(
            "info: sweep finished, {} steps written to {}",
            report.steps.len(),
            request.output_dir.display()
        );

        Ok(report)
    }
}
