use std::{
    path::{Path, PathBuf},
    sync::{atomic::AtomicBool, mpsc, Arc},
};

use clap::{Args, Parser, Subcommand, ValueEnum};

use slotplate::{
    analysis::Analysis,
    exporter::{write_csv, write_vtk, StepFields},
    mesher::{BlockMesher, GmshMesher, MeshService},
    model::InputData,
    post_processor::PrincipalConvention,
    report::Report,
    solver::SolverBackend,
    sweep::{FailurePolicy, SweepParameter, SweepRequest},
    worker::SolveWorker,
    SlotPlateError,
};

#[derive(Parser)]
#[command(version, about = "Plane stress analysis of a slotted plate")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a model file with default parameters
    Init {
        file: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Solve a model once
    Solve {
        #[command(flatten)]
        pipeline: PipelineArgs,
        /// Write the result as a VTK file
        #[arg(long, value_name = "FILE")]
        vtk: Option<PathBuf>,
        /// Write nodes.csv and elements.csv into this directory
        #[arg(long, value_name = "DIR")]
        csv: Option<PathBuf>,
        /// Print the text report
        #[arg(long)]
        report: bool,
    },
    /// Solve the model over a range of one parameter
    Sweep {
        parameter: ParameterChoice,
        #[command(flatten)]
        pipeline: PipelineArgs,
        /// First value, defaults to the model value
        #[arg(long)]
        start: Option<f64>,
        /// Last value, defaults to bend or qend from the model
        #[arg(long)]
        end: Option<f64>,
        /// Number of steps, defaults to paramSteps from the model
        #[arg(long)]
        steps: Option<usize>,
        /// Output directory, defaults to vtks/bParam or vtks/qParam
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
        /// Keep going when a step after the first fails
        #[arg(long)]
        skip_failures: bool,
    },
}

#[derive(Args)]
struct PipelineArgs {
    /// Model file, defaults to the built-in model
    #[arg(short, long, value_name = "FILE")]
    model: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = MesherChoice::Block)]
    mesher: MesherChoice,
    /// gmsh executable used with --mesher gmsh
    #[arg(long, value_name = "PATH", default_value = "gmsh")]
    gmsh: PathBuf,
    #[arg(long, value_enum, default_value_t = SolverChoice::Cholesky)]
    solver: SolverChoice,
    #[arg(long, value_enum, default_value_t = PrincipalChoice::Physical)]
    principal: PrincipalChoice,
    /// Log iterative solver progress
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum MesherChoice {
    Block,
    Gmsh,
}

#[derive(Clone, Copy, ValueEnum)]
enum SolverChoice {
    Cholesky,
    Cg,
}

#[derive(Clone, Copy, ValueEnum)]
enum PrincipalChoice {
    Physical,
    Legacy,
}

#[derive(Clone, Copy, ValueEnum)]
enum ParameterChoice {
    B,
    Q,
}

impl PipelineArgs {
    fn load_model(&self) -> Result<InputData, SlotPlateError> {
        match &self.model {
            Some(path) => InputData::load(path),
            None => Ok(InputData::default()),
        }
    }

    fn analysis(&self) -> Analysis {
        let mesher: Box<dyn MeshService> = match self.mesher {
            MesherChoice::Block => Box::new(BlockMesher::new()),
            MesherChoice::Gmsh => Box::new(GmshMesher {
                executable: self.gmsh.clone(),
                ..Default::default()
            }),
        };
        let backend = match self.solver {
            SolverChoice::Cholesky => SolverBackend::Cholesky,
            SolverChoice::Cg => SolverBackend::ConjugateGradient,
        };
        let principal = match self.principal {
            PrincipalChoice::Physical => PrincipalConvention::Physical,
            PrincipalChoice::Legacy => PrincipalConvention::Legacy,
        };

        Analysis::new(mesher)
            .with_backend(backend)
            .with_principal(principal)
            .with_verbose(self.verbose)
    }
}

fn init(file: &Path, force: bool) -> Result<(), SlotPlateError> {
    if file.exists() && !force {
        return Err(SlotPlateError::Model(format!(
            "{} already exists, pass --force to overwrite",
            file.display()
        )));
    }
    InputData::default().save(file)
}

fn solve(
    pipeline: &PipelineArgs,
    vtk: Option<&Path>,
    csv: Option<&Path>,
    report: bool,
) -> Result<(), SlotPlateError> {
    let input = pipeline.load_model()?;

    let worker = SolveWorker::new();
    let (tx, rx) = mpsc::channel();
    let job = worker.submit_solve(&input, pipeline.analysis(), move |result| {
        let _ = tx.send(result);
    })?;
    job.join()?;

    let output = match rx.recv() {
        Ok(result) => result?,
        Err(_) => {
            return Err(SlotPlateError::Worker(
                "Solve finished without a result".to_owned(),
            ))
        }
    };

    println!(
        "info: max displacement {:.4e} m, max von Mises {:.4e} Pa",
        output.max_displacement(),
        output.max_von_mises
    );

    if let Some(path) = vtk {
        write_vtk(&StepFields::from_output(&output, "slotplate solve"), path)?;
    }
    if let Some(dir) = csv {
        write_csv(&output, dir)?;
    }
    if report {
        println!("{}", Report::new(&input, &output));
    }

    Ok(())
}

fn sweep(
    parameter: ParameterChoice,
    pipeline: &PipelineArgs,
    start: Option<f64>,
    end: Option<f64>,
    steps: Option<usize>,
    out: Option<PathBuf>,
    skip_failures: bool,
) -> Result<(), SlotPlateError> {
    let input = pipeline.load_model()?;
    let parameter = match parameter {
        ParameterChoice::B => SweepParameter::SlotDepth,
        ParameterChoice::Q => SweepParameter::EdgeLoad,
    };

    let defaults = SweepRequest::from_model(parameter, &input);
    let request = SweepRequest {
        start: start.unwrap_or(defaults.start),
        end: end.unwrap_or(defaults.end),
        steps: steps.unwrap_or(defaults.steps),
        output_dir: out.unwrap_or(defaults.output_dir),
        policy: if skip_failures {
            FailurePolicy::SkipAfterFirst
        } else {
            FailurePolicy::Abort
        },
        parameter,
    };

    let worker = SolveWorker::new();
    let cancel = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    let job = worker.submit_sweep(
        input,
        pipeline.analysis(),
        request,
        cancel,
        move |_input, result| {
            let _ = tx.send(result);
        },
    )?;
    job.join()?;

    let report = match rx.recv() {
        Ok(result) => result?,
        Err(_) => {
            return Err(SlotPlateError::Worker(
                "Sweep finished without a result".to_owned(),
            ))
        }
    };

    for step in report.steps.iter() {
        println!(
            "info: step {:>2}  {} = {:<12}  max von Mises {:.4e} Pa  max displacement {:.4e} m  -> {}",
            step.index,
            report.parameter.name(),
            step.value,
            step.max_von_mises,
            step.max_displacement,
            step.path.display()
        );
    }
    for failure in report.failures.iter() {
        println!(
            "warning [sweep]: step {} ({}) failed: {}",
            failure.index, failure.value, failure.error
        );
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Init { file, force } => init(&file, force),
        Command::Solve {
            pipeline,
            vtk,
            csv,
            report,
        } => solve(&pipeline, vtk.as_deref(), csv.as_deref(), report),
        Command::Sweep {
            parameter,
            pipeline,
            start,
            end,
            steps,
            out,
            skip_failures,
        } => sweep(
            parameter,
            &pipeline,
            start,
            end,
            steps,
            out,
            skip_failures,
        ),
    };

    if let Err(err) = result {
        println!("{err}");
        std::process::exit(1)
    }
}
