use crate::{
    datatypes::{LinearSystem, PrescribedDofs, SolutionField},
    error::SlotPlateError,
};
use indicatif::ProgressBar;
use nalgebra::DMatrix;
use nalgebra_sparse::{factorization::CscCholesky, CooMatrix, CscMatrix};

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};
use argmin_observer_slog::SlogLogger;

/// Smallest accepted squared ratio of the Cholesky pivots
pub const MIN_PIVOT_RATIO: f64 = 1e-12;
/// Largest accepted relative residual of the free equations
pub const MAX_RELATIVE_RESIDUAL: f64 = 1e-6;
/// Conjugate gradient stops once the residual falls below this share of the rhs
pub const CG_RELATIVE_TARGET: f64 = 1e-10;
/// Conjugate gradient iteration cap, per unknown
pub const CG_ITERS_PER_DOF: u64 = 10;

/// Method used to solve the free equations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverBackend {
    /// Sparse Cholesky factorization
    #[default]
    Cholesky,
    /// Iterative conjugate gradient
    ConjugateGradient,
}

/// Runs multiplication for Conjugate Gradient Solver
struct ConjugateGradientOperator {
    a: CscMatrix<f64>,
}

impl Operator for ConjugateGradientOperator {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> Result<Self::Output, Error> {
        Ok(sparse_mul(&self.a, x))
    }
}

/// Observer bar for argmin solver
///
/// Progress is the fraction of the way, in orders of magnitude, from the
/// first residual down to the target residual.
struct ConjugateGradientObserverBar {
    bar: ProgressBar,
    initial_mag: Option<f64>,
    final_mag: f64,
}

impl ConjugateGradientObserverBar {
    fn new(target_cost: f64) -> ConjugateGradientObserverBar {
        ConjugateGradientObserverBar {
            bar: ProgressBar::new(1000),
            initial_mag: None,
            final_mag: target_cost.log10(),
        }
    }
}

impl<I> Observe<I> for ConjugateGradientObserverBar
where
    I: State<Float = f64>,
{
    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        let cost = state.get_cost();
        if !(cost > 0.0) || !cost.is_finite() {
            return Ok(());
        }

        let cost_mag = cost.log10();
        let initial_mag = *self.initial_mag.get_or_insert(cost_mag);
        let span = initial_mag - self.final_mag;
        if span > 0.0 {
            let progress = ((initial_mag - cost_mag) / span).clamp(0.0, 1.0);
            self.bar.set_position((progress * 1000.0) as u64);
        }

        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> Result<(), Error> {
        self.bar.finish_and_clear();
        Ok(())
    }
}

/// Multiplies a sparse matrix by a dense vector
pub fn sparse_mul(a: &CscMatrix<f64>, x: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; a.nrows()];
    for (row, col, value) in a.triplet_iter() {
        y[row] += value * x[col];
    }
    y
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Solves a system of equations using the conjugate gradient method.
///
/// This function returns an approximation for x in `Ax=b`
///
/// # Arguments
/// * `a` - A square positive definite matrix
/// * `b` - The right hand side of the system
/// * `verbose` - Log every iteration to the terminal
///
/// # Returns
/// A vector that represents `x` from the system
fn run_conjugate_gradient(
    a: CscMatrix<f64>,
    b: &[f64],
    verbose: bool,
) -> Result<Vec<f64>, SlotPlateError> {
    let target_cost = CG_RELATIVE_TARGET * norm(b);
    let max_iters = CG_ITERS_PER_DOF * b.len() as u64;

    let solver: ConjugateGradient<Vec<f64>, f64> = ConjugateGradient::new(b.to_vec());
    let initial_guess: Vec<f64> = vec![0.0; b.len()];

    let operator = ConjugateGradientOperator { a };
    let observer = ConjugateGradientObserverBar::new(target_cost);

    let mut executor = Executor::new(operator, solver)
        .configure(|state| {
            state
                .param(initial_guess)
                .max_iters(max_iters)
                .target_cost(target_cost)
        })
        .add_observer(observer, ObserverMode::NewBest);
    if verbose {
        executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
    }

    // Run solver
    let res = match executor.run() {
        Ok(r) => r,
        Err(err) => {
            return Err(SlotPlateError::SingularSystem(format!(
                "Conjugate Gradient error: {err}"
            )))
        }
    };

    match res.state().get_best_param() {
        Some(x) => Ok(x.clone()),
        None => Err(SlotPlateError::SingularSystem(
            "Conjugate Gradient could not produce best parameter".to_owned(),
        )),
    }
}

/// Solves the free equations by sparse Cholesky factorization.
///
/// A factorization that breaks down, or whose pivots spread over more than
/// the accepted ratio, means the stiffness admits rigid body motion or is too
/// ill-conditioned to trust.
fn run_cholesky(a: &CscMatrix<f64>, b: &[f64]) -> Result<Vec<f64>, SlotPlateError> {
    let factorization = match CscCholesky::factor(a) {
        Ok(f) => f,
        Err(err) => {
            return Err(SlotPlateError::SingularSystem(format!(
                "Cholesky factorization failed ({err:?}); the model is ill-conditioned or under-constrained"
            )))
        }
    };

    let (min_pivot, max_pivot) = factorization
        .l()
        .triplet_iter()
        .filter(|(row, col, _)| row == col)
        .map(|(_, _, value)| value.abs())
        .fold((f64::INFINITY, 0.0_f64), |(lo, hi), v| (lo.min(v), hi.max(v)));

    let pivot_ratio = f64::powi(min_pivot / max_pivot, 2);
    if !(pivot_ratio >= MIN_PIVOT_RATIO) {
        return Err(SlotPlateError::SingularSystem(format!(
            "Stiffness is numerically singular (pivot ratio {pivot_ratio:e}); the model is ill-conditioned or under-constrained"
        )));
    }

    let rhs = DMatrix::from_column_slice(b.len(), 1, b);
    let solution = factorization.solve(&rhs);

    Ok(solution.column(0).iter().copied().collect())
}

/// Solves `K u = f` with some displacements prescribed.
///
/// DOFs are partitioned into free and prescribed sets. The free equations
/// `K_FF u_F = f_F - K_FP u_P` are solved with the chosen backend, and the
/// reactions `K u - f` are recovered on the prescribed DOFs.
///
/// # Arguments
/// * `system` - Global stiffness and force
/// * `prescribed` - Prescribed DOFs and their values
/// * `backend` - Direct or iterative solve
/// * `verbose` - Log iterative solver progress
///
/// # Returns
/// Displacements for every DOF and reactions that are non-zero only on
/// prescribed DOFs
pub fn solve(
    system: &LinearSystem,
    prescribed: &PrescribedDofs,
    backend: SolverBackend,
    verbose: bool,
) -> Result<SolutionField, SlotPlateError> {
    let ndof = system.ndof();
    let stiffness = &system.stiffness;

    if stiffness.nrows() != ndof || stiffness.ncols() != ndof {
        return Err(SlotPlateError::Assembly(format!(
            "Stiffness is {}x{} but the force vector has {} entries",
            stiffness.nrows(),
            stiffness.ncols(),
            ndof
        )));
    }
    if prescribed.dofs.len() != prescribed.values.len() {
        return Err(SlotPlateError::Assembly(format!(
            "{} prescribed DOFs but {} prescribed values",
            prescribed.dofs.len(),
            prescribed.values.len()
        )));
    }
    if prescribed.is_empty() {
        return Err(SlotPlateError::SingularSystem(
            "No displacements are prescribed; the fixed boundary has no nodes".to_owned(),
        ));
    }

    println!("info: setting up system...");

    // Prescribed values in place, free entries filled after the solve
    let mut displacements = vec![0.0; ndof];
    let mut is_prescribed = vec![false; ndof];
    for (&dof, &value) in prescribed.dofs.iter().zip(prescribed.values.iter()) {
        if dof >= ndof {
            return Err(SlotPlateError::Assembly(format!(
                "Prescribed DOF {dof} is outside the system of size {ndof}"
            )));
        }
        is_prescribed[dof] = true;
        displacements[dof] = value;
    }

    let free: Vec<usize> = (0..ndof).filter(|&d| !is_prescribed[d]).collect();
    let mut free_index: Vec<Option<usize>> = vec![None; ndof];
    for (i, &dof) in free.iter().enumerate() {
        free_index[dof] = Some(i);
    }

    // Partition the stiffness, moving prescribed columns to the rhs
    let nfree = free.len();
    let mut free_triplets: CooMatrix<f64> = CooMatrix::new(nfree, nfree);
    let mut rhs: Vec<f64> = free.iter().map(|&d| system.force[d]).collect();
    for (row, col, value) in stiffness.triplet_iter() {
        match (free_index[row], free_index[col]) {
            (Some(i), Some(j)) => free_triplets.push(i, j, *value),
            (Some(i), None) => rhs[i] -= value * displacements[col],
            _ => {}
        }
    }
    let free_stiffness = CscMatrix::from(&free_triplets);

    let rhs_norm = norm(&rhs);

    let start = std::time::Instant::now();
    println!("info: solving {nfree} free equations...");
    let free_displacements = if nfree == 0 || rhs_norm == 0.0 {
        vec![0.0; nfree]
    } else {
        match backend {
            SolverBackend::Cholesky => run_cholesky(&free_stiffness, &rhs)?,
            SolverBackend::ConjugateGradient => {
                run_conjugate_gradient(free_stiffness.clone(), &rhs, verbose)?
            }
        }
    };
    let elapsed = (std::time::Instant::now() - start).as_secs_f32();
    println!("info: solved system in {:.3} seconds", elapsed);

    if free_displacements.iter().any(|u| !u.is_finite()) {
        return Err(SlotPlateError::SingularSystem(
            "Solve produced non-finite displacements".to_owned(),
        ));
    }

    // Residual of the free equations
    let applied = sparse_mul(&free_stiffness, &free_displacements);
    let residual: Vec<f64> = applied.iter().zip(rhs.iter()).map(|(a, b)| a - b).collect();
    let residual_norm = norm(&residual);
    let relative_residual = if rhs_norm > 0.0 {
        residual_norm / rhs_norm
    } else {
        residual_norm
    };
    if !(relative_residual <= MAX_RELATIVE_RESIDUAL) {
        return Err(SlotPlateError::SingularSystem(format!(
            "Relative residual {relative_residual:e} exceeds {MAX_RELATIVE_RESIDUAL:e}; the model is ill-conditioned or under-constrained"
        )));
    }

    for (&dof, u) in free.iter().zip(free_displacements) {
        displacements[dof] = u;
    }

    // Reactions on the prescribed DOFs
    let internal = sparse_mul(stiffness, &displacements);
    let reactions: Vec<f64> = (0..ndof)
        .map(|d| {
            if is_prescribed[d] {
                internal[d] - system.force[d]
            } else {
                0.0
            }
        })
        .collect();

    println!("info: solve complete");

    Ok(SolutionField {
        displacements,
        reactions,
    })
}
