//! The solve pipeline: geometry, mesh, assembly, boundary conditions, solve
//! and stress recovery for one set of model parameters.

use std::time::Instant;

use crate::{
    assembler::assemble,
    boundary::build_bc,
    datatypes::{Axis, BoundaryTag, ElementStressState, MeshModel, SolutionField, Vertex, DOF},
    error::SlotPlateError,
    geometry::{build_geometry, Geometry},
    mesher::{BlockMesher, MeshService},
    model::InputData,
    post_processor::{compute_element_stresses, nodal_average, PrincipalConvention},
    solver::{solve, SolverBackend},
};

/// Results of one solve. Built fresh by every successful call to
/// [`Analysis::execute`].
#[derive(Debug, Clone)]
pub struct OutputData {
    pub geometry: Geometry,
    pub mesh: MeshModel,
    pub solution: SolutionField,
    pub element_states: Vec<ElementStressState>,
    /// Von Mises stress averaged onto the nodes
    pub nodal_von_mises: Vec<f64>,
    pub max_von_mises: f64,
    /// Total force applied on the load edge
    pub applied_load: f64,
}

impl OutputData {
    /// Displacement of every node as a 3D vector, z = 0
    pub fn nodal_displacements(&self) -> Vec<[f64; 3]> {
        self.solution
            .displacements
            .chunks(self.mesh.dofs_per_node)
            .map(|u| [u[0], u.get(1).copied().unwrap_or(0.0), 0.0])
            .collect()
    }

    /// Largest nodal displacement magnitude
    pub fn max_displacement(&self) -> f64 {
        self.nodal_displacements()
            .iter()
            .map(|[ux, uy, _]| f64::sqrt(ux * ux + uy * uy))
            .fold(0.0, f64::max)
    }

    pub fn element_von_mises(&self) -> Vec<f64> {
        self.element_states.iter().map(|s| s.von_mises).collect()
    }

    pub fn principal_1_vectors(&self) -> Vec<[f64; 3]> {
        self.element_states
            .iter()
            .map(|s| s.principal_1.vector())
            .collect()
    }

    pub fn principal_2_vectors(&self) -> Vec<[f64; 3]> {
        self.element_states
            .iter()
            .map(|s| s.principal_2.vector())
            .collect()
    }

    /// Summed reaction force along x and y
    pub fn total_reactions(&self) -> [f64; 2] {
        let mut total = [0.0; 2];
        for (dof, r) in self.solution.reactions.iter().enumerate() {
            total[dof % DOF] += r;
        }
        total
    }

    pub fn node_coordinates(&self) -> &[Vertex] {
        &self.mesh.coordinates
    }
}

/// Configured solve pipeline
pub struct Analysis {
    pub mesher: Box<dyn MeshService>,
    pub backend: SolverBackend,
    pub principal: PrincipalConvention,
    /// Log iterative solver progress
    pub verbose: bool,
}

impl Default for Analysis {
    fn default() -> Self {
        Analysis {
            mesher: Box::new(BlockMesher),
            backend: SolverBackend::default(),
            principal: PrincipalConvention::default(),
            verbose: false,
        }
    }
}

impl std::fmt::Debug for Analysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analysis")
            .field("backend", &self.backend)
            .field("principal", &self.principal)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl Analysis {
    pub fn new(mesher: Box<dyn MeshService>) -> Analysis {
        Analysis {
            mesher,
            ..Default::default()
        }
    }

    pub fn with_backend(mut self, backend: SolverBackend) -> Analysis {
        self.backend = backend;
        self
    }

    pub fn with_principal(mut self, principal: PrincipalConvention) -> Analysis {
        self.principal = principal;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Analysis {
        self.verbose = verbose;
        self
    }

    /// Runs the full pipeline on a model.
    ///
    /// The input is validated first; nothing is meshed for an invalid model.
    /// Intermediate buffers are dropped on return, and a failed run yields no
    /// partial output.
    ///
    /// # Arguments
    /// * `input` - Model parameters
    ///
    /// # Returns
    /// Displacements, reactions and stresses for the model
    pub fn execute(&self, input: &InputData) -> Result<OutputData, SlotPlateError> {
        input.validate()?;
        let element_type = input.element_type()?;
        let material = input.material();
        let load = input.load_spec();

        let start = Instant::now();

        let geometry = build_geometry(&input.geometry_parameters());

        println!("info: meshing...");
        let mesh = self
            .mesher
            .generate_mesh(&geometry, input.el_size_factor, element_type)?;
        println!(
            "info: mesh has {} nodes and {} elements",
            mesh.node_count(),
            mesh.element_count()
        );

        let system = assemble(&mesh, &geometry, &material, &load)?;
        let prescribed = build_bc(&mesh, BoundaryTag::Fixed, 0.0, Axis::All);

        let solution = solve(&system, &prescribed, self.backend, self.verbose)?;
        drop(system);

        println!("info: recovering stresses...");
        let element_states =
            compute_element_stresses(&mesh, &material, &solution.displacements, self.principal)?;
        let element_mises: Vec<f64> = element_states.iter().map(|s| s.von_mises).collect();
        let nodal_von_mises = nodal_average(&mesh, &element_mises)?;
        let max_von_mises = element_mises.iter().copied().fold(0.0, f64::max);

        let elapsed = (Instant::now() - start).as_secs_f32();
        println!(
            "info: analysis finished in {:.3} seconds, max von Mises {:.4e} Pa",
            elapsed, max_von_mises
        );

        Ok(OutputData {
            geometry,
            mesh,
            solution,
            element_states,
            nodal_von_mises,
            max_von_mises,
            applied_load: load.total_force,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_is_rejected_before_meshing() {
        let input = InputData {
            b: 0.05,
            ..Default::default()
        };
        let result = Analysis::default().execute(&input);
        assert!(matches!(result, Err(SlotPlateError::Validation(_))));
    }

    #[test]
    fn coarse_default_model_solves() {
        let input = InputData {
            el_size_factor: 1.0,
            ..Default::default()
        };
        let output = Analysis::default().execute(&input).unwrap();

        assert_eq!(output.nodal_displacements().len(), output.mesh.node_count());
        assert_eq!(output.nodal_von_mises.len(), output.mesh.node_count());
        assert_eq!(output.element_states.len(), output.mesh.element_count());
        assert!(output.max_displacement() > 0.0);
        assert!(output.max_von_mises > 0.0);

        // the load pulls the free edge away from the wall
        let load = output.mesh.boundary_group(BoundaryTag::Load);
        assert!(load
            .nodes
            .iter()
            .all(|&n| output.solution.displacements[2 * n] > 0.0));
    }

    #[test]
    fn reactions_balance_applied_load() {
        let input = InputData {
            el_size_factor: 1.0,
            el_type: 3,
            ..Default::default()
        };
        let output = Analysis::default().execute(&input).unwrap();

        let [rx, ry] = output.total_reactions();
        assert!((rx + output.applied_load).abs() < 1e-6 * output.applied_load.abs());
        assert!(ry.abs() < 1e-6 * output.applied_load.abs());
    }
}
