use std::f64::consts::FRAC_PI_2;

use nalgebra::Vector3;

use crate::{
    datatypes::{ElementStressState, Material, MeshModel, PrincipalStress},
    element::compute_element_strain,
    error::SlotPlateError,
};

/// Sign used for the second principal stress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrincipalConvention {
    /// `σ2 = c - r`, the smaller eigenvalue of the stress tensor
    #[default]
    Physical,
    /// `σ2 = c + r`, so both principal magnitudes coincide
    Legacy,
}

/// Von Mises effective stress of a plane stress state
///
/// # Arguments
/// * `stress` - (σx, σy, τxy)
pub fn von_mises(stress: &Vector3<f64>) -> f64 {
    let (sx, sy, txy) = (stress[0], stress[1], stress[2]);
    f64::sqrt(sx * sx - sx * sy + sy * sy + 3.0 * txy * txy)
}

/// Principal stresses and their directions
///
/// The first direction is `0.5 atan2(2τxy, σx - σy)` and the second is
/// perpendicular to it.
///
/// # Arguments
/// * `stress` - (σx, σy, τxy)
/// * `convention` - Sign of the root used for the second principal stress
///
/// # Returns
/// The first and second principal stresses
pub fn principal_stresses(
    stress: &Vector3<f64>,
    convention: PrincipalConvention,
) -> (PrincipalStress, PrincipalStress) {
    let (sx, sy, txy) = (stress[0], stress[1], stress[2]);

    let angle = 0.5 * f64::atan2(2.0 * txy, sx - sy);
    let center = 0.5 * (sx + sy);
    let radius = f64::sqrt(f64::powi(0.5 * (sx - sy), 2) + txy * txy);

    let second = match convention {
        PrincipalConvention::Physical => center - radius,
        PrincipalConvention::Legacy => center + radius,
    };

    (
        PrincipalStress {
            magnitude: center + radius,
            angle,
        },
        PrincipalStress {
            magnitude: second,
            angle: angle + FRAC_PI_2,
        },
    )
}

/// Recovers strain and stress for every element
///
/// # Arguments
/// * `mesh` - The meshed plate
/// * `material` - Elastic constants
/// * `displacements` - Solved displacement for every DOF
/// * `convention` - Principal stress sign convention
///
/// # Returns
/// One stress state per element, in connectivity order
pub fn compute_element_stresses(
    mesh: &MeshModel,
    material: &Material,
    displacements: &[f64],
    convention: PrincipalConvention,
) -> Result<Vec<ElementStressState>, SlotPlateError> {
    if displacements.len() != mesh.dof_count() {
        return Err(SlotPlateError::PostProcessor(format!(
            "Got {} displacements for {} DOFs",
            displacements.len(),
            mesh.dof_count()
        )));
    }

    let stress_strain_mat = material.stress_strain_matrix();

    let mut states = Vec::with_capacity(mesh.element_count());
    for element in 0..mesh.element_count() {
        let element_displacements: Vec<f64> = mesh
            .element_dofs(element)
            .iter()
            .map(|&d| displacements[d])
            .collect();

        let strain = compute_element_strain(
            mesh.element_type,
            &mesh.element_vertices(element),
            &element_displacements,
        )?;
        let stress = stress_strain_mat * strain;
        let mises = von_mises(&stress);

        if strain.iter().chain(stress.iter()).any(|s| !s.is_finite()) || !mises.is_finite() {
            return Err(SlotPlateError::PostProcessor(format!(
                "Non-finite stress in element {element}"
            )));
        }

        let (principal_1, principal_2) = principal_stresses(&stress, convention);
        states.push(ElementStressState {
            strain,
            stress,
            von_mises: mises,
            principal_1,
            principal_2,
        });
    }

    Ok(states)
}

/// Averages an element field onto the nodes
///
/// Each node takes the plain mean over the elements that reference it. Nodes
/// no element references get zero.
pub fn nodal_average(mesh: &MeshModel, element_values: &[f64]) -> Result<Vec<f64>, SlotPlateError> {
    if element_values.len() != mesh.element_count() {
        return Err(SlotPlateError::PostProcessor(format!(
            "Got {} element values for {} elements",
            element_values.len(),
            mesh.element_count()
        )));
    }

    let mut sums = vec![0.0; mesh.node_count()];
    let mut counts = vec![0usize; mesh.node_count()];
    for (element, value) in mesh.connectivity.iter().zip(element_values) {
        for &node in element {
            sums[node] += value;
            counts[node] += 1;
        }
    }

    Ok(sums
        .iter()
        .zip(counts)
        .map(|(sum, count)| if count > 0 { sum / count as f64 } else { 0.0 })
        .collect())
}
