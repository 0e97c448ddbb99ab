use crate::datatypes::{Axis, BoundaryTag, MeshModel, PrescribedDofs};

/// Builds the prescribed displacement list for a tagged boundary
///
/// # Arguments
/// * `mesh` - The meshed plate
/// * `tag` - Boundary whose nodes are held
/// * `value` - Displacement assigned to every selected DOF
/// * `axis` - Which displacement components are held
///
/// # Returns
/// Prescribed DOFs in ascending order without duplicates
pub fn build_bc(mesh: &MeshModel, tag: BoundaryTag, value: f64, axis: Axis) -> PrescribedDofs {
    let group = mesh.boundary_group(tag);

    let mut dofs: Vec<usize> = group
        .nodes
        .iter()
        .flat_map(|&n| axis.offsets().iter().map(move |o| n * mesh.dofs_per_node + o))
        .collect();
    dofs.sort_unstable();
    dofs.dedup();

    let values = vec![value; dofs.len()];
    PrescribedDofs { dofs, values }
}
