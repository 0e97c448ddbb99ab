use indicatif::ProgressBar;
use nalgebra_sparse::{CooMatrix, CscMatrix};

use crate::{
    datatypes::{LinearSystem, LoadSpec, Material, MeshModel},
    element::compute_element_stiffness_matrix,
    error::SlotPlateError,
    geometry::Geometry,
};

/// Splits the total load over the nodes of the target boundary.
///
/// Each node receives the share of the edge length it is tributary to: half
/// of the segment to each neighbour along the edge. When the nodes do not
/// span any length the load is split equally.
///
/// # Arguments
/// * `mesh` - The meshed plate
/// * `geometry` - The outline the mesh was generated from
/// * `load` - Total force and the boundary it acts on
/// * `force` - Global force vector to add into
pub fn distribute_edge_load(
    mesh: &MeshModel,
    geometry: &Geometry,
    load: &LoadSpec,
    force: &mut [f64],
) -> Result<(), SlotPlateError> {
    let group = mesh.boundary_group(load.target);
    if group.nodes.is_empty() {
        println!(
            "warning [assembly]: {:?} boundary has no nodes, load of {} is not applied",
            load.target, load.total_force
        );
        return Ok(());
    }

    let edge = match geometry.tagged_edge(load.target) {
        Some(e) => e,
        None => {
            return Err(SlotPlateError::Assembly(format!(
                "Geometry has no {:?} edge",
                load.target
            )))
        }
    };

    // Order nodes along the edge
    let mut along: Vec<(f64, usize)> = group
        .nodes
        .iter()
        .map(|&n| (geometry.edge_parameter(edge, &mesh.coordinates[n]), n))
        .collect();
    along.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut shares = vec![0.0; along.len()];
    for i in 0..along.len().saturating_sub(1) {
        let segment = mesh.coordinates[along[i].1].distance(&mesh.coordinates[along[i + 1].1]);
        shares[i] += segment / 2.0;
        shares[i + 1] += segment / 2.0;
    }
    let total_length: f64 = shares.iter().sum();
    if !(total_length > 0.0) {
        shares = vec![1.0; along.len()];
    }
    let share_sum: f64 = shares.iter().sum();

    for ((_, node), share) in along.iter().zip(shares) {
        for offset in load.axis.offsets() {
            let dof = node * mesh.dofs_per_node + offset;
            if dof >= force.len() {
                return Err(SlotPlateError::Assembly(format!(
                    "Load DOF {dof} is outside the system of size {}",
                    force.len()
                )));
            }
            force[dof] += load.total_force * share / share_sum;
        }
    }

    Ok(())
}

/// Compiles element stiffness matrices into the global stiffness matrix and
/// applies the edge load.
///
/// Entries are accumulated as triplets and summed when converted to
/// compressed column form, so the element order has no effect on the result.
///
/// # Arguments
/// * `mesh` - The meshed plate
/// * `geometry` - The outline the mesh was generated from
/// * `material` - Elastic constants and thickness
/// * `load` - Total edge load
///
/// # Returns
/// The global stiffness matrix and force vector
pub fn assemble(
    mesh: &MeshModel,
    geometry: &Geometry,
    material: &Material,
    load: &LoadSpec,
) -> Result<LinearSystem, SlotPlateError> {
    let ndof = mesh.dof_count();
    let mut triplets: CooMatrix<f64> = CooMatrix::new(ndof, ndof);

    println!("info: building element stiffness matrices...");
    let bar = ProgressBar::new(mesh.element_count() as u64);
    for element in 0..mesh.element_count() {
        bar.inc(1);

        if let Some(node) = mesh.connectivity[element]
            .iter()
            .find(|&&n| n >= mesh.node_count())
        {
            return Err(SlotPlateError::Assembly(format!(
                "Element {element} references missing node {node}"
            )));
        }

        let vertices = mesh.element_vertices(element);
        let stiffness_mat =
            match compute_element_stiffness_matrix(mesh.element_type, &vertices, material) {
                Ok(k) => k,
                Err(SlotPlateError::Assembly(msg)) => {
                    return Err(SlotPlateError::Assembly(format!("element {element}: {msg}")))
                }
                Err(err) => return Err(err),
            };

        let dofs = mesh.element_dofs(element);
        for (local_row, global_row) in dofs.iter().enumerate() {
            for (local_col, global_col) in dofs.iter().enumerate() {
                triplets.push(
                    *global_row,
                    *global_col,
                    stiffness_mat[(local_row, local_col)],
                );
            }
        }
    }
    bar.finish_and_clear();

    let stiffness = CscMatrix::from(&triplets);
    println!(
        "info: successfully built total stiffness matrix ({} dofs, {} stored entries)",
        ndof,
        stiffness.nnz()
    );

    let mut force = vec![0.0; ndof];
    distribute_edge_load(mesh, geometry, load, &mut force)?;

    Ok(LinearSystem { stiffness, force })
}
