//! Mesh generation behind a pluggable service.
//!
//! Backends turn a [`Geometry`] into a [`MeshModel`]. Boundary groups and
//! element orientation are settled here so every backend agrees on them.

mod block;
mod gmsh;

pub use block::BlockMesher;
pub use gmsh::{parse_msh, GmshMesher};

use std::collections::BTreeMap;

use crate::{
    datatypes::{BoundaryGroup, BoundaryTag, ElementType, MeshModel, Vertex, DOF},
    error::SlotPlateError,
    geometry::Geometry,
};

/// Fraction of the smaller plate dimension used as the reference element length
pub const REFERENCE_DIVISIONS: f64 = 10.0;

/// Upper bound on generated nodes
pub const MAX_NODES: usize = 250_000;

/// Relative tolerance for deciding whether a node lies on a boundary edge
pub const BOUNDARY_TOLERANCE: f64 = 1e-9;

/// Largest accepted ratio of element length to the smallest geometric feature
pub const MAX_FEATURE_RATIO: f64 = 1000.0;

pub trait MeshService: Send + Sync {
    /// Meshes the surface of `geometry`
    ///
    /// # Arguments
    /// * `geometry` - Closed plate outline with tagged edges
    /// * `el_size_factor` - Element size factor in `(0, 1]`
    /// * `element_type` - Element family to generate
    fn generate_mesh(
        &self,
        geometry: &Geometry,
        el_size_factor: f64,
        element_type: ElementType,
    ) -> Result<MeshModel, SlotPlateError>;
}

/// Target element edge length for a size factor
pub fn characteristic_length(
    geometry: &Geometry,
    el_size_factor: f64,
) -> Result<f64, SlotPlateError> {
    if !(el_size_factor > 0.0 && el_size_factor <= 1.0) {
        return Err(SlotPlateError::Mesher(format!(
            "Element size factor {el_size_factor} is outside (0, 1]"
        )));
    }

    let (x_min, y_min, x_max, y_max) = geometry.bounds();
    let reference = f64::min(x_max - x_min, y_max - y_min);
    if !(reference > 0.0) {
        return Err(SlotPlateError::Mesher(
            "Geometry has no extent to mesh".to_owned(),
        ));
    }

    Ok(el_size_factor * reference / REFERENCE_DIVISIONS)
}

/// Rejects element lengths that would flatten elements across the smallest
/// feature of `geometry`
pub fn check_feature_size(geometry: &Geometry, target: f64) -> Result<(), SlotPlateError> {
    let feature = geometry.min_feature_size();
    if !(feature > 0.0 && feature.is_finite()) {
        return Err(SlotPlateError::Mesher(
            "Geometry has no positive feature size".to_owned(),
        ));
    }

    let ratio = target / feature;
    if ratio > MAX_FEATURE_RATIO {
        return Err(SlotPlateError::Mesher(format!(
            "Element size {target:e} m is incompatible with the smallest feature of {feature:e} m \
             (ratio {ratio:.0} exceeds {MAX_FEATURE_RATIO}); widen the slot gap or refine the mesh"
        )));
    }

    Ok(())
}

/// Finds the nodes lying on each tagged edge of `geometry`
pub fn classify_boundaries(
    geometry: &Geometry,
    coordinates: &[Vertex],
) -> BTreeMap<BoundaryTag, BoundaryGroup> {
    let (x_min, y_min, x_max, y_max) = geometry.bounds();
    let tolerance = BOUNDARY_TOLERANCE * f64::max(x_max - x_min, y_max - y_min);

    let mut groups = BTreeMap::new();
    for edge in geometry.edges.iter() {
        let tag = match edge.tag {
            Some(t) => t,
            None => continue,
        };

        let nodes: Vec<usize> = coordinates
            .iter()
            .enumerate()
            .filter(|(_, p)| geometry.distance_to_edge(edge, p) <= tolerance)
            .map(|(i, _)| i)
            .collect();
        let dofs = nodes
            .iter()
            .flat_map(|n| (0..DOF).map(move |d| n * DOF + d))
            .collect();

        groups.insert(tag, BoundaryGroup { nodes, dofs });
    }

    groups
}

/// Twice the signed area of a polygon, positive when counter-clockwise
fn signed_double_area(coordinates: &[Vertex], element: &[usize]) -> f64 {
    let mut sum = 0.0;
    for i in 0..element.len() {
        let p = coordinates[element[i]];
        let q = coordinates[element[(i + 1) % element.len()]];
        sum += p.x * q.y - q.x * p.y;
    }
    sum
}

/// Reverses clockwise elements in place. Returns how many were flipped.
pub fn orient_counter_clockwise(coordinates: &[Vertex], connectivity: &mut [Vec<usize>]) -> usize {
    let mut flipped = 0;
    for element in connectivity.iter_mut() {
        if signed_double_area(coordinates, element) < 0.0 {
            element.reverse();
            flipped += 1;
        }
    }
    flipped
}

/// Assembles a mesh model from raw node and element tables
pub fn finish_mesh(
    geometry: &Geometry,
    element_type: ElementType,
    coordinates: Vec<Vertex>,
    mut connectivity: Vec<Vec<usize>>,
) -> Result<MeshModel, SlotPlateError> {
    if coordinates.is_empty() || connectivity.is_empty() {
        return Err(SlotPlateError::Mesher("Mesh has no elements".to_owned()));
    }

    let expected = element_type.nodes_per_element();
    for (i, element) in connectivity.iter().enumerate() {
        if element.len() != expected {
            return Err(SlotPlateError::Mesher(format!(
                "Element {i} has {} nodes, expected {expected}",
                element.len()
            )));
        }
        if let Some(node) = element.iter().find(|&&n| n >= coordinates.len()) {
            return Err(SlotPlateError::Mesher(format!(
                "Element {i} references missing node {node}"
            )));
        }
    }

    let flipped = orient_counter_clockwise(&coordinates, &mut connectivity);
    if flipped > 0 {
        println!("warning [mesh]: reoriented {flipped} clockwise elements");
    }

    let boundary_groups = classify_boundaries(geometry, &coordinates);
    for (tag, group) in boundary_groups.iter() {
        if group.nodes.is_empty() {
            println!("warning [mesh]: no nodes found on {tag:?} boundary");
        }
    }

    Ok(MeshModel {
        element_type,
        coordinates,
        connectivity,
        dofs_per_node: DOF,
        boundary_groups,
    })
}
