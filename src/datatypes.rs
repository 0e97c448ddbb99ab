use std::collections::BTreeMap;

use nalgebra::{Matrix3, Vector3};
use nalgebra_sparse::CscMatrix;

use crate::error::SlotPlateError;

/// Degrees of freedom per node in plane stress
pub const DOF: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64) -> Vertex {
        Vertex { x, y }
    }

    pub fn distance(&self, other: &Vertex) -> f64 {
        f64::sqrt(f64::powi(self.x - other.x, 2) + f64::powi(self.y - other.y, 2))
    }
}

/// Supported element families. The discriminants are the element type codes
/// stored in model files and used by gmsh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Tri3 = 2,
    Quad4 = 3,
}

impl ElementType {
    pub fn nodes_per_element(&self) -> usize {
        match self {
            ElementType::Tri3 => 3,
            ElementType::Quad4 => 4,
        }
    }

    pub fn code(&self) -> i64 {
        *self as i64
    }
}

impl TryFrom<i64> for ElementType {
    type Error = SlotPlateError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(ElementType::Tri3),
            3 => Ok(ElementType::Quad4),
            other => Err(SlotPlateError::Model(format!(
                "Unknown element type {other}, expected 2 (triangles) or 3 (quads)"
            ))),
        }
    }
}

/// Displacement component selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    All,
}

impl Axis {
    /// Local DOF offsets within a node covered by this axis
    pub fn offsets(&self) -> &'static [usize] {
        match self {
            Axis::X => &[0],
            Axis::Y => &[1],
            Axis::All => &[0, 1],
        }
    }
}

/// Tagged boundary segments of the plate outline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoundaryTag {
    /// Right edge carrying the distributed load
    Load,
    /// Left edge held by the wall
    Fixed,
}

impl BoundaryTag {
    /// Marker number used in mesher input files
    pub fn marker(&self) -> usize {
        match self {
            BoundaryTag::Load => 6,
            BoundaryTag::Fixed => 12,
        }
    }
}

/// Linear-elastic isotropic material with plate thickness
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
    pub thickness: f64,
}

impl Material {
    /// Plane stress Hooke matrix relating (εx, εy, γxy) to (σx, σy, τxy)
    pub fn stress_strain_matrix(&self) -> Matrix3<f64> {
        let v = self.poisson_ratio;
        let mut stress_strain_mat = Matrix3::new(
            1.0, v, 0.0, //
            v, 1.0, 0.0, //
            0.0, 0.0, (1.0 - v) / 2.0,
        );

        stress_strain_mat *= self.youngs_modulus / (1.0 - f64::powi(v, 2));

        stress_strain_mat
    }
}

/// Total force spread over a tagged boundary
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSpec {
    pub total_force: f64,
    pub target: BoundaryTag,
    pub axis: Axis,
}

/// Nodes lying on one tagged boundary and the DOFs they own
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundaryGroup {
    pub nodes: Vec<usize>,
    pub dofs: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshModel {
    pub element_type: ElementType,
    pub coordinates: Vec<Vertex>,
    /// Zero-based node indices, counter-clockwise per element
    pub connectivity: Vec<Vec<usize>>,
    pub dofs_per_node: usize,
    pub boundary_groups: BTreeMap<BoundaryTag, BoundaryGroup>,
}

impl MeshModel {
    pub fn node_count(&self) -> usize {
        self.coordinates.len()
    }

    pub fn element_count(&self) -> usize {
        self.connectivity.len()
    }

    pub fn dof_count(&self) -> usize {
        self.coordinates.len() * self.dofs_per_node
    }

    /// DOF indices owned by a node
    pub fn node_dofs(&self, node: usize) -> Vec<usize> {
        (0..self.dofs_per_node)
            .map(|d| node * self.dofs_per_node + d)
            .collect()
    }

    /// DOF indices touched by an element, in element stiffness order
    pub fn element_dofs(&self, element: usize) -> Vec<usize> {
        self.connectivity[element]
            .iter()
            .flat_map(|&n| self.node_dofs(n))
            .collect()
    }

    pub fn element_vertices(&self, element: usize) -> Vec<Vertex> {
        self.connectivity[element]
            .iter()
            .map(|&n| self.coordinates[n])
            .collect()
    }

    /// Boundary group for a tag. Missing tags yield an empty group.
    pub fn boundary_group(&self, tag: BoundaryTag) -> BoundaryGroup {
        self.boundary_groups.get(&tag).cloned().unwrap_or_default()
    }
}

/// Global stiffness and force, before boundary conditions
#[derive(Debug, Clone)]
pub struct LinearSystem {
    pub stiffness: CscMatrix<f64>,
    pub force: Vec<f64>,
}

impl LinearSystem {
    pub fn ndof(&self) -> usize {
        self.force.len()
    }
}

/// Prescribed displacements, ordered by ascending DOF
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrescribedDofs {
    pub dofs: Vec<usize>,
    pub values: Vec<f64>,
}

impl PrescribedDofs {
    pub fn len(&self) -> usize {
        self.dofs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dofs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolutionField {
    pub displacements: Vec<f64>,
    /// Non-zero only at prescribed DOFs
    pub reactions: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrincipalStress {
    pub magnitude: f64,
    /// Direction angle in radians from the x axis
    pub angle: f64,
}

impl PrincipalStress {
    pub fn direction(&self) -> [f64; 2] {
        [self.angle.cos(), self.angle.sin()]
    }

    /// Principal stress as a 3D vector, z = 0
    pub fn vector(&self) -> [f64; 3] {
        let [dx, dy] = self.direction();
        [self.magnitude * dx, self.magnitude * dy, 0.0]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementStressState {
    /// (εx, εy, γxy)
    pub strain: Vector3<f64>,
    /// (σx, σy, τxy)
    pub stress: Vector3<f64>,
    pub von_mises: f64,
    pub principal_1: PrincipalStress,
    pub principal_2: PrincipalStress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooke_matrix_is_symmetric_and_scaled() {
        let material = Material {
            youngs_modulus: 2.08e10,
            poisson_ratio: 0.2,
            thickness: 0.15,
        };
        let d = material.stress_strain_matrix();
        let factor = 2.08e10 / (1.0 - 0.04);

        assert!((d[(0, 0)] - factor).abs() < 1e-3);
        assert!((d[(0, 1)] - 0.2 * factor).abs() < 1e-3);
        assert!((d[(2, 2)] - 0.4 * factor).abs() < 1e-3);
        assert_eq!(d, d.transpose());
    }

    #[test]
    fn element_type_codes_round_trip() {
        assert_eq!(ElementType::try_from(2).unwrap(), ElementType::Tri3);
        assert_eq!(ElementType::try_from(3).unwrap(), ElementType::Quad4);
        assert_eq!(ElementType::Quad4.code(), 3);
        assert!(ElementType::try_from(4).is_err());
    }

    #[test]
    fn principal_vector_follows_angle() {
        let p = PrincipalStress {
            magnitude: 2.0,
            angle: std::f64::consts::FRAC_PI_2,
        };
        let v = p.vector();
        assert!(v[0].abs() < 1e-12);
        assert!((v[1] - 2.0).abs() < 1e-12);
        assert_eq!(v[2], 0.0);
    }
}
