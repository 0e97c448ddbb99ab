//! Plane stress element formulations.
//!
//! - TRI3: constant strain triangle, exact single-point integration
//! - QUAD4: bilinear isoparametric quadrilateral, 2x2 Gauss integration
//!
//! Element DOFs are ordered `[u0, v0, u1, v1, ...]` following the node order
//! of the connectivity, which must be counter-clockwise.

use nalgebra::{matrix, DMatrix, Matrix2, SMatrix, SVector, Vector2, Vector3};

use crate::{
    datatypes::{ElementType, Material, Vertex},
    error::SlotPlateError,
};

/// Natural coordinates of the QUAD4 corner nodes
const QUAD_NODES: [(f64, f64); 4] = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

/// Calculates the signed area of a triangle, positive when counter-clockwise
///
/// # Arguments
/// * `vertices` - The three corner vertices
pub fn compute_element_area(vertices: &[Vertex]) -> f64 {
    let (v0, v1, v2) = (&vertices[0], &vertices[1], &vertices[2]);

    0.5 * (v0.x * (v1.y - v2.y) + v1.x * (v2.y - v0.y) + v2.x * (v0.y - v1.y))
}

/// Calculates the strain-displacement matrix of a triangle
///
/// # Arguments
/// * `vertices` - The three corner vertices
/// * `element_area` - The area of the element
///
/// # Returns
/// A 3x6 strain-displacement matrix
pub fn compute_strain_displacement_matrix(
    vertices: &[Vertex],
    element_area: f64,
) -> SMatrix<f64, 3, 6> {
    let (v0, v1, v2) = (&vertices[0], &vertices[1], &vertices[2]);

    let beta_1 = v1.y - v2.y;
    let beta_2 = v2.y - v0.y;
    let beta_3 = v0.y - v1.y;

    let gamma_1 = v2.x - v1.x;
    let gamma_2 = v0.x - v2.x;
    let gamma_3 = v1.x - v0.x;

    let mut strain_displacement_mat: SMatrix<f64, 3, 6> = matrix![
        beta_1, 0., beta_2, 0., beta_3, 0.;
        0., gamma_1, 0., gamma_2, 0., gamma_3;
        gamma_1, beta_1, gamma_2, beta_2, gamma_3, beta_3;
    ];

    strain_displacement_mat /= 2.0 * element_area;

    strain_displacement_mat
}

/// Shape function derivatives (dN/dξ, dN/dη) of the bilinear quad
fn quad_shape_function_derivatives(xi: f64, eta: f64) -> [(f64, f64); 4] {
    let mut derivatives = [(0.0, 0.0); 4];
    for (i, (xi_i, eta_i)) in QUAD_NODES.iter().enumerate() {
        derivatives[i] = (
            0.25 * xi_i * (1.0 + eta * eta_i),
            0.25 * eta_i * (1.0 + xi * xi_i),
        );
    }
    derivatives
}

/// Jacobian of the natural-to-physical map and its determinant
fn quad_jacobian(vertices: &[Vertex], xi: f64, eta: f64) -> (Matrix2<f64>, f64) {
    let dn_dnat = quad_shape_function_derivatives(xi, eta);

    let mut j = Matrix2::zeros();
    for (i, v) in vertices.iter().enumerate().take(4) {
        j[(0, 0)] += dn_dnat[i].0 * v.x;
        j[(0, 1)] += dn_dnat[i].0 * v.y;
        j[(1, 0)] += dn_dnat[i].1 * v.x;
        j[(1, 1)] += dn_dnat[i].1 * v.y;
    }

    let det_j = j.determinant();
    (j, det_j)
}

/// Strain-displacement matrix of the quad at (ξ, η)
///
/// # Returns
/// The 3x8 matrix and the Jacobian determinant at that point
pub fn quad_strain_displacement_matrix(
    vertices: &[Vertex],
    xi: f64,
    eta: f64,
) -> Result<(SMatrix<f64, 3, 8>, f64), SlotPlateError> {
    let dn_dnat = quad_shape_function_derivatives(xi, eta);
    let (j, det_j) = quad_jacobian(vertices, xi, eta);

    if !(det_j > 0.0) {
        return Err(SlotPlateError::Assembly(format!(
            "Quad element has non-positive Jacobian {det_j} at ({xi}, {eta})"
        )));
    }
    let j_inv = match j.try_inverse() {
        Some(inv) => inv,
        None => {
            return Err(SlotPlateError::Assembly(
                "Quad element has a singular Jacobian".to_owned(),
            ))
        }
    };

    let mut b: SMatrix<f64, 3, 8> = SMatrix::zeros();
    for i in 0..4 {
        let dphys = j_inv * Vector2::new(dn_dnat[i].0, dn_dnat[i].1);
        let col = 2 * i;
        b[(0, col)] = dphys[0];
        b[(1, col + 1)] = dphys[1];
        b[(2, col)] = dphys[1];
        b[(2, col + 1)] = dphys[0];
    }

    Ok((b, det_j))
}

fn triangle_area(vertices: &[Vertex]) -> Result<f64, SlotPlateError> {
    let area = compute_element_area(vertices);
    if !(area > 0.0) {
        return Err(SlotPlateError::Assembly(format!(
            "Triangle has non-positive area {area}"
        )));
    }
    Ok(area)
}

fn check_node_count(element_type: ElementType, vertices: &[Vertex]) -> Result<(), SlotPlateError> {
    if vertices.len() != element_type.nodes_per_element() {
        return Err(SlotPlateError::Assembly(format!(
            "{:?} element given {} nodes",
            element_type,
            vertices.len()
        )));
    }
    Ok(())
}

/// Computes the stiffness matrix for a given element
///
/// # Arguments
/// * `element_type` - Element family
/// * `vertices` - Corner vertices, counter-clockwise
/// * `material` - Elastic constants and thickness
///
/// # Returns
/// A square stiffness matrix of size `2 * vertices.len()`
pub fn compute_element_stiffness_matrix(
    element_type: ElementType,
    vertices: &[Vertex],
    material: &Material,
) -> Result<DMatrix<f64>, SlotPlateError> {
    check_node_count(element_type, vertices)?;
    let stress_strain_mat = material.stress_strain_matrix();

    match element_type {
        ElementType::Tri3 => {
            let element_area = triangle_area(vertices)?;
            let b = compute_strain_displacement_matrix(vertices, element_area);
            let k = (b.transpose() * stress_strain_mat) * b * element_area * material.thickness;
            Ok(DMatrix::from_column_slice(6, 6, k.as_slice()))
        }
        ElementType::Quad4 => {
            let gauss = 1.0 / f64::sqrt(3.0);
            let mut k: SMatrix<f64, 8, 8> = SMatrix::zeros();
            for xi in [-gauss, gauss] {
                for eta in [-gauss, gauss] {
                    let (b, det_j) = quad_strain_displacement_matrix(vertices, xi, eta)?;
                    k += (b.transpose() * stress_strain_mat) * b * (det_j * material.thickness);
                }
            }
            Ok(DMatrix::from_column_slice(8, 8, k.as_slice()))
        }
    }
}

/// Strain (εx, εy, γxy) of an element from its nodal displacements.
/// Quads are sampled at the element centre.
pub fn compute_element_strain(
    element_type: ElementType,
    vertices: &[Vertex],
    displacements: &[f64],
) -> Result<Vector3<f64>, SlotPlateError> {
    check_node_count(element_type, vertices)?;
    if displacements.len() != 2 * vertices.len() {
        return Err(SlotPlateError::PostProcessor(format!(
            "Element given {} displacements for {} nodes",
            displacements.len(),
            vertices.len()
        )));
    }

    let strain = match element_type {
        ElementType::Tri3 => {
            let b = compute_strain_displacement_matrix(vertices, triangle_area(vertices)?);
            b * SVector::<f64, 6>::from_column_slice(displacements)
        }
        ElementType::Quad4 => {
            let (b, _) = quad_strain_displacement_matrix(vertices, 0.0, 0.0)?;
            b * SVector::<f64, 8>::from_column_slice(displacements)
        }
    };

    Ok(strain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn material() -> Material {
        Material {
            youngs_modulus: 2.0e11,
            poisson_ratio: 0.3,
            thickness: 0.01,
        }
    }

    fn right_triangle() -> Vec<Vertex> {
        vec![
            Vertex::new(0.0, 0.0),
            Vertex::new(1.0, 0.0),
            Vertex::new(0.0, 1.0),
        ]
    }

    fn skewed_quad() -> Vec<Vertex> {
        vec![
            Vertex::new(0.0, 0.0),
            Vertex::new(2.0, 0.2),
            Vertex::new(2.2, 1.1),
            Vertex::new(-0.1, 1.0),
        ]
    }

    fn assert_symmetric(k: &DMatrix<f64>) {
        let scale = k.amax();
        for i in 0..k.nrows() {
            for j in 0..k.ncols() {
                assert!((k[(i, j)] - k[(j, i)]).abs() <= 1e-12 * scale);
            }
        }
    }

    fn rigid_body_modes(vertices: &[Vertex]) -> Vec<Vec<f64>> {
        let translate_x = vertices.iter().flat_map(|_| [1.0, 0.0]).collect();
        let translate_y = vertices.iter().flat_map(|_| [0.0, 1.0]).collect();
        let rotate = vertices.iter().flat_map(|v| [-v.y, v.x]).collect();
        vec![translate_x, translate_y, rotate]
    }

    #[test]
    fn triangle_area_sign_follows_orientation() {
        let mut vertices = right_triangle();
        assert!((compute_element_area(&vertices) - 0.5).abs() < 1e-15);
        vertices.swap(1, 2);
        assert!((compute_element_area(&vertices) + 0.5).abs() < 1e-15);
    }

    #[test]
    fn stiffness_matrices_are_symmetric() {
        let k_tri =
            compute_element_stiffness_matrix(ElementType::Tri3, &right_triangle(), &material())
                .unwrap();
        let k_quad =
            compute_element_stiffness_matrix(ElementType::Quad4, &skewed_quad(), &material())
                .unwrap();

        assert_eq!(k_tri.shape(), (6, 6));
        assert_eq!(k_quad.shape(), (8, 8));
        assert_symmetric(&k_tri);
        assert_symmetric(&k_quad);
    }

    #[test]
    fn rigid_body_motion_is_stress_free() {
        for (element_type, vertices) in [
            (ElementType::Tri3, right_triangle()),
            (ElementType::Quad4, skewed_quad()),
        ] {
            let k = compute_element_stiffness_matrix(element_type, &vertices, &material()).unwrap();
            for mode in rigid_body_modes(&vertices) {
                let forces = &k * DVector::from_vec(mode);
                assert!(forces.amax() < 1e-6 * k.amax(), "{element_type:?}");
            }
        }
    }

    #[test]
    fn constant_strain_is_reproduced() {
        // u = 1e-3 x, v = -2e-4 y + 5e-4 x
        let field = |v: &Vertex| [1e-3 * v.x, -2e-4 * v.y + 5e-4 * v.x];

        for (element_type, vertices) in [
            (ElementType::Tri3, right_triangle()),
            (ElementType::Quad4, skewed_quad()),
        ] {
            let displacements: Vec<f64> = vertices.iter().flat_map(field).collect();
            let strain =
                compute_element_strain(element_type, &vertices, &displacements).unwrap();

            assert!((strain[0] - 1e-3).abs() < 1e-12, "{element_type:?}");
            assert!((strain[1] + 2e-4).abs() < 1e-12, "{element_type:?}");
            assert!((strain[2] - 5e-4).abs() < 1e-12, "{element_type:?}");
        }
    }

    #[test]
    fn clockwise_elements_are_rejected() {
        let mut tri = right_triangle();
        tri.swap(1, 2);
        assert!(matches!(
            compute_element_stiffness_matrix(ElementType::Tri3, &tri, &material()),
            Err(SlotPlateError::Assembly(_))
        ));

        let mut quad = skewed_quad();
        quad.reverse();
        assert!(matches!(
            compute_element_stiffness_matrix(ElementType::Quad4, &quad, &material()),
            Err(SlotPlateError::Assembly(_))
        ));
    }

    #[test]
    fn wrong_node_count_is_rejected() {
        assert!(compute_element_stiffness_matrix(ElementType::Quad4, &right_triangle(), &material())
            .is_err());
    }
}
