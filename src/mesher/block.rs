use crate::{
    datatypes::{ElementType, MeshModel, Vertex},
    error::SlotPlateError,
    geometry::Geometry,
};

use super::{characteristic_length, check_feature_size, finish_mesh, MeshService, MAX_NODES};

const DIVISION_SLACK: f64 = 1e-9;

/// Structured mesher for the slotted plate.
///
/// The plate is split along the slot walls into a 3x3 grid of rectangular
/// blocks. The two middle blocks on the top and bottom rows are the slots and
/// stay empty. Each block is divided into a regular grid whose spacing does not
/// exceed the characteristic length, and neighbouring blocks share their grid
/// lines so nodes are never duplicated.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockMesher;

impl BlockMesher {
    pub fn new() -> BlockMesher {
        BlockMesher
    }
}

/// Number of segments for each interval between consecutive breaks
///
/// Fails before anything is allocated when an interval alone would need more
/// segments than the node limit allows.
fn block_divisions(breaks: &[f64], target: f64) -> Result<Vec<usize>, SlotPlateError> {
    let mut divisions = Vec::with_capacity(breaks.len().saturating_sub(1));

    for pair in breaks.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        let length = end - start;
        if !(length > 0.0) {
            return Err(SlotPlateError::Mesher(format!(
                "Degenerate block from {start} to {end}"
            )));
        }

        // Slack keeps exact multiples of the target from gaining a division
        let count = f64::max(1.0, (length / target - DIVISION_SLACK).ceil());
        if !(count <= MAX_NODES as f64) {
            return Err(SlotPlateError::Mesher(format!(
                "Element size {target:e} m needs {count:e} divisions on a {length} m block, \
                 more than the limit of {MAX_NODES} nodes"
            )));
        }
        divisions.push(count as usize);
    }

    Ok(divisions)
}

/// Grid nodes a pair of division lists produces, if it fits under the limit
fn grid_node_count(x_divisions: &[usize], y_divisions: &[usize]) -> Option<usize> {
    let lines = |divisions: &[usize]| {
        divisions
            .iter()
            .try_fold(1usize, |total, &d| total.checked_add(d))
    };
    lines(x_divisions)?
        .checked_mul(lines(y_divisions)?)
        .filter(|&n| n <= MAX_NODES)
}

/// Places the grid lines for precomputed divisions
///
/// # Returns
/// The grid line positions and, for every grid cell, the block it falls in
fn grid_lines(breaks: &[f64], divisions: &[usize]) -> (Vec<f64>, Vec<usize>) {
    let mut lines = vec![breaks[0]];
    let mut cell_blocks = Vec::new();

    for (block, (pair, &count)) in breaks.windows(2).zip(divisions.iter()).enumerate() {
        let (start, end) = (pair[0], pair[1]);
        let length = end - start;
        for k in 1..=count {
            if k == count {
                lines.push(end);
            } else {
                lines.push(start + length * k as f64 / count as f64);
            }
            cell_blocks.push(block);
        }
    }

    (lines, cell_blocks)
}

impl MeshService for BlockMesher {
    fn generate_mesh(
        &self,
        geometry: &Geometry,
        el_size_factor: f64,
        element_type: ElementType,
    ) -> Result<MeshModel, SlotPlateError> {
        let target = characteristic_length(geometry, el_size_factor)?;

        if geometry.points.len() != 12 {
            return Err(SlotPlateError::Mesher(format!(
                "Block mesher expects the 12-point slotted plate outline, got {} points",
                geometry.points.len()
            )));
        }
        let p = &geometry.points;
        let x_breaks = [p[0].x, p[1].x, p[4].x, p[5].x];
        let y_breaks = [p[0].y, p[2].y, p[9].y, p[11].y];

        check_feature_size(geometry, target)?;

        let x_divisions = block_divisions(&x_breaks, target)?;
        let y_divisions = block_divisions(&y_breaks, target)?;
        let grid_nodes = match grid_node_count(&x_divisions, &y_divisions) {
            Some(n) => n,
            None => {
                return Err(SlotPlateError::Mesher(format!(
                    "Element size too small: the grid needs more than {MAX_NODES} nodes"
                )))
            }
        };

        let (xs, x_blocks) = grid_lines(&x_breaks, &x_divisions);
        let (ys, y_blocks) = grid_lines(&y_breaks, &y_divisions);

        let is_slot = |bx: usize, by: usize| bx == 1 && (by == 0 || by == 2);
        let cell_in_domain = |i: usize, j: usize| !is_slot(x_blocks[i], y_blocks[j]);

        let (nx, ny) = (x_blocks.len(), y_blocks.len());

        // Number nodes column by column; the plate is wider than tall so this
        // keeps the stiffness bandwidth small
        let mut node_index: Vec<Option<usize>> = vec![None; grid_nodes];
        let mut coordinates: Vec<Vertex> = Vec::new();
        for i in 0..=nx {
            for j in 0..=ny {
                let touches_domain = [(0, 0), (1, 0), (0, 1), (1, 1)].iter().any(|&(di, dj)| {
                    i >= di
                        && j >= dj
                        && i - di < nx
                        && j - dj < ny
                        && cell_in_domain(i - di, j - dj)
                });
                if touches_domain {
                    node_index[i * (ny + 1) + j] = Some(coordinates.len());
                    coordinates.push(Vertex::new(xs[i], ys[j]));
                }
            }
        }

        let mut connectivity: Vec<Vec<usize>> = Vec::new();
        for i in 0..nx {
            for j in 0..ny {
                if !cell_in_domain(i, j) {
                    continue;
                }

                let corners = [(i, j), (i + 1, j), (i + 1, j + 1), (i, j + 1)];
                let mut quad = [0usize; 4];
                for (k, (ci, cj)) in corners.iter().enumerate() {
                    quad[k] = match node_index[ci * (ny + 1) + cj] {
                        Some(n) => n,
                        None => {
                            return Err(SlotPlateError::Mesher(format!(
                                "Missing grid node at ({ci}, {cj})"
                            )))
                        }
                    };
                }

                match element_type {
                    ElementType::Quad4 => connectivity.push(quad.to_vec()),
                    ElementType::Tri3 => {
                        connectivity.push(vec![quad[0], quad[1], quad[2]]);
                        connectivity.push(vec![quad[0], quad[2], quad[3]]);
                    }
                }
            }
        }

        println!(
            "info: block mesher produced {} nodes and {} elements (target length {:.5})",
            coordinates.len(),
            connectivity.len(),
            target
        );

        finish_mesh(geometry, element_type, coordinates, connectivity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::BoundaryTag;
    use crate::geometry::{build_geometry, GeometryParameters};

    fn geometry(b: f64) -> Geometry {
        build_geometry(&GeometryParameters {
            h: 0.1,
            w: 0.3,
            a: 0.05,
            b,
        })
    }

    #[test]
    fn grid_lines_hit_breaks_exactly() {
        let breaks = [0.0, 0.125, 0.175, 0.3];
        let divisions = block_divisions(&breaks, 0.05).unwrap();
        assert_eq!(divisions, vec![3, 1, 3]);

        let (lines, blocks) = grid_lines(&breaks, &divisions);
        assert_eq!(lines.first(), Some(&0.0));
        assert!(lines.contains(&0.125));
        assert!(lines.contains(&0.175));
        assert_eq!(lines.last(), Some(&0.3));
        assert_eq!(lines.len(), blocks.len() + 1);
        assert_eq!(blocks, vec![0, 0, 0, 1, 2, 2, 2]);
    }

    #[test]
    fn quad_mesh_counts() {
        // target 0.01: x divisions 13 + 5 + 13, y divisions 3 + 5 + 3
        let mesh = BlockMesher
            .generate_mesh(&geometry(0.025), 1.0, ElementType::Quad4)
            .unwrap();

        let cells = 31 * 11 - 2 * 5 * 3;
        assert_eq!(mesh.element_count(), cells);
        // full grid minus the nodes strictly inside or on the open slot mouth
        let slot_nodes = 2 * (4 * 3);
        assert_eq!(mesh.node_count(), 32 * 12 - slot_nodes);
        assert!(mesh.connectivity.iter().all(|e| e.len() == 4));
    }

    #[test]
    fn triangle_mesh_doubles_cells() {
        let quads = BlockMesher
            .generate_mesh(&geometry(0.025), 1.0, ElementType::Quad4)
            .unwrap();
        let tris = BlockMesher
            .generate_mesh(&geometry(0.025), 1.0, ElementType::Tri3)
            .unwrap();

        assert_eq!(tris.element_count(), 2 * quads.element_count());
        assert_eq!(tris.node_count(), quads.node_count());
    }

    #[test]
    fn boundary_groups_cover_plate_sides() {
        let mesh = BlockMesher
            .generate_mesh(&geometry(0.025), 1.0, ElementType::Tri3)
            .unwrap();

        let load = mesh.boundary_group(BoundaryTag::Load);
        let fixed = mesh.boundary_group(BoundaryTag::Fixed);
        // 3 + 5 + 3 divisions along the height
        assert_eq!(load.nodes.len(), 12);
        assert_eq!(fixed.nodes.len(), 12);
        assert_eq!(load.dofs.len(), 24);
        assert!(load.nodes.iter().all(|&n| mesh.coordinates[n].x == 0.3));
        assert!(fixed.nodes.iter().all(|&n| mesh.coordinates[n].x == 0.0));
    }

    #[test]
    fn thin_ligament_still_meshes() {
        let mesh = BlockMesher
            .generate_mesh(&geometry(0.0001), 1.0, ElementType::Quad4)
            .unwrap();
        assert!(mesh.element_count() > 0);
    }

    #[test]
    fn no_slot_nodes_are_generated() {
        let mesh = BlockMesher
            .generate_mesh(&geometry(0.025), 1.0, ElementType::Quad4)
            .unwrap();
        let inside_slot = mesh
            .coordinates
            .iter()
            .filter(|p| p.x > 0.125 + 1e-12 && p.x < 0.175 - 1e-12)
            .filter(|p| p.y < 0.025 - 1e-12 || p.y > 0.075 + 1e-12)
            .count();
        assert_eq!(inside_slot, 0);
    }

    #[test]
    fn vanishing_size_factor_fails_before_allocating() {
        let result = BlockMesher.generate_mesh(&geometry(0.025), 1e-10, ElementType::Quad4);
        assert!(matches!(result, Err(SlotPlateError::Mesher(_))));

        assert!(block_divisions(&[0.0, 0.3], 1e-13).is_err());
        assert_eq!(grid_node_count(&[usize::MAX, 1], &[1]), None);
        assert_eq!(grid_node_count(&[30], &[10]), Some(31 * 11));
    }

    #[test]
    fn hairline_ligament_is_rejected() {
        let result = BlockMesher.generate_mesh(&geometry(0.0499999), 1.0, ElementType::Quad4);
        match result {
            Err(SlotPlateError::Mesher(msg)) => assert!(msg.contains("smallest feature"), "{msg}"),
            other => panic!("expected mesher error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_tiny_elements() {
        let result = BlockMesher.generate_mesh(&geometry(0.025), 1e-4, ElementType::Quad4);
        assert!(matches!(result, Err(SlotPlateError::Mesher(_))));
    }
}
