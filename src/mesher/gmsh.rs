use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    datatypes::{ElementType, MeshModel, Vertex},
    error::SlotPlateError,
    geometry::Geometry,
};

use super::{characteristic_length, check_feature_size, finish_mesh, MeshService};

enum MeshParseState {
    Nodes,
    Elements,
    Limbo,
}

/// Mesh backend driving an external gmsh executable
#[derive(Debug, Clone)]
pub struct GmshMesher {
    pub executable: PathBuf,
    /// Directory for the intermediate .geo and .msh files
    pub work_dir: PathBuf,
}

impl Default for GmshMesher {
    fn default() -> Self {
        GmshMesher {
            executable: PathBuf::from("gmsh"),
            work_dir: std::env::temp_dir(),
        }
    }
}

/// Writes a .geo script describing the plate outline
///
/// # Arguments
/// * `geometry` - The plate outline
/// * `output_file` - The output .geo file
/// * `characteristic_length` - Largest allowed element edge
/// * `element_type` - Quads are produced by recombining triangles
fn build_geo(
    geometry: &Geometry,
    output_file: &Path,
    characteristic_length: f64,
    element_type: ElementType,
) -> Result<(), SlotPlateError> {
    let mut script = String::new();

    script.push_str("// Define outline points\n");
    for (i, vertex) in geometry.points.iter().enumerate() {
        script.push_str(&format!(
            "Point({}) = {{ {}, {}, 0, {} }};\n",
            i + 1,
            vertex.x,
            vertex.y,
            characteristic_length
        ));
    }

    script.push_str("\n// Connect points\n");
    for (i, edge) in geometry.edges.iter().enumerate() {
        script.push_str(&format!(
            "Line({}) = {{ {}, {} }};\n",
            i + 1,
            edge.start + 1,
            edge.end + 1
        ));
    }

    script.push_str("\n// Register loop\nLine Loop(1) = {");
    let loop_edges: Vec<String> = geometry.surface.iter().map(|e| (e + 1).to_string()).collect();
    script.push_str(&format!(" {} }};\n", loop_edges.join(", ")));

    script.push_str("\n// Define surface\nPlane Surface(1) = { 1 };\n");

    for edge in geometry.edges.iter() {
        if let Some(tag) = edge.tag {
            script.push_str(&format!(
                "// {:?} edge carries marker {}\n",
                tag,
                tag.marker()
            ));
        }
    }

    if element_type == ElementType::Quad4 {
        script.push_str("Recombine Surface{1};\n");
    }

    script.push_str(&format!(
        "\n// Define Mesh Settings\n\
        Mesh.ElementOrder = 1;\n\
        Mesh.Algorithm  = 1;\n\
        Mesh.CharacteristicLengthMin = {cl_min};\n\
        Mesh.CharacteristicLengthMax = {cl_max};\n\
        Mesh 2;\n",
        cl_min = characteristic_length / 10.0,
        cl_max = characteristic_length,
    ));

    let mut geo_file = match std::fs::File::create(output_file) {
        Ok(f) => f,
        Err(err) => {
            return Err(SlotPlateError::Mesher(format!(
                "Failed to create {}: {err}",
                output_file.display()
            )))
        }
    };
    if let Err(err) = geo_file.write_all(script.as_bytes()) {
        return Err(SlotPlateError::Mesher(format!(
            "Failed to write {}: {err}",
            output_file.display()
        )));
    }

    Ok(())
}

fn next_line<'a>(
    lines: &mut impl Iterator<Item = &'a str>,
    context: &str,
) -> Result<&'a str, SlotPlateError> {
    match lines.next() {
        Some(line) => Ok(line.trim()),
        None => Err(SlotPlateError::Mesher(format!(
            "Unexpected end of mesh file while reading {context}"
        ))),
    }
}

fn parse_fields<T: std::str::FromStr>(line: &str, context: &str) -> Result<Vec<T>, SlotPlateError> {
    line.split_whitespace()
        .map(|field| {
            field.parse().map_err(|_| {
                SlotPlateError::Mesher(format!("Unexpected value '{field}' in {context}"))
            })
        })
        .collect()
}

/// Parses MSH 4.1 text into node coordinates and zero-based connectivity
///
/// # Arguments
/// * `contents` - The mesh file contents
/// * `element_type` - Only 2D elements of this type are kept
///
/// # Returns
/// A tuple with the node coordinates and the element connectivity, in that
/// order
pub fn parse_msh(
    contents: &str,
    element_type: ElementType,
) -> Result<(Vec<Vertex>, Vec<Vec<usize>>), SlotPlateError> {
    let mut parser_state = MeshParseState::Limbo;
    let mut parsed_section_metadata = false;
    let mut lines = contents.lines();

    let mut coordinates: Vec<Vertex> = Vec::new();
    let mut tag_to_index: HashMap<usize, usize> = HashMap::new();
    let mut raw_elements: Vec<Vec<usize>> = Vec::new();
    let mut skipped_elements: usize = 0;

    while let Some(line) = lines.next() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("$End") {
            parser_state = MeshParseState::Limbo;
            continue;
        }

        match parser_state {
            MeshParseState::Limbo => {
                parsed_section_metadata = false;

                if line == "$Nodes" {
                    parser_state = MeshParseState::Nodes;
                } else if line == "$Elements" {
                    parser_state = MeshParseState::Elements;
                }
            }
            MeshParseState::Nodes => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }

                let block: Vec<usize> = parse_fields(line, "node block header")?;
                if block.len() < 4 {
                    return Err(SlotPlateError::Mesher(format!(
                        "Malformed node block header '{line}'"
                    )));
                }
                let parametric = block[2] != 0;
                let num_nodes_local = block[3];

                let mut node_tags: Vec<usize> = Vec::with_capacity(num_nodes_local);
                for _ in 0..num_nodes_local {
                    let tag: Vec<usize> = parse_fields(next_line(&mut lines, "node tags")?, "node tag")?;
                    match tag.first() {
                        Some(t) => node_tags.push(*t),
                        None => {
                            return Err(SlotPlateError::Mesher("Empty node tag line".to_owned()))
                        }
                    }
                }

                for tag in node_tags {
                    let node_coords: Vec<f64> =
                        parse_fields(next_line(&mut lines, "node coordinates")?, "coordinates")?;
                    if node_coords.len() < 2 || (parametric && node_coords.len() < 3) {
                        return Err(SlotPlateError::Mesher(format!(
                            "Node {tag} has too few coordinates"
                        )));
                    }

                    tag_to_index.insert(tag, coordinates.len());
                    coordinates.push(Vertex::new(node_coords[0], node_coords[1]));
                }
            }
            MeshParseState::Elements => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }

                let block: Vec<usize> = parse_fields(line, "element block header")?;
                if block.len() < 4 {
                    return Err(SlotPlateError::Mesher(format!(
                        "Malformed element block header '{line}'"
                    )));
                }
                let entity_dim = block[0];
                let block_type = block[2];
                let num_elements = block[3];

                for _ in 0..num_elements {
                    let metadata: Vec<usize> =
                        parse_fields(next_line(&mut lines, "elements")?, "element")?;

                    if entity_dim != 2 {
                        continue;
                    }
                    if block_type != element_type.code() as usize {
                        skipped_elements += 1;
                        continue;
                    }
                    if metadata.len() != 1 + element_type.nodes_per_element() {
                        return Err(SlotPlateError::Mesher(format!(
                            "Element {:?} has the wrong number of nodes",
                            metadata.first()
                        )));
                    }

                    raw_elements.push(metadata[1..].to_vec());
                }
            }
        }
    }

    let mut connectivity: Vec<Vec<usize>> = Vec::with_capacity(raw_elements.len());
    for element in raw_elements {
        let mut nodes = Vec::with_capacity(element.len());
        for tag in element {
            match tag_to_index.get(&tag) {
                Some(index) => nodes.push(*index),
                None => {
                    return Err(SlotPlateError::Mesher(format!(
                        "Element references unknown node tag {tag}"
                    )))
                }
            }
        }
        connectivity.push(nodes);
    }

    if skipped_elements > 0 {
        println!(
            "warning [mesh]: skipped {} surface elements of another type",
            skipped_elements
        );
    }

    println!(
        "info: loaded {} nodes and {} elements",
        coordinates.len(),
        connectivity.len()
    );

    Ok((coordinates, connectivity))
}

impl GmshMesher {
    /// Runs gmsh on a .geo script and returns the produced .msh contents
    fn compute_mesh(&self, geo_filepath: &Path, msh_filepath: &Path) -> Result<String, SlotPlateError> {
        println!("info: running gmsh...");
        let output = match std::process::Command::new(&self.executable)
            .arg(geo_filepath)
            .arg("-2")
            .arg("-format")
            .arg("msh41")
            .arg("-o")
            .arg(msh_filepath)
            .output()
        {
            Ok(out) => out,
            Err(err) => {
                return Err(SlotPlateError::Mesher(format!("Gmsh failed to start: {err}")));
            }
        };

        if !output.status.success() {
            return Err(SlotPlateError::Mesher(format!(
                "Gmsh exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        match std::fs::read_to_string(msh_filepath) {
            Ok(c) => Ok(c),
            Err(err) => Err(SlotPlateError::Mesher(format!(
                "Unable to open generated mesh file: {err}"
            ))),
        }
    }
}

impl MeshService for GmshMesher {
    fn generate_mesh(
        &self,
        geometry: &Geometry,
        el_size_factor: f64,
        element_type: ElementType,
    ) -> Result<MeshModel, SlotPlateError> {
        let cl = characteristic_length(geometry, el_size_factor)?;
        check_feature_size(geometry, cl)?;

        let stem = format!("slotplate-{}", std::process::id());
        let geo_filepath = self.work_dir.join(format!("{stem}.geo"));
        let msh_filepath = self.work_dir.join(format!("{stem}.msh"));

        println!("info: building .geo for Gmsh with CL < {:.5}", cl);
        build_geo(geometry, &geo_filepath, cl, element_type)?;

        let contents = self.compute_mesh(&geo_filepath, &msh_filepath);

        // Intermediate files are scratch; a failed delete only leaves litter
        for path in [&geo_filepath, &msh_filepath] {
            if path.exists() && std::fs::remove_file(path).is_err() {
                println!("warning [mesh]: unable to delete {}", path.display());
            }
        }

        let (coordinates, connectivity) = parse_msh(&contents?, element_type)?;
        finish_mesh(geometry, element_type, coordinates, connectivity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{build_geometry, GeometryParameters};

    const TWO_TRIANGLES: &str = "$MeshFormat
4.1 0 8
$EndMeshFormat
$Nodes
2 4 1 4
2 1 0 2
1
2
0 0 0
1 0 0
2 1 0 2
3
4
1 1 0
0 1 0
$EndNodes
$Elements
2 3 1 3
1 1 1 1
1 1 2
2 1 2 2
2 1 2 3
3 4 3 1
$EndElements
";

    #[test]
    fn parses_nodes_and_surface_elements() {
        let (coordinates, connectivity) = parse_msh(TWO_TRIANGLES, ElementType::Tri3).unwrap();

        assert_eq!(coordinates.len(), 4);
        assert_eq!(coordinates[2], Vertex::new(1.0, 1.0));
        assert_eq!(connectivity, vec![vec![0, 1, 2], vec![3, 2, 0]]);
    }

    #[test]
    fn skips_other_element_types() {
        let (_, connectivity) = parse_msh(TWO_TRIANGLES, ElementType::Quad4).unwrap();
        assert!(connectivity.is_empty());
    }

    #[test]
    fn truncated_file_is_an_error() {
        let truncated = &TWO_TRIANGLES[..TWO_TRIANGLES.find("0 1 0").unwrap()];
        assert!(matches!(
            parse_msh(truncated, ElementType::Tri3),
            Err(SlotPlateError::Mesher(_))
        ));
    }

    #[test]
    fn geo_script_lists_outline() {
        let geometry = build_geometry(&GeometryParameters {
            h: 0.1,
            w: 0.3,
            a: 0.05,
            b: 0.025,
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plate.geo");

        build_geo(&geometry, &path, 0.01, ElementType::Quad4).unwrap();
        let script = std::fs::read_to_string(&path).unwrap();

        assert_eq!(script.matches("Point(").count(), 12);
        assert_eq!(script.matches("\nLine(").count(), 12);
        assert!(script.contains("Line(12) = { 12, 1 };"));
        assert!(script.contains("Recombine Surface{1};"));
        assert!(script.contains("Mesh.CharacteristicLengthMax = 0.01;"));
    }

    #[test]
    fn missing_executable_is_a_mesher_error() {
        let geometry = build_geometry(&GeometryParameters {
            h: 0.1,
            w: 0.3,
            a: 0.05,
            b: 0.025,
        });
        let dir = tempfile::tempdir().unwrap();
        let mesher = GmshMesher {
            executable: dir.path().join("no-such-gmsh"),
            work_dir: dir.path().to_path_buf(),
        };

        let result = mesher.generate_mesh(&geometry, 0.5, ElementType::Tri3);
        assert!(matches!(result, Err(SlotPlateError::Mesher(_))));
    }
}
