use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::{analysis::OutputData, datatypes::Vertex, error::SlotPlateError};

/// Geometry and result fields of one solve, ready to serialize
#[derive(Debug, Clone, PartialEq)]
pub struct StepFields {
    pub title: String,
    pub coordinates: Vec<Vertex>,
    /// Zero-based node indices per element
    pub connectivity: Vec<Vec<usize>>,
    pub displacements: Vec<[f64; 3]>,
    pub von_mises: Vec<f64>,
    pub principal_1: Vec<[f64; 3]>,
    pub principal_2: Vec<[f64; 3]>,
}

impl StepFields {
    pub fn from_output(output: &OutputData, title: &str) -> StepFields {
        StepFields {
            title: title.to_owned(),
            coordinates: output.mesh.coordinates.clone(),
            connectivity: output.mesh.connectivity.clone(),
            displacements: output.nodal_displacements(),
            von_mises: output.element_von_mises(),
            principal_1: output.principal_1_vectors(),
            principal_2: output.principal_2_vectors(),
        }
    }

    fn check_lengths(&self) -> Result<(), SlotPlateError> {
        let nodes = self.coordinates.len();
        let elements = self.connectivity.len();

        if self.displacements.len() != nodes {
            return Err(SlotPlateError::Export(format!(
                "{} displacement vectors for {nodes} points",
                self.displacements.len()
            )));
        }
        for (name, len) in [
            ("mises", self.von_mises.len()),
            ("principal stress 1", self.principal_1.len()),
            ("principal stress 2", self.principal_2.len()),
        ] {
            if len != elements {
                return Err(SlotPlateError::Export(format!(
                    "{len} {name} values for {elements} cells"
                )));
            }
        }
        if let Some(node) = self.connectivity.iter().flatten().find(|&&n| n >= nodes) {
            return Err(SlotPlateError::Export(format!(
                "Cell references missing point {node}"
            )));
        }

        Ok(())
    }
}

/// File name of one sweep step, e.g. `paramStudy_01_07.vtk`
///
/// # Arguments
/// * `kind` - 1 for slot depth sweeps, 2 for edge load sweeps
/// * `step` - One-based step number
pub fn step_file_name(kind: usize, step: usize) -> String {
    format!("paramStudy_0{kind}_{step:02}.vtk")
}

fn create(path: &Path) -> Result<BufWriter<File>, SlotPlateError> {
    match File::create(path) {
        Ok(f) => Ok(BufWriter::new(f)),
        Err(err) => Err(SlotPlateError::Export(format!(
            "Failed to create {}: {err}",
            path.display()
        ))),
    }
}

fn write_failed(path: &Path, err: std::io::Error) -> SlotPlateError {
    SlotPlateError::Export(format!("Failed to write {}: {err}", path.display()))
}

fn write_vectors<W: Write>(out: &mut W, name: &str, vectors: &[[f64; 3]]) -> std::io::Result<()> {
    writeln!(out, "VECTORS {name} double")?;
    for [x, y, z] in vectors {
        writeln!(out, "{x} {y} {z}")?;
    }
    Ok(())
}

fn write_vtk_body<W: Write>(out: &mut W, fields: &StepFields) -> std::io::Result<()> {
    writeln!(out, "# vtk DataFile Version 2.0")?;
    writeln!(out, "{}", fields.title.replace('\n', " "))?;
    writeln!(out, "ASCII")?;
    writeln!(out, "DATASET POLYDATA")?;

    writeln!(out, "POINTS {} double", fields.coordinates.len())?;
    for vertex in fields.coordinates.iter() {
        writeln!(out, "{} {} 0", vertex.x, vertex.y)?;
    }

    let size: usize = fields.connectivity.iter().map(|c| c.len() + 1).sum();
    writeln!(out, "POLYGONS {} {}", fields.connectivity.len(), size)?;
    for cell in fields.connectivity.iter() {
        let indices: Vec<String> = cell.iter().map(|n| n.to_string()).collect();
        writeln!(out, "{} {}", cell.len(), indices.join(" "))?;
    }

    writeln!(out, "POINT_DATA {}", fields.coordinates.len())?;
    write_vectors(out, "displacements", &fields.displacements)?;

    writeln!(out, "CELL_DATA {}", fields.connectivity.len())?;
    writeln!(out, "SCALARS mises double 1")?;
    writeln!(out, "LOOKUP_TABLE default")?;
    for value in fields.von_mises.iter() {
        writeln!(out, "{value}")?;
    }
    write_vectors(out, "principal_stress_1", &fields.principal_1)?;
    write_vectors(out, "principal_stress_2", &fields.principal_2)?;

    out.flush()
}

/// Writes one step as a legacy ASCII VTK polygon dataset
///
/// # Arguments
/// * `fields` - Geometry and result fields
/// * `path` - Destination file
pub fn write_vtk(fields: &StepFields, path: &Path) -> Result<(), SlotPlateError> {
    fields.check_lengths()?;

    let mut out = create(path)?;
    write_vtk_body(&mut out, fields).map_err(|err| write_failed(path, err))?;

    println!("info: wrote {}", path.display());
    Ok(())
}

fn write_nodes_csv<W: Write>(out: &mut W, output: &OutputData) -> std::io::Result<()> {
    let dofs = output.mesh.dofs_per_node;
    let u = &output.solution.displacements;
    let r = &output.solution.reactions;

    writeln!(out, "x,y,ux,uy,rx,ry,mises")?;
    for (i, vertex) in output.mesh.coordinates.iter().enumerate() {
        writeln!(
            out,
            "{x},{y},{ux},{uy},{rx},{ry},{mises}",
            x = vertex.x,
            y = vertex.y,
            ux = u[dofs * i],
            uy = u[dofs * i + 1],
            rx = r[dofs * i],
            ry = r[dofs * i + 1],
            mises = output.nodal_von_mises[i],
        )?;
    }
    out.flush()
}

fn write_elements_csv<W: Write>(out: &mut W, output: &OutputData) -> std::io::Result<()> {
    let node_columns: Vec<String> = (0..output.mesh.element_type.nodes_per_element())
        .map(|k| format!("n{k}"))
        .collect();
    writeln!(out, "{},mises,sx,sy,txy", node_columns.join(","))?;

    for (element, state) in output.mesh.connectivity.iter().zip(output.element_states.iter()) {
        let nodes: Vec<String> = element.iter().map(|n| n.to_string()).collect();
        writeln!(
            out,
            "{nodes},{mises},{sx},{sy},{txy}",
            nodes = nodes.join(","),
            mises = state.von_mises,
            sx = state.stress[0],
            sy = state.stress[1],
            txy = state.stress[2],
        )?;
    }
    out.flush()
}

/// Writes simulation results to two CSV files
///
/// `nodes.csv` holds coordinates, displacements, reactions and averaged von
/// Mises stress per node. `elements.csv` holds connectivity and stress per
/// element.
///
/// # Arguments
/// * `output` - Results of a solve
/// * `dir` - Directory to write into, created if missing
///
/// # Returns
/// Paths of the nodes and elements files, in that order
pub fn write_csv(output: &OutputData, dir: &Path) -> Result<(PathBuf, PathBuf), SlotPlateError> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        return Err(SlotPlateError::Export(format!(
            "Failed to create {}: {err}",
            dir.display()
        )));
    }

    let nodes_output = dir.join("nodes.csv");
    let elements_output = dir.join("elements.csv");
    let mut nodes_file = create(&nodes_output)?;
    write_nodes_csv(&mut nodes_file, output).map_err(|err| write_failed(&nodes_output, err))?;

    let mut elements_file = create(&elements_output)?;
    write_elements_csv(&mut elements_file, output)
        .map_err(|err| write_failed(&elements_output, err))?;

    println!(
        "info: wrote output to {} and {}",
        nodes_output.display(),
        elements_output.display()
    );

    Ok((nodes_output, elements_output))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> StepFields {
        StepFields {
            title: "unit square".to_owned(),
            coordinates: vec![
                Vertex::new(0.0, 0.0),
                Vertex::new(1.0, 0.0),
                Vertex::new(1.0, 1.0),
                Vertex::new(0.0, 1.0),
            ],
            connectivity: vec![vec![0, 1, 2], vec![0, 2, 3]],
            displacements: vec![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0], [0.5, 0.25, 0.0], [0.0, 0.25, 0.0]],
            von_mises: vec![1.5, 2.5],
            principal_1: vec![[1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
            principal_2: vec![[0.0, -1.0, 0.0], [0.0, -2.0, 0.0]],
        }
    }

    #[test]
    fn step_names_are_zero_padded() {
        assert_eq!(step_file_name(1, 1), "paramStudy_01_01.vtk");
        assert_eq!(step_file_name(1, 10), "paramStudy_01_10.vtk");
        assert_eq!(step_file_name(2, 7), "paramStudy_02_07.vtk");
    }

    #[test]
    fn vtk_has_all_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("square.vtk");
        write_vtk(&square(), &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines[0], "# vtk DataFile Version 2.0");
        assert_eq!(lines[1], "unit square");
        assert_eq!(lines[3], "DATASET POLYDATA");
        assert_eq!(lines[4], "POINTS 4 double");
        assert_eq!(lines[6], "1 0 0");
        assert!(contents.contains("POLYGONS 2 8\n3 0 1 2\n3 0 2 3\n"));
        assert!(contents.contains("POINT_DATA 4\nVECTORS displacements double\n"));
        assert!(contents.contains("CELL_DATA 2\nSCALARS mises double 1\nLOOKUP_TABLE default\n1.5\n2.5\n"));
        assert!(contents.contains("VECTORS principal_stress_1 double\n1 0 0\n2 0 0\n"));
        assert!(contents.contains("VECTORS principal_stress_2 double\n0 -1 0\n0 -2 0\n"));
    }

    #[test]
    fn mismatched_fields_are_rejected() {
        let mut fields = square();
        fields.von_mises.pop();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.vtk");
        assert!(matches!(
            write_vtk(&fields, &path),
            Err(SlotPlateError::Export(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn unwritable_path_is_an_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("step.vtk");
        assert!(matches!(
            write_vtk(&square(), &path),
            Err(SlotPlateError::Export(_))
        ));
    }
}
