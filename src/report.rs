use std::fmt::Display;

use crate::{analysis::OutputData, model::InputData};

/// Plain text summary of a model and its results
pub struct Report<'a> {
    pub input: &'a InputData,
    pub output: &'a OutputData,
}

impl<'a> Report<'a> {
    pub fn new(input: &'a InputData, output: &'a OutputData) -> Report<'a> {
        Report { input, output }
    }
}

fn table_row(cells: &[&str], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths.iter())
        .map(|(cell, &width)| format!(" {cell:>width$} "))
        .collect();
    format!("|{}|\n", padded.join("|"))
}

/// Renders rows as a bordered table with right-aligned cells
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let dashes: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
    let border = format!("+{}+\n", dashes.join("+"));

    let mut out = border.clone();
    out += &table_row(headers, &widths);
    out += &border;
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        out += &table_row(&cells, &widths);
    }
    out += &border;
    out
}

impl Display for Report<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let input = self.input;
        let output = self.output;
        let mesh = &output.mesh;
        let element_name = match input.el_type {
            2 => "triangles",
            3 => "quads",
            _ => "unknown",
        };

        writeln!(f, "-------------- Model input --------------------------")?;
        writeln!(f, "t = {} m", input.thickness)?;
        writeln!(f, "E = {} Pa", input.youngs_modulus)?;
        writeln!(f, "v = {}", input.poisson_ratio)?;
        writeln!(f, "h = {} m, w = {} m", input.h, input.w)?;
        writeln!(f, "a = {} m, b = {} m", input.a, input.b)?;
        writeln!(f, "q = {} N", input.q)?;
        writeln!(f, "element type = {} ({})", input.el_type, element_name)?;
        writeln!(f, "element size factor = {}", input.el_size_factor)?;

        writeln!(f, "-------------- Results ------------------------------")?;
        writeln!(
            f,
            "{} nodes, {} elements, {} dofs",
            mesh.node_count(),
            mesh.element_count(),
            mesh.dof_count()
        )?;
        writeln!(f, "max von Mises stress = {:.4e} Pa", output.max_von_mises)?;
        writeln!(f, "max displacement = {:.4e} m", output.max_displacement())?;
        let [rx, ry] = output.total_reactions();
        writeln!(f, "total reactions = ({rx:.3}, {ry:.3}) N")?;

        let coordinates: Vec<Vec<String>> = mesh
            .coordinates
            .iter()
            .map(|p| vec![format!("{:.3}", p.x), format!("{:.3}", p.y)])
            .collect();
        writeln!(f, "Coordinates:")?;
        write!(f, "{}", table(&["x", "y"], &coordinates))?;

        let dofs: Vec<Vec<String>> = (0..mesh.node_count())
            .map(|n| mesh.node_dofs(n).iter().map(|d| (d + 1).to_string()).collect())
            .collect();
        writeln!(f, "Coordinate dofs:")?;
        write!(f, "{}", table(&["x", "y"], &dofs))?;

        let displacements: Vec<Vec<String>> = output
            .nodal_displacements()
            .iter()
            .map(|[ux, uy, _]| vec![format!("{:.3}", ux * 1000.0), format!("{:.3}", uy * 1000.0)])
            .collect();
        writeln!(f, "Nodal displacements (magnified by 1000):")?;
        write!(f, "{}", table(&["ux", "uy"], &displacements))
    }
}
