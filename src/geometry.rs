//! Outline of the slotted plate.
//!
//! The plate spans `[0, w] x [0, h]`. Two rectangular slots of width `a` are
//! cut from the middle of the bottom and top edges, each reaching `b` into the
//! plate. The outline is walked counter-clockwise from the origin.

use crate::datatypes::{BoundaryTag, Vertex};

/// Scalar dimensions of the plate, in meters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryParameters {
    pub h: f64,
    pub w: f64,
    pub a: f64,
    pub b: f64,
}

/// Straight boundary segment between two outline points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub start: usize,
    pub end: usize,
    pub tag: Option<BoundaryTag>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub points: Vec<Vertex>,
    pub edges: Vec<Edge>,
    /// Edge indices bounding the single surface
    pub surface: Vec<usize>,
}

impl Geometry {
    pub fn edge_vertices(&self, edge: &Edge) -> (Vertex, Vertex) {
        (self.points[edge.start], self.points[edge.end])
    }

    pub fn edge_length(&self, edge: &Edge) -> f64 {
        let (p, q) = self.edge_vertices(edge);
        p.distance(&q)
    }

    /// The edge carrying `tag`, if any
    pub fn tagged_edge(&self, tag: BoundaryTag) -> Option<&Edge> {
        self.edges.iter().find(|e| e.tag == Some(tag))
    }

    /// Shortest distance from `point` to the segment `edge`
    pub fn distance_to_edge(&self, edge: &Edge, point: &Vertex) -> f64 {
        let (p, q) = self.edge_vertices(edge);
        let (dx, dy) = (q.x - p.x, q.y - p.y);
        let length_sq = dx * dx + dy * dy;
        if length_sq == 0.0 {
            return p.distance(point);
        }

        let s = (((point.x - p.x) * dx + (point.y - p.y) * dy) / length_sq).clamp(0.0, 1.0);
        let foot = Vertex::new(p.x + s * dx, p.y + s * dy);
        foot.distance(point)
    }

    /// Position of `point` along `edge`, 0 at the start and 1 at the end
    pub fn edge_parameter(&self, edge: &Edge, point: &Vertex) -> f64 {
        let (p, q) = self.edge_vertices(edge);
        let (dx, dy) = (q.x - p.x, q.y - p.y);
        let length_sq = dx * dx + dy * dy;
        if length_sq == 0.0 {
            return 0.0;
        }
        ((point.x - p.x) * dx + (point.y - p.y) * dy) / length_sq
    }

    /// Smallest non-zero edge length or gap across the surface
    ///
    /// A gap is the distance from an outline point to an edge that does not
    /// end at it, such as the ligament between the two slot floors.
    pub fn min_feature_size(&self) -> f64 {
        let edge_lengths = self.edges.iter().map(|e| self.edge_length(e));
        let gaps = self.edges.iter().flat_map(move |edge| {
            self.points
                .iter()
                .enumerate()
                .filter(move |(i, _)| *i != edge.start && *i != edge.end)
                .map(move |(_, p)| self.distance_to_edge(edge, p))
        });

        edge_lengths
            .chain(gaps)
            .filter(|l| *l > 0.0)
            .fold(f64::INFINITY, f64::min)
    }

    /// Axis-aligned extent as (x_min, y_min, x_max, y_max)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.points.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
        )
    }
}

/// Builds the closed outline of the slotted plate
///
/// # Arguments
/// * `params` - Validated plate dimensions
///
/// # Returns
/// Twelve outline points, twelve edges with the load and fixed edges tagged,
/// and one surface bounded by all edges
pub fn build_geometry(params: &GeometryParameters) -> Geometry {
    let GeometryParameters { h, w, a, b } = *params;
    let left = (w - a) / 2.0;
    let right = (w + a) / 2.0;

    let points = vec![
        Vertex::new(0.0, 0.0),
        Vertex::new(left, 0.0),
        Vertex::new(left, b),
        Vertex::new(right, b),
        Vertex::new(right, 0.0),
        Vertex::new(w, 0.0),
        Vertex::new(w, h),
        Vertex::new(right, h),
        Vertex::new(right, h - b),
        Vertex::new(left, h - b),
        Vertex::new(left, h),
        Vertex::new(0.0, h),
    ];

    let edges: Vec<Edge> = (0..points.len())
        .map(|i| Edge {
            start: i,
            end: (i + 1) % points.len(),
            tag: match i {
                5 => Some(BoundaryTag::Load),
                11 => Some(BoundaryTag::Fixed),
                _ => None,
            },
        })
        .collect();

    let surface = (0..edges.len()).collect();

    Geometry {
        points,
        edges,
        surface,
    }
}
