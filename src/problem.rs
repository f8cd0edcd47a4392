//! Translation between a project's entities and the factor graph.
//!
//! A [`Project`] is the engine's input surface: named points, lines,
//! cameras, image observations, and an ordered constraint list. The
//! [`ProblemBuilder`] validates the constraints, creates one variable
//! per point and three per camera, instantiates one factor per
//! constraint (four for a gauge fix), and after solving copies values
//! back with [`ProblemBuilder::extract_solution`].
//!
//! Variable naming: `wp_{point}` for world points, `cam_{id}_rot`,
//! `cam_{id}_trans`, `cam_{id}_intr` for camera blocks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use nalgebra::{DVector, Vector2, Vector3};
use tracing::debug;

use crate::core::{Factor, FactorGraph, GraphSummary, Variable, VariableKind};
use crate::error::{PrismError, PrismResult};
use crate::math::camera::Camera;
use crate::math::robust::RobustLoss;
use crate::residuals::{
    Angle, AxisAlignment, Circle, Distance, KnownCoordinate, Reprojection, Residual,
};

/// A named world point, optionally with current coordinates.
#[derive(Debug, Clone)]
pub struct Point {
    pub id: String,
    pub position: Option<Vector3<f64>>,
}

impl Point {
    pub fn new(id: impl Into<String>, position: Vector3<f64>) -> Self {
        Point {
            id: id.into(),
            position: Some(position),
        }
    }

    pub fn unplaced(id: impl Into<String>) -> Self {
        Point {
            id: id.into(),
            position: None,
        }
    }
}

/// A named segment between two points, referenced by segment-based
/// constraints (angles, equal distances, axis alignment).
#[derive(Debug, Clone)]
pub struct Line {
    pub id: String,
    pub start: String,
    pub end: String,
}

impl Line {
    pub fn new(id: impl Into<String>, start: impl Into<String>, end: impl Into<String>) -> Self {
        Line {
            id: id.into(),
            start: start.into(),
            end: end.into(),
        }
    }
}

/// A camera with intrinsics, a world-to-camera pose, and per-block
/// lock flags excluding blocks from optimization.
#[derive(Debug, Clone)]
pub struct ProjectCamera {
    pub id: String,
    pub intrinsics: Camera,
    /// Axis-angle rotation of the world-to-camera transform.
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
    pub lock_rotation: bool,
    pub lock_translation: bool,
    pub lock_intrinsics: bool,
}

impl ProjectCamera {
    pub fn new(id: impl Into<String>, intrinsics: Camera) -> Self {
        ProjectCamera {
            id: id.into(),
            intrinsics,
            rotation: Vector3::zeros(),
            translation: Vector3::zeros(),
            lock_rotation: false,
            lock_translation: false,
            lock_intrinsics: true,
        }
    }

    pub fn with_pose(mut self, rotation: Vector3<f64>, translation: Vector3<f64>) -> Self {
        self.rotation = rotation;
        self.translation = translation;
        self
    }

    pub fn with_locks(mut self, rotation: bool, translation: bool, intrinsics: bool) -> Self {
        self.lock_rotation = rotation;
        self.lock_translation = translation;
        self.lock_intrinsics = intrinsics;
        self
    }
}

/// One image measurement of a point.
#[derive(Debug, Clone)]
pub struct Observation {
    pub camera_id: String,
    pub point_id: String,
    pub pixel: Vector2<f64>,
    pub sigma: f64,
}

impl Observation {
    pub fn new(
        camera_id: impl Into<String>,
        point_id: impl Into<String>,
        pixel: Vector2<f64>,
    ) -> Self {
        Observation {
            camera_id: camera_id.into(),
            point_id: point_id.into(),
            pixel,
            sigma: 1.0,
        }
    }

    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }
}

/// Typed constraint, one variant per residual family.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Euclidean distance between two points equals `target`.
    Distance { a: String, b: String, target: f64 },
    /// Two segments have equal length.
    EqualDistance { line1: String, line2: String },
    /// Length ratio `|line1| / |line2|` equals `target`.
    DistanceRatio {
        line1: String,
        line2: String,
        target: f64,
    },
    /// Angle between two segments equals `degrees`.
    Angle {
        line1: String,
        line2: String,
        degrees: f64,
    },
    Parallel { line1: String, line2: String },
    Perpendicular { line1: String, line2: String },
    /// Segment direction aligned with a coordinate axis
    /// ("x", "y", "z", optionally "-" prefixed).
    AxisAlign { line: String, axis: String },
    /// Pin selected axes of a point to target values.
    KnownCoordinate {
        point: String,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    },
    /// Remove the 7-parameter similarity ambiguity: `origin` at
    /// (0,0,0), `axis_point` on the +X axis, `plane_point` in the XY
    /// half-plane, and `scale` as the origin-to-axis-point distance.
    GaugeFix {
        origin: String,
        axis_point: String,
        plane_point: String,
        scale: f64,
    },
    /// Three or more points on one line.
    Collinear { points: Vec<String> },
    /// Four or more points on one plane.
    Coplanar { points: Vec<String> },
    /// Declare a named plane through three points; adds no factor,
    /// referenced by `PointOnPlane`.
    PlaneFromThree { plane: String, points: [String; 3] },
    PointOnLine { point: String, line: String },
    PointOnPlane { point: String, plane: String },
    /// Point on a fixed circle primitive (constant center/normal/radius).
    PointOnCircle {
        point: String,
        center: Vector3<f64>,
        normal: Vector3<f64>,
        radius: f64,
    },
    /// Point on the sphere through `reference` centered at `center`.
    PointOnSphere {
        point: String,
        center: String,
        reference: String,
    },
    /// Two points coincide.
    Equality { a: String, b: String },
    /// Four corners (in order a, b, c, d) form a rectangle, optionally
    /// with a target `|ab|/|ad|` aspect ratio.
    Rectangle {
        corners: [String; 4],
        aspect_ratio: Option<f64>,
    },
    /// Point pairs mirror each other across the plane through three
    /// points.
    MirrorSymmetry {
        plane: [String; 3],
        pairs: Vec<(String, String)>,
    },
    /// Three or more points with equal consecutive gaps.
    EqualSpacing { points: Vec<String> },
}

/// Constraint family, the granularity of robust-loss assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintKind {
    Reprojection,
    Distance,
    EqualDistance,
    DistanceRatio,
    Angle,
    AxisAlign,
    KnownCoordinate,
    GaugeFix,
    Collinear,
    Coplanar,
    PointOnLine,
    PointOnPlane,
    PointOnCircle,
    PointOnSphere,
    Equality,
    Rectangle,
    MirrorSymmetry,
    EqualSpacing,
}

impl Constraint {
    /// Family of the constraint; parallel and perpendicular are angle
    /// specializations.
    pub fn kind(&self) -> Option<ConstraintKind> {
        Some(match self {
            Constraint::Distance { .. } => ConstraintKind::Distance,
            Constraint::EqualDistance { .. } => ConstraintKind::EqualDistance,
            Constraint::DistanceRatio { .. } => ConstraintKind::DistanceRatio,
            Constraint::Angle { .. }
            | Constraint::Parallel { .. }
            | Constraint::Perpendicular { .. } => ConstraintKind::Angle,
            Constraint::AxisAlign { .. } => ConstraintKind::AxisAlign,
            Constraint::KnownCoordinate { .. } => ConstraintKind::KnownCoordinate,
            Constraint::GaugeFix { .. } => ConstraintKind::GaugeFix,
            Constraint::Collinear { .. } => ConstraintKind::Collinear,
            Constraint::Coplanar { .. } => ConstraintKind::Coplanar,
            Constraint::PlaneFromThree { .. } => return None,
            Constraint::PointOnLine { .. } => ConstraintKind::PointOnLine,
            Constraint::PointOnPlane { .. } => ConstraintKind::PointOnPlane,
            Constraint::PointOnCircle { .. } => ConstraintKind::PointOnCircle,
            Constraint::PointOnSphere { .. } => ConstraintKind::PointOnSphere,
            Constraint::Equality { .. } => ConstraintKind::Equality,
            Constraint::Rectangle { .. } => ConstraintKind::Rectangle,
            Constraint::MirrorSymmetry { .. } => ConstraintKind::MirrorSymmetry,
            Constraint::EqualSpacing { .. } => ConstraintKind::EqualSpacing,
        })
    }

    fn name(&self) -> &'static str {
        match self.kind() {
            Some(ConstraintKind::Reprojection) => "reprojection",
            Some(ConstraintKind::Distance) => "distance",
            Some(ConstraintKind::EqualDistance) => "equal_distance",
            Some(ConstraintKind::DistanceRatio) => "distance_ratio",
            Some(ConstraintKind::Angle) => "angle",
            Some(ConstraintKind::AxisAlign) => "axis_align",
            Some(ConstraintKind::KnownCoordinate) => "known_coordinate",
            Some(ConstraintKind::GaugeFix) => "gauge",
            Some(ConstraintKind::Collinear) => "collinear",
            Some(ConstraintKind::Coplanar) => "coplanar",
            Some(ConstraintKind::PointOnLine) => "point_on_line",
            Some(ConstraintKind::PointOnPlane) => "point_on_plane",
            Some(ConstraintKind::PointOnCircle) => "point_on_circle",
            Some(ConstraintKind::PointOnSphere) => "point_on_sphere",
            Some(ConstraintKind::Equality) => "equality",
            Some(ConstraintKind::Rectangle) => "rectangle",
            Some(ConstraintKind::MirrorSymmetry) => "mirror_symmetry",
            Some(ConstraintKind::EqualSpacing) => "equal_spacing",
            None => "plane_from_three",
        }
    }
}

/// Input to one build-solve-extract cycle.
#[derive(Debug, Clone, Default)]
pub struct Project {
    pub points: Vec<Point>,
    pub lines: Vec<Line>,
    pub cameras: Vec<ProjectCamera>,
    pub observations: Vec<Observation>,
    pub constraints: Vec<Constraint>,
}

impl Project {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point(&self, id: &str) -> Option<&Point> {
        self.points.iter().find(|p| p.id == id)
    }

    pub fn point_mut(&mut self, id: &str) -> Option<&mut Point> {
        self.points.iter_mut().find(|p| p.id == id)
    }

    pub fn line(&self, id: &str) -> Option<&Line> {
        self.lines.iter().find(|l| l.id == id)
    }

    pub fn camera(&self, id: &str) -> Option<&ProjectCamera> {
        self.cameras.iter().find(|c| c.id == id)
    }

    pub fn camera_mut(&mut self, id: &str) -> Option<&mut ProjectCamera> {
        self.cameras.iter_mut().find(|c| c.id == id)
    }

    /// Constraint-type histogram plus entity and graph-shape counts.
    ///
    /// Usable at any stage: the entity counts never require point
    /// coordinates, and the graph shape is attached only when the
    /// project builds in its current state.
    pub fn optimization_summary(&self) -> OptimizationSummary {
        let mut constraint_counts = BTreeMap::new();
        for constraint in &self.constraints {
            *constraint_counts
                .entry(constraint.name().to_string())
                .or_insert(0usize) += 1;
        }
        if !self.observations.is_empty() {
            constraint_counts.insert("reprojection".to_string(), self.observations.len());
        }
        OptimizationSummary {
            points: self.points.len(),
            unplaced_points: self.points.iter().filter(|p| p.position.is_none()).count(),
            cameras: self.cameras.len(),
            observations: self.observations.len(),
            graph: ProblemBuilder::new(self).build().ok().map(|g| g.summary()),
            constraint_counts,
        }
    }
}

/// Observability record for a project, queryable without solving.
#[derive(Debug, Clone)]
pub struct OptimizationSummary {
    pub points: usize,
    /// Points still missing coordinates.
    pub unplaced_points: usize,
    pub cameras: usize,
    pub observations: usize,
    /// Graph-shape counts, present only when the project currently builds.
    pub graph: Option<GraphSummary>,
    pub constraint_counts: BTreeMap<String, usize>,
}

impl fmt::Display for OptimizationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Project Summary")?;
        writeln!(
            f,
            "  points:       {} ({} unplaced)",
            self.points, self.unplaced_points
        )?;
        writeln!(f, "  cameras:      {}", self.cameras)?;
        writeln!(f, "  observations: {}", self.observations)?;
        writeln!(f, "  constraints:")?;
        for (name, count) in &self.constraint_counts {
            writeln!(f, "    {name}: {count}")?;
        }
        if let Some(graph) = &self.graph {
            write!(f, "{graph}")?;
        }
        Ok(())
    }
}

pub fn point_variable_id(point_id: &str) -> String {
    format!("wp_{point_id}")
}

pub fn camera_rotation_id(camera_id: &str) -> String {
    format!("cam_{camera_id}_rot")
}

pub fn camera_translation_id(camera_id: &str) -> String {
    format!("cam_{camera_id}_trans")
}

pub fn camera_intrinsics_id(camera_id: &str) -> String {
    format!("cam_{camera_id}_intr")
}

/// Builds a factor graph from a project.
pub struct ProblemBuilder<'a> {
    project: &'a Project,
    losses: HashMap<ConstraintKind, RobustLoss>,
    restrict_points: Option<HashSet<String>>,
    restrict_cameras: Option<HashSet<String>>,
}

impl<'a> ProblemBuilder<'a> {
    pub fn new(project: &'a Project) -> Self {
        ProblemBuilder {
            project,
            losses: HashMap::new(),
            restrict_points: None,
            restrict_cameras: None,
        }
    }

    /// Apply a robust loss to every factor of one constraint family.
    pub fn set_loss_for_kind(&mut self, kind: ConstraintKind, loss: RobustLoss) -> &mut Self {
        self.losses.insert(kind, loss);
        self
    }

    /// Build only variables in the given sets and factors fully
    /// contained within them. Used for restricted sub-solves during
    /// incremental initialization.
    pub fn restrict_to(
        mut self,
        points: HashSet<String>,
        cameras: HashSet<String>,
    ) -> Self {
        self.restrict_points = Some(points);
        self.restrict_cameras = Some(cameras);
        self
    }

    fn includes_point(&self, id: &str) -> bool {
        self.restrict_points
            .as_ref()
            .map_or(true, |set| set.contains(id))
    }

    fn includes_camera(&self, id: &str) -> bool {
        self.restrict_cameras
            .as_ref()
            .map_or(true, |set| set.contains(id))
    }

    fn loss_for(&self, kind: ConstraintKind) -> RobustLoss {
        self.losses.get(&kind).copied().unwrap_or_default()
    }

    fn placed_point(&self, id: &str) -> PrismResult<Vector3<f64>> {
        let point = self
            .project
            .point(id)
            .ok_or_else(|| PrismError::Constraint(format!("unknown point '{id}'")))?;
        point.position.ok_or_else(|| {
            PrismError::Constraint(format!("point '{id}' has no coordinates"))
        })
    }

    fn line_endpoints(&self, id: &str) -> PrismResult<(String, String)> {
        let line = self
            .project
            .line(id)
            .ok_or_else(|| PrismError::Constraint(format!("unknown line '{id}'")))?;
        if line.start == line.end {
            return Err(PrismError::Constraint(format!(
                "line '{id}' has coincident endpoints"
            )));
        }
        Ok((line.start.clone(), line.end.clone()))
    }

    fn require_distinct(&self, ids: &[&str], context: &str) -> PrismResult<()> {
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(*id) {
                return Err(PrismError::Constraint(format!(
                    "{context}: point '{id}' repeated"
                )));
            }
        }
        Ok(())
    }

    /// Build the populated graph. Fails fast on unknown references,
    /// repeated defining points, and missing coordinates.
    pub fn build(&self) -> PrismResult<FactorGraph> {
        let mut graph = FactorGraph::new();

        for point in &self.project.points {
            if !self.includes_point(&point.id) {
                continue;
            }
            let position = self.placed_point(&point.id)?;
            graph.add_variable(Variable::new(
                point_variable_id(&point.id),
                VariableKind::Point,
                DVector::from_vec(vec![position.x, position.y, position.z]),
            )?)?;
        }

        for camera in &self.project.cameras {
            if !self.includes_camera(&camera.id) {
                continue;
            }
            let r = camera.rotation;
            let t = camera.translation;
            graph.add_variable(
                Variable::new(
                    camera_rotation_id(&camera.id),
                    VariableKind::CameraRotation,
                    DVector::from_vec(vec![r.x, r.y, r.z]),
                )?
                .with_frozen(camera.lock_rotation),
            )?;
            graph.add_variable(
                Variable::new(
                    camera_translation_id(&camera.id),
                    VariableKind::CameraTranslation,
                    DVector::from_vec(vec![t.x, t.y, t.z]),
                )?
                .with_frozen(camera.lock_translation),
            )?;
            graph.add_variable(
                Variable::new(
                    camera_intrinsics_id(&camera.id),
                    VariableKind::CameraIntrinsics,
                    camera.intrinsics.to_vector(),
                )?
                .with_frozen(camera.lock_intrinsics),
            )?;
        }

        self.add_observation_factors(&mut graph)?;
        self.add_constraint_factors(&mut graph)?;

        debug!(
            variables = graph.num_variables(),
            factors = graph.num_factors(),
            "problem graph built"
        );
        Ok(graph)
    }

    fn add_observation_factors(&self, graph: &mut FactorGraph) -> PrismResult<()> {
        let loss = self.loss_for(ConstraintKind::Reprojection);
        for (index, obs) in self.project.observations.iter().enumerate() {
            if !self.includes_camera(&obs.camera_id) || !self.includes_point(&obs.point_id) {
                continue;
            }
            if self.project.camera(&obs.camera_id).is_none() {
                return Err(PrismError::Constraint(format!(
                    "observation {index} references unknown camera '{}'",
                    obs.camera_id
                )));
            }
            if self.project.point(&obs.point_id).is_none() {
                return Err(PrismError::Constraint(format!(
                    "observation {index} references unknown point '{}'",
                    obs.point_id
                )));
            }
            graph.add_factor(
                Factor::new(
                    format!("obs_{index}_{}_{}", obs.camera_id, obs.point_id),
                    vec![
                        camera_rotation_id(&obs.camera_id),
                        camera_translation_id(&obs.camera_id),
                        camera_intrinsics_id(&obs.camera_id),
                        point_variable_id(&obs.point_id),
                    ],
                    Residual::Reprojection(Reprojection::new(obs.pixel, obs.sigma)),
                )?
                .with_loss(loss),
            )?;
        }
        Ok(())
    }

    fn add_constraint_factors(&self, graph: &mut FactorGraph) -> PrismResult<()> {
        // Planes are declarations, resolved before factor creation.
        let mut planes: HashMap<&str, &[String; 3]> = HashMap::new();
        for constraint in &self.project.constraints {
            if let Constraint::PlaneFromThree { plane, points } = constraint {
                self.require_distinct(
                    &[&points[0], &points[1], &points[2]],
                    &format!("plane '{plane}'"),
                )?;
                if planes.insert(plane, points).is_some() {
                    return Err(PrismError::Constraint(format!(
                        "plane '{plane}' declared twice"
                    )));
                }
            }
        }

        for (index, constraint) in self.project.constraints.iter().enumerate() {
            let Some(kind) = constraint.kind() else {
                continue;
            };
            let loss = self.loss_for(kind);
            let name = constraint.name();

            let (variables, residual): (Vec<String>, Residual) = match constraint {
                Constraint::Distance { a, b, target } => {
                    self.require_distinct(&[a, b], name)?;
                    (
                        vec![self.point_var(a)?, self.point_var(b)?],
                        Residual::Distance(Distance::new(*target)),
                    )
                }
                Constraint::EqualDistance { line1, line2 } => {
                    let (a1, b1) = self.line_endpoints(line1)?;
                    let (a2, b2) = self.line_endpoints(line2)?;
                    (
                        self.point_vars(&[&a1, &b1, &a2, &b2])?,
                        Residual::EqualDistance,
                    )
                }
                Constraint::DistanceRatio { line1, line2, target } => {
                    let (a1, b1) = self.line_endpoints(line1)?;
                    let (a2, b2) = self.line_endpoints(line2)?;
                    (
                        self.point_vars(&[&a1, &b1, &a2, &b2])?,
                        Residual::DistanceRatio { target: *target },
                    )
                }
                Constraint::Angle { line1, line2, degrees } => {
                    let (a1, b1) = self.line_endpoints(line1)?;
                    let (a2, b2) = self.line_endpoints(line2)?;
                    (
                        self.point_vars(&[&a1, &b1, &a2, &b2])?,
                        Residual::Angle(Angle::from_degrees(*degrees)),
                    )
                }
                Constraint::Parallel { line1, line2 } => {
                    let (a1, b1) = self.line_endpoints(line1)?;
                    let (a2, b2) = self.line_endpoints(line2)?;
                    (
                        self.point_vars(&[&a1, &b1, &a2, &b2])?,
                        Residual::Angle(Angle::parallel()),
                    )
                }
                Constraint::Perpendicular { line1, line2 } => {
                    let (a1, b1) = self.line_endpoints(line1)?;
                    let (a2, b2) = self.line_endpoints(line2)?;
                    (
                        self.point_vars(&[&a1, &b1, &a2, &b2])?,
                        Residual::Angle(Angle::perpendicular()),
                    )
                }
                Constraint::AxisAlign { line, axis } => {
                    let (a, b) = self.line_endpoints(line)?;
                    (
                        self.point_vars(&[&a, &b])?,
                        Residual::AxisAlignment(AxisAlignment::from_name(axis)?),
                    )
                }
                Constraint::KnownCoordinate { point, x, y, z } => {
                    let mut targets = Vec::new();
                    if let Some(x) = x {
                        targets.push((0, *x));
                    }
                    if let Some(y) = y {
                        targets.push((1, *y));
                    }
                    if let Some(z) = z {
                        targets.push((2, *z));
                    }
                    (
                        vec![self.point_var(point)?],
                        Residual::KnownCoordinate(KnownCoordinate::new(targets)?),
                    )
                }
                Constraint::GaugeFix {
                    origin,
                    axis_point,
                    plane_point,
                    scale,
                } => {
                    self.add_gauge_factors(
                        graph, index, origin, axis_point, plane_point, *scale, loss,
                    )?;
                    continue;
                }
                Constraint::Collinear { points } => {
                    if points.len() < 3 {
                        return Err(PrismError::Constraint(
                            "collinear constraint needs at least 3 points".to_string(),
                        ));
                    }
                    let refs: Vec<&str> = points.iter().map(String::as_str).collect();
                    self.require_distinct(&refs, name)?;
                    (
                        self.point_vars(&refs)?,
                        Residual::Collinear {
                            n_points: points.len(),
                        },
                    )
                }
                Constraint::Coplanar { points } => {
                    if points.len() < 4 {
                        return Err(PrismError::Constraint(
                            "coplanar constraint needs at least 4 points".to_string(),
                        ));
                    }
                    let refs: Vec<&str> = points.iter().map(String::as_str).collect();
                    self.require_distinct(&refs, name)?;
                    (
                        self.point_vars(&refs)?,
                        Residual::Coplanar {
                            n_points: points.len(),
                        },
                    )
                }
                Constraint::PlaneFromThree { .. } => continue,
                Constraint::PointOnLine { point, line } => {
                    let (a, b) = self.line_endpoints(line)?;
                    self.require_distinct(&[point, &a, &b], name)?;
                    (
                        self.point_vars(&[point, &a, &b])?,
                        Residual::PointOnLine,
                    )
                }
                Constraint::PointOnPlane { point, plane } => {
                    let defining = planes.get(plane.as_str()).ok_or_else(|| {
                        PrismError::Constraint(format!("unknown plane '{plane}'"))
                    })?;
                    self.require_distinct(
                        &[point, &defining[0], &defining[1], &defining[2]],
                        name,
                    )?;
                    (
                        self.point_vars(&[point, &defining[0], &defining[1], &defining[2]])?,
                        Residual::PointOnPlane,
                    )
                }
                Constraint::PointOnCircle {
                    point,
                    center,
                    normal,
                    radius,
                } => (
                    vec![self.point_var(point)?],
                    Residual::PointOnCircle(Circle::new(*center, *normal, *radius)?),
                ),
                Constraint::PointOnSphere {
                    point,
                    center,
                    reference,
                } => {
                    self.require_distinct(&[point, center, reference], name)?;
                    (
                        self.point_vars(&[point, center, reference])?,
                        Residual::PointOnSphere,
                    )
                }
                Constraint::Equality { a, b } => {
                    self.require_distinct(&[a, b], name)?;
                    (
                        self.point_vars(&[a, b])?,
                        Residual::PointEquality,
                    )
                }
                Constraint::Rectangle {
                    corners,
                    aspect_ratio,
                } => {
                    self.require_distinct(
                        &[&corners[0], &corners[1], &corners[2], &corners[3]],
                        name,
                    )?;
                    (
                        self.point_vars(&[
                            &corners[0],
                            &corners[1],
                            &corners[2],
                            &corners[3],
                        ])?,
                        Residual::Rectangle {
                            aspect_ratio: *aspect_ratio,
                        },
                    )
                }
                Constraint::MirrorSymmetry { plane, pairs } => {
                    if pairs.is_empty() {
                        return Err(PrismError::Constraint(
                            "mirror symmetry needs at least one point pair".to_string(),
                        ));
                    }
                    self.require_distinct(&[&plane[0], &plane[1], &plane[2]], name)?;
                    let mut ids: Vec<&str> =
                        vec![&plane[0], &plane[1], &plane[2]];
                    for (p, q) in pairs {
                        ids.push(p);
                        ids.push(q);
                    }
                    (
                        self.point_vars(&ids)?,
                        Residual::MirrorSymmetry {
                            n_pairs: pairs.len(),
                        },
                    )
                }
                Constraint::EqualSpacing { points } => {
                    if points.len() < 3 {
                        return Err(PrismError::Constraint(
                            "equal spacing needs at least 3 points".to_string(),
                        ));
                    }
                    let refs: Vec<&str> = points.iter().map(String::as_str).collect();
                    self.require_distinct(&refs, name)?;
                    (
                        self.point_vars(&refs)?,
                        Residual::EqualSpacing {
                            n_points: points.len(),
                        },
                    )
                }
            };

            // Restricted builds skip constraints straddling the cut.
            if self.restrict_points.is_some()
                && !variables.iter().all(|id| graph.has_variable(id))
            {
                continue;
            }

            graph.add_factor(
                Factor::new(format!("{name}_{index}"), variables, residual)?.with_loss(loss),
            )?;
        }
        Ok(())
    }

    fn add_gauge_factors(
        &self,
        graph: &mut FactorGraph,
        index: usize,
        origin: &str,
        axis_point: &str,
        plane_point: &str,
        scale: f64,
        loss: RobustLoss,
    ) -> PrismResult<()> {
        self.require_distinct(&[origin, axis_point, plane_point], "gauge fix")?;
        if scale <= 0.0 {
            return Err(PrismError::Constraint(format!(
                "gauge scale must be positive, got {scale}"
            )));
        }
        let origin_var = self.point_var(origin)?;
        let axis_var = self.point_var(axis_point)?;
        let plane_var = self.point_var(plane_point)?;
        if self.restrict_points.is_some()
            && !(graph.has_variable(&origin_var)
                && graph.has_variable(&axis_var)
                && graph.has_variable(&plane_var))
        {
            return Ok(());
        }

        graph.add_factor(
            Factor::new(
                format!("gauge_origin_{index}"),
                vec![origin_var.clone()],
                Residual::KnownCoordinate(KnownCoordinate::full(0.0, 0.0, 0.0)),
            )?
            .with_loss(loss),
        )?;
        // Axis point on the +X axis: y and z pinned to zero.
        graph.add_factor(
            Factor::new(
                format!("gauge_axis_{index}"),
                vec![axis_var.clone()],
                Residual::KnownCoordinate(KnownCoordinate::new(vec![(1, 0.0), (2, 0.0)])?),
            )?
            .with_loss(loss),
        )?;
        // Plane point in the XY half-plane: z pinned to zero.
        graph.add_factor(
            Factor::new(
                format!("gauge_plane_{index}"),
                vec![plane_var],
                Residual::KnownCoordinate(KnownCoordinate::new(vec![(2, 0.0)])?),
            )?
            .with_loss(loss),
        )?;
        graph.add_factor(
            Factor::new(
                format!("gauge_scale_{index}"),
                vec![origin_var, axis_var],
                Residual::Distance(Distance::new(scale)),
            )?
            .with_loss(loss),
        )?;
        Ok(())
    }

    fn point_var(&self, id: &str) -> PrismResult<String> {
        if self.project.point(id).is_none() {
            return Err(PrismError::Constraint(format!("unknown point '{id}'")));
        }
        Ok(point_variable_id(id))
    }

    fn point_vars(&self, ids: &[&str]) -> PrismResult<Vec<String>> {
        ids.iter().map(|id| self.point_var(id)).collect()
    }

    /// Copy solved variable values back into the project.
    pub fn extract_solution(graph: &FactorGraph, project: &mut Project) -> PrismResult<()> {
        for point in &mut project.points {
            if let Some(variable) = graph.variable(&point_variable_id(&point.id)) {
                let v = variable.value();
                point.position = Some(Vector3::new(v[0], v[1], v[2]));
            }
        }
        for camera in &mut project.cameras {
            if let Some(variable) = graph.variable(&camera_rotation_id(&camera.id)) {
                let v = variable.value();
                camera.rotation = Vector3::new(v[0], v[1], v[2]);
            }
            if let Some(variable) = graph.variable(&camera_translation_id(&camera.id)) {
                let v = variable.value();
                camera.translation = Vector3::new(v[0], v[1], v[2]);
            }
            if let Some(variable) = graph.variable(&camera_intrinsics_id(&camera.id)) {
                camera.intrinsics = Camera::from_vector(variable.value())?;
            }
        }
        Ok(())
    }
}
