//! Incremental reconstruction initializer.
//!
//! Seeds the set of initialized entities from gauge-fixing and fully
//! pinned known-coordinate constraints, then grows it in rounds: PnP
//! pose recovery for cameras seeing enough initialized points, point
//! admission once two initialized cameras observe them, and a
//! restricted bundle-adjustment sub-solve after every round that made
//! progress. Triangulation is an external pre-step: points still
//! missing coordinates are skipped and counted per round, so a caller
//! can triangulate them and re-run the grower.

mod epnp;
pub mod ransac;

pub use epnp::{epnp, PnpPose};
pub use ransac::{Estimator, RansacOptions, RansacResult};

use std::collections::HashSet;
use std::fmt;

use nalgebra::{Vector2, Vector3};
use tracing::{debug, info, warn};

use crate::error::{PrismError, PrismResult};
use crate::math::camera::Camera;
use crate::problem::{Constraint, ProblemBuilder, Project};
use crate::solver::{SolveOptions, Solver};

/// Configuration of the growth loop.
#[derive(Debug, Clone)]
pub struct IncrementalOptions {
    /// PnP RANSAC inlier threshold in pixels.
    pub pnp_threshold_px: f64,
    /// Minimum correspondences before a camera may be initialized.
    pub min_correspondences: usize,
    /// Iteration cap for each restricted sub-solve.
    pub max_round_iterations: usize,
    /// Cap on growth rounds.
    pub max_rounds: usize,
    /// Seed for the RANSAC sampling.
    pub seed: u64,
}

impl Default for IncrementalOptions {
    fn default() -> Self {
        IncrementalOptions {
            pnp_threshold_px: 4.0,
            min_correspondences: 6,
            max_round_iterations: 50,
            max_rounds: 20,
            seed: 1_234_567,
        }
    }
}

/// What one growth round added and how its sub-solve went.
#[derive(Debug, Clone)]
pub struct RoundRecord {
    pub round: usize,
    pub cameras_added: usize,
    pub points_added: usize,
    /// Points seen by enough initialized cameras but still missing
    /// coordinates; candidates for external triangulation.
    pub points_skipped_unplaced: usize,
    /// Final cost of the round's restricted sub-solve; `None` when the
    /// sub-solve failed.
    pub solve_cost: Option<f64>,
}

/// Per-run statistics of the grower.
#[derive(Debug, Clone, Default)]
pub struct IncrementalStats {
    pub rounds: usize,
    pub cameras_initialized: usize,
    pub cameras_total: usize,
    pub points_initialized: usize,
    pub points_total: usize,
    pub last_solve_cost: Option<f64>,
    /// One record per growth round, in order.
    pub round_log: Vec<RoundRecord>,
    /// Set when the run stopped on a failed sub-solve.
    pub failure: Option<String>,
}

impl IncrementalStats {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
            && self.cameras_initialized == self.cameras_total
            && self.points_initialized == self.points_total
    }
}

impl fmt::Display for IncrementalStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Incremental Initialization")?;
        writeln!(f, "  rounds:  {}", self.rounds)?;
        for record in &self.round_log {
            write!(
                f,
                "    round {}: +{} cameras, +{} points",
                record.round, record.cameras_added, record.points_added
            )?;
            if record.points_skipped_unplaced > 0 {
                write!(f, ", {} awaiting coordinates", record.points_skipped_unplaced)?;
            }
            match record.solve_cost {
                Some(cost) => writeln!(f, ", cost {cost:.3e}")?,
                None => writeln!(f)?,
            }
        }
        writeln!(
            f,
            "  cameras: {}/{}",
            self.cameras_initialized, self.cameras_total
        )?;
        writeln!(
            f,
            "  points:  {}/{}",
            self.points_initialized, self.points_total
        )?;
        if let Some(cost) = self.last_solve_cost {
            writeln!(f, "  last solve cost: {cost:.6e}")?;
        }
        if let Some(failure) = &self.failure {
            writeln!(f, "  stopped: {failure}")?;
        }
        Ok(())
    }
}

/// 3D-2D correspondence fed to the PnP estimator.
#[derive(Debug, Clone)]
struct Correspondence {
    world: Vector3<f64>,
    pixel: Vector2<f64>,
}

/// EPnP wrapped for the RANSAC loop; residual is the pixel
/// reprojection error.
struct PnpEstimator {
    camera: Camera,
}

impl Estimator for PnpEstimator {
    type Datum = Correspondence;
    type Model = PnpPose;

    fn min_samples(&self) -> usize {
        4
    }

    fn fit(&self, data: &[Correspondence], sample_indices: &[usize]) -> Option<PnpPose> {
        let world: Vec<Vector3<f64>> = sample_indices.iter().map(|&i| data[i].world).collect();
        let image: Vec<Vector2<f64>> = sample_indices.iter().map(|&i| data[i].pixel).collect();
        epnp(&world, &image, &self.camera).ok()
    }

    fn residual(&self, model: &PnpPose, datum: &Correspondence) -> f64 {
        let projected = self
            .camera
            .project(&model.rotation, &model.translation, &datum.world);
        let error = (projected - datum.pixel).norm();
        if error.is_nan() {
            f64::INFINITY
        } else {
            error
        }
    }

    fn refit(&self, data: &[Correspondence], inliers: &[usize]) -> Option<PnpPose> {
        if inliers.len() < 4 {
            return None;
        }
        let world: Vec<Vector3<f64>> = inliers.iter().map(|&i| data[i].world).collect();
        let image: Vec<Vector2<f64>> = inliers.iter().map(|&i| data[i].pixel).collect();
        epnp(&world, &image, &self.camera).ok()
    }
}

/// Runs the seed/grow/solve state machine over a project.
#[derive(Debug, Clone, Default)]
pub struct IncrementalInitializer {
    options: IncrementalOptions,
}

impl IncrementalInitializer {
    pub fn new(options: IncrementalOptions) -> Self {
        IncrementalInitializer { options }
    }

    /// Grow the initialized subset, updating the project's poses and
    /// point coordinates in place. A failed sub-solve stops the run
    /// and is reported through the returned stats.
    pub fn run(&self, project: &mut Project) -> PrismResult<IncrementalStats> {
        let mut initialized_points = self.seed_points(project);
        let mut initialized_cameras: HashSet<String> = HashSet::new();
        let mut stats = IncrementalStats {
            cameras_total: project.cameras.len(),
            points_total: project.points.len(),
            ..IncrementalStats::default()
        };
        info!(
            seed_points = initialized_points.len(),
            "incremental initialization started"
        );

        for round in 0..self.options.max_rounds {
            let new_cameras = self.grow_cameras(project, &initialized_points, &initialized_cameras);
            for (camera_id, pose) in &new_cameras {
                if let Some(camera) = project.camera_mut(camera_id) {
                    camera.rotation = pose.axis_angle();
                    camera.translation = pose.translation;
                }
                initialized_cameras.insert(camera_id.clone());
            }

            let (new_points, skipped_unplaced) =
                self.grow_points(project, &initialized_points, &initialized_cameras);
            for point_id in &new_points {
                initialized_points.insert(point_id.clone());
            }

            if new_cameras.is_empty() && new_points.is_empty() {
                debug!(round, "no progress, growth finished");
                break;
            }
            stats.rounds = round + 1;
            let mut record = RoundRecord {
                round,
                cameras_added: new_cameras.len(),
                points_added: new_points.len(),
                points_skipped_unplaced: skipped_unplaced,
                solve_cost: None,
            };
            info!(
                round,
                new_cameras = new_cameras.len(),
                new_points = new_points.len(),
                skipped_unplaced,
                "growth round complete"
            );

            match self.solve_restricted(project, &initialized_points, &initialized_cameras) {
                Ok(cost) => {
                    stats.last_solve_cost = Some(cost);
                    record.solve_cost = Some(cost);
                    stats.round_log.push(record);
                }
                Err(err) => {
                    warn!(round, error = %err, "restricted sub-solve failed, stopping");
                    stats.failure = Some(err.to_string());
                    stats.round_log.push(record);
                    break;
                }
            }
        }

        stats.cameras_initialized = initialized_cameras.len();
        stats.points_initialized = initialized_points.len();
        info!(
            rounds = stats.rounds,
            cameras = stats.cameras_initialized,
            points = stats.points_initialized,
            "incremental initialization finished"
        );
        Ok(stats)
    }

    /// Points referenced by a gauge fix or pinned on all three axes.
    fn seed_points(&self, project: &Project) -> HashSet<String> {
        let mut seeded = HashSet::new();
        for constraint in &project.constraints {
            match constraint {
                Constraint::GaugeFix {
                    origin,
                    axis_point,
                    plane_point,
                    ..
                } => {
                    seeded.insert(origin.clone());
                    seeded.insert(axis_point.clone());
                    seeded.insert(plane_point.clone());
                }
                Constraint::KnownCoordinate {
                    point,
                    x: Some(_),
                    y: Some(_),
                    z: Some(_),
                } => {
                    seeded.insert(point.clone());
                }
                _ => {}
            }
        }
        // A seeded point still needs coordinates to participate.
        seeded.retain(|id| {
            project
                .point(id)
                .map_or(false, |point| point.position.is_some())
        });
        seeded
    }

    fn grow_cameras(
        &self,
        project: &Project,
        initialized_points: &HashSet<String>,
        initialized_cameras: &HashSet<String>,
    ) -> Vec<(String, PnpPose)> {
        let mut recovered = Vec::new();
        for camera in &project.cameras {
            if initialized_cameras.contains(&camera.id) {
                continue;
            }
            let correspondences: Vec<Correspondence> = project
                .observations
                .iter()
                .filter(|obs| {
                    obs.camera_id == camera.id && initialized_points.contains(&obs.point_id)
                })
                .filter_map(|obs| {
                    let point = project.point(&obs.point_id)?;
                    let world = point.position?;
                    Some(Correspondence {
                        world,
                        pixel: obs.pixel,
                    })
                })
                .collect();

            if correspondences.len() < self.options.min_correspondences {
                debug!(
                    camera = %camera.id,
                    correspondences = correspondences.len(),
                    required = self.options.min_correspondences,
                    "too few correspondences for PnP"
                );
                continue;
            }

            let estimator = PnpEstimator {
                camera: camera.intrinsics,
            };
            let opts = RansacOptions {
                thresh: self.options.pnp_threshold_px,
                min_inliers: self.options.min_correspondences,
                seed: self.options.seed,
                ..RansacOptions::default()
            };
            let result = ransac::ransac(&estimator, &correspondences, &opts);
            match result.model {
                Some(pose) if result.success => {
                    info!(
                        camera = %camera.id,
                        inliers = result.inliers.len(),
                        rms = result.inlier_rms,
                        "camera pose recovered"
                    );
                    recovered.push((camera.id.clone(), pose));
                }
                _ => {
                    debug!(camera = %camera.id, "PnP consensus not found");
                }
            }
        }
        recovered
    }

    /// Points observed by at least two initialized cameras, with
    /// coordinates already present. Also counts the sufficiently
    /// observed points that lack coordinates and stay out.
    fn grow_points(
        &self,
        project: &Project,
        initialized_points: &HashSet<String>,
        initialized_cameras: &HashSet<String>,
    ) -> (Vec<String>, usize) {
        let mut admitted = Vec::new();
        let mut skipped_unplaced = 0;
        for point in &project.points {
            if initialized_points.contains(&point.id) {
                continue;
            }
            let observing = project
                .observations
                .iter()
                .filter(|obs| {
                    obs.point_id == point.id && initialized_cameras.contains(&obs.camera_id)
                })
                .count();
            if observing < 2 {
                continue;
            }
            if point.position.is_none() {
                skipped_unplaced += 1;
                continue;
            }
            admitted.push(point.id.clone());
        }
        (admitted, skipped_unplaced)
    }

    /// Solve the sub-problem over initialized entities only and copy
    /// the result back into the project.
    fn solve_restricted(
        &self,
        project: &mut Project,
        initialized_points: &HashSet<String>,
        initialized_cameras: &HashSet<String>,
    ) -> PrismResult<f64> {
        let mut graph = ProblemBuilder::new(project)
            .restrict_to(initialized_points.clone(), initialized_cameras.clone())
            .build()?;
        let options = SolveOptions::default().with_max_iterations(self.options.max_round_iterations);
        let result = Solver::new(options).solve(&mut graph)?;
        if !result.success {
            return Err(PrismError::Initialization(format!(
                "restricted sub-solve did not converge: {}",
                result.message
            )));
        }
        ProblemBuilder::extract_solution(&graph, project)?;
        Ok(result.final_cost)
    }
}
