//! End-to-end solves through the public project API.

use approx::assert_relative_eq;
use nalgebra::Vector3;

use prism_solver::problem::{Constraint, Point, ProblemBuilder, Project};
use prism_solver::solver::{SolveOptions, Solver, SolverMethod};

fn solve(project: &mut Project, options: SolveOptions) -> prism_solver::solver::SolveResult {
    let mut graph = ProblemBuilder::new(project).build().unwrap();
    let result = Solver::new(options).solve(&mut graph).unwrap();
    ProblemBuilder::extract_solution(&graph, project).unwrap();
    result
}

#[test]
fn empty_project_solves_trivially() {
    let mut project = Project::new();
    let result = solve(&mut project, SolveOptions::default());
    assert!(result.success);
    assert_eq!(result.iterations, 0);
    assert_eq!(result.final_cost, 0.0);
}

#[test]
fn pinned_origin_distance_converges() {
    let mut project = Project::new();
    project.points.push(Point::new("a", Vector3::new(0.1, -0.05, 0.02)));
    project.points.push(Point::new("b", Vector3::new(0.8, 0.3, -0.1)));
    project.constraints.push(Constraint::KnownCoordinate {
        point: "a".to_string(),
        x: Some(0.0),
        y: Some(0.0),
        z: Some(0.0),
    });
    project.constraints.push(Constraint::Distance {
        a: "a".to_string(),
        b: "b".to_string(),
        target: 2.0,
    });

    let result = solve(&mut project, SolveOptions::default());
    assert!(result.success, "status: {}", result.message);
    assert!(result.final_cost < 1e-10);

    let a = project.point("a").unwrap().position.unwrap();
    let b = project.point("b").unwrap().position.unwrap();
    assert_relative_eq!(a, Vector3::zeros(), epsilon = 1e-6);
    assert_relative_eq!((b - a).norm(), 2.0, epsilon = 1e-6);
}

#[test]
fn gauge_fixed_distance_converges() {
    let mut project = Project::new();
    project.points.push(Point::new("a", Vector3::new(0.1, 0.0, 0.05)));
    project.points.push(Point::new("b", Vector3::new(1.7, 0.2, -0.1)));
    project.points.push(Point::new("c", Vector3::new(0.4, 1.1, 0.3)));
    project.constraints.push(Constraint::GaugeFix {
        origin: "a".to_string(),
        axis_point: "b".to_string(),
        plane_point: "c".to_string(),
        scale: 2.0,
    });

    let result = solve(&mut project, SolveOptions::default());
    assert!(result.success, "status: {}", result.message);
    assert!(result.final_cost < 1e-10);

    let a = project.point("a").unwrap().position.unwrap();
    let b = project.point("b").unwrap().position.unwrap();
    let c = project.point("c").unwrap().position.unwrap();
    assert_relative_eq!(a, Vector3::zeros(), epsilon = 1e-6);
    assert_relative_eq!(b.y, 0.0, epsilon = 1e-6);
    assert_relative_eq!(b.z, 0.0, epsilon = 1e-6);
    assert_relative_eq!(c.z, 0.0, epsilon = 1e-6);
    assert_relative_eq!((b - a).norm(), 2.0, epsilon = 1e-6);
}

#[test]
fn rectangle_with_unit_aspect_converges_to_square() {
    let mut project = Project::new();
    project.points.push(Point::new("a", Vector3::new(0.1, -0.05, 0.02)));
    project.points.push(Point::new("b", Vector3::new(1.9, 0.1, -0.03)));
    project.points.push(Point::new("c", Vector3::new(2.05, 1.95, 0.05)));
    project.points.push(Point::new("d", Vector3::new(-0.1, 2.1, 0.02)));
    project.constraints.push(Constraint::GaugeFix {
        origin: "a".to_string(),
        axis_point: "b".to_string(),
        plane_point: "d".to_string(),
        scale: 2.0,
    });
    project.constraints.push(Constraint::Rectangle {
        corners: [
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "d".to_string(),
        ],
        aspect_ratio: Some(1.0),
    });

    let result = solve(
        &mut project,
        SolveOptions::default().with_max_iterations(200),
    );
    assert!(result.success, "status: {}", result.message);

    let a = project.point("a").unwrap().position.unwrap();
    let b = project.point("b").unwrap().position.unwrap();
    let c = project.point("c").unwrap().position.unwrap();
    let d = project.point("d").unwrap().position.unwrap();

    let sides = [b - a, c - b, d - c, a - d];
    for window in sides.windows(2) {
        assert_relative_eq!(window[0].norm(), window[1].norm(), epsilon = 1e-3);
    }
    for i in 0..4 {
        let u = sides[i];
        let v = -sides[(i + 3) % 4];
        let angle = (u.dot(&v) / (u.norm() * v.norm())).acos().to_degrees();
        assert_relative_eq!(angle, 90.0, epsilon = 1e-3);
    }
}

#[test]
fn dogbox_method_converges() {
    let mut project = Project::new();
    project.points.push(Point::new("a", Vector3::zeros()));
    project.points.push(Point::new("b", Vector3::new(0.5, 0.1, 0.0)));
    project.constraints.push(Constraint::KnownCoordinate {
        point: "a".to_string(),
        x: Some(0.0),
        y: Some(0.0),
        z: Some(0.0),
    });
    project.constraints.push(Constraint::Distance {
        a: "a".to_string(),
        b: "b".to_string(),
        target: 1.5,
    });

    let result = solve(
        &mut project,
        SolveOptions::default().with_method(SolverMethod::Dogbox),
    );
    assert!(result.success, "status: {}", result.message);
    let b = project.point("b").unwrap().position.unwrap();
    assert_relative_eq!(b.norm(), 1.5, epsilon = 1e-6);
}

#[test]
fn diagnostics_flag_missing_gauge() {
    let mut project = Project::new();
    project.points.push(Point::new("a", Vector3::zeros()));
    project.points.push(Point::new("b", Vector3::new(1.0, 0.0, 0.0)));
    project.constraints.push(Constraint::Distance {
        a: "a".to_string(),
        b: "b".to_string(),
        target: 1.0,
    });

    let mut graph = ProblemBuilder::new(&project).build().unwrap();
    let result = Solver::new(SolveOptions::default())
        .solve(&mut graph)
        .unwrap();
    let diagnostics = result.diagnostics.unwrap();
    assert!(!diagnostics.is_fully_constrained());
    assert!(!diagnostics.unconstrained_variables.is_empty());
}
