//! Position-based simulation of cloth and soft bodies.
//!
//! A [`Simulation`] owns the particles, the constraints connecting them and a solver.
//! Each call to [`Simulation::step`]
//!
//! 1. computes external forces (gravity and quadratic air drag),
//! 2. predicts positions with a symplectic Euler step,
//! 3. relaxes the predicted positions against the constraints,
//! 4. optionally separates overlapping parts of the surface,
//! 5. derives velocities from the net displacement, damps them and commits the positions.

use crate::math::{Vec3, EPSILON};

use itertools::izip;
use thiserror::Error;

#[cfg(feature = "serde-types")]
use serde::{Deserialize, Serialize};

//

pub mod collision;
pub use collision::{Aabb, Bvh, CollisionPolicy, LeafGrid};

pub mod constraint;
pub use constraint::{Constraint, MaterialParams, VolumeMaterialParams};

pub mod lattice;
pub use lattice::{BlockParams, Lattice};

pub mod particle;
pub use particle::ParticleStore;

pub mod solver;
pub use solver::{ParallelSolver, SerialSolver, Solver, StepError};

//

/// Errors in the setup of a simulation. These are all detected at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("the parallel solver needs a square number of particles, got {count}")]
    NonSquareParticleCount { count: usize },
    #[error("failed to spawn a solver thread")]
    ThreadSpawn(#[source] std::io::Error),
    #[error("particle index {index} out of range for {count} particles")]
    IndexOutOfRange { index: usize, count: usize },
}

//

/// Settings of a simulation.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-types", serde(default))]
pub struct SimulationParams {
    /// Number of particles along each side of a cloth lattice.
    pub resolution: usize,
    /// Side length of a cloth lattice.
    pub size: f32,
    /// Relaxation iterations per step.
    pub iterations: usize,
    /// Whether to solve on a pool of worker threads.
    pub parallel: bool,
    /// The parallel solver uses `threads_per_axis²` threads.
    pub threads_per_axis: usize,
    pub gravity: Vec3,
    /// Coefficient of the drag force `-c v |v|`.
    pub air_resistance: f32,
    /// Fraction of velocity lost per second, in `[0, 1)`.
    pub damping: f32,
    pub stretch_stiffness: f32,
    /// Zero disables bending constraints altogether.
    ///
    /// Bending corrections from neighbouring hinges add up within an iteration,
    /// so values above about 0.2 make the relaxation diverge within a few steps.
    /// Positions grow without bound until the step fails with
    /// [`StepError::NonFinitePositions`].
    pub bending_stiffness: f32,
    pub material: MaterialParams,
    /// Use FEM triangle constraints instead of distance constraints for the cloth.
    pub use_fem: bool,
    pub collisions: CollisionPolicy,
    /// How far the collision grid extends past the initial bounds of the mesh.
    pub collision_bounds_margin: f32,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            resolution: 10,
            size: 20.0,
            iterations: 5,
            parallel: false,
            threads_per_axis: 3,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            air_resistance: 0.001,
            damping: 0.001,
            stretch_stiffness: 0.5,
            bending_stiffness: 0.0,
            material: MaterialParams::default(),
            use_fem: false,
            collisions: CollisionPolicy::Ignore,
            collision_bounds_margin: 10.0,
        }
    }
}

fn check(ok: bool, name: &'static str, reason: &str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter {
            name,
            reason: reason.to_string(),
        })
    }
}

fn is_positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

impl SimulationParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |v: f32| (0.0..=1.0).contains(&v);

        check(self.resolution >= 2, "resolution", "must be at least 2")?;
        check(self.iterations >= 1, "iterations", "must be at least 1")?;
        check(self.threads_per_axis >= 1, "threads_per_axis", "must be at least 1")?;
        check(is_positive(self.size), "size", "must be finite and positive")?;
        check(
            self.gravity.x.is_finite() && self.gravity.y.is_finite() && self.gravity.z.is_finite(),
            "gravity",
            "must be finite",
        )?;
        check(
            self.air_resistance.is_finite() && self.air_resistance >= 0.0,
            "air_resistance",
            "must be finite and non-negative",
        )?;
        check(
            (0.0..1.0).contains(&self.damping),
            "damping",
            "must be in [0, 1)",
        )?;
        check(unit(self.stretch_stiffness), "stretch_stiffness", "must be in [0, 1]")?;
        check(unit(self.bending_stiffness), "bending_stiffness", "must be in [0, 1]")?;
        check(unit(self.material.stiffness), "material.stiffness", "must be in [0, 1]")?;
        for (modulus, name) in [
            (self.material.youngs_modulus_x, "material.youngs_modulus_x"),
            (self.material.youngs_modulus_y, "material.youngs_modulus_y"),
            (self.material.youngs_modulus_shear, "material.youngs_modulus_shear"),
        ] {
            check(is_positive(modulus), name, "must be finite and positive")?;
        }
        check(
            self.material.poisson_denominator().abs() > EPSILON,
            "material.poisson_ratio_xy",
            "the product of the Poisson ratios must not be 1",
        )?;
        check(
            self.collision_bounds_margin.is_finite() && self.collision_bounds_margin >= 0.0,
            "collision_bounds_margin",
            "must be finite and non-negative",
        )?;
        Ok(())
    }
}

//

/// The stage a step is in. Between steps this is `Idle`,
/// unless the last step failed, in which case it's the stage that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepPhase {
    Idle,
    ComputingForces,
    PredictingPositions,
    Relaxing,
    ResolvingCollisions,
    DerivingVelocities,
    Damping,
    Committing,
}

/// Symplectic Euler integration around the constraint solver.
#[derive(Clone, Debug)]
pub struct Integrator {
    pub gravity: Vec3,
    pub air_resistance: f32,
    pub damping: f32,
    forces: Vec<Vec3>,
}

impl Integrator {
    pub fn new(params: &SimulationParams, particle_count: usize) -> Self {
        Self {
            gravity: params.gravity,
            air_resistance: params.air_resistance,
            damping: params.damping,
            forces: vec![Vec3::zero(); particle_count],
        }
    }

    /// External forces computed by the last call to `apply_external_forces`.
    #[inline]
    pub fn forces(&self) -> &[Vec3] {
        &self.forces
    }

    /// Compute gravity plus quadratic air drag `-c v |v|` for every particle.
    pub fn apply_external_forces(&mut self, velocities: &[Vec3]) {
        for (force, vel) in izip!(self.forces.iter_mut(), velocities) {
            *force = self.gravity - self.air_resistance * *vel * vel.mag();
        }
    }

    /// Write `x + (v + f dt w) dt` to `candidates` and the displacement to `displacement`.
    /// Pinned particles get zero displacement.
    pub fn predict_positions(
        &self,
        dt: f32,
        positions: &[Vec3],
        velocities: &[Vec3],
        inverse_masses: &[f32],
        candidates: &mut [Vec3],
        displacement: &mut [Vec3],
    ) {
        for (pos, vel, force, &w, cand, disp) in izip!(
            positions,
            velocities,
            &self.forces,
            inverse_masses,
            candidates.iter_mut(),
            displacement.iter_mut()
        ) {
            *disp = if w == 0.0 {
                Vec3::zero()
            } else {
                (*vel + *force * dt * w) * dt
            };
            *cand = *pos + *disp;
        }
    }

    /// Set velocities to the net displacement of the step divided by `dt`.
    pub fn derive_velocities(
        &self,
        dt: f32,
        displacement: &[Vec3],
        inverse_masses: &[f32],
        velocities: &mut [Vec3],
    ) {
        let inv_dt = 1.0 / dt;
        for (vel, disp, &w) in izip!(velocities.iter_mut(), displacement, inverse_masses) {
            if w != 0.0 {
                *vel = *disp * inv_dt;
            }
        }
    }

    /// Scale velocities by `(1 - damping)^dt`.
    pub fn damp(&self, dt: f32, inverse_masses: &[f32], velocities: &mut [Vec3]) {
        let factor = (1.0 - self.damping).powf(dt);
        for (vel, &w) in izip!(velocities.iter_mut(), inverse_masses) {
            if w != 0.0 {
                *vel *= factor;
            }
        }
    }

    /// Make the relaxed positions the new committed state.
    pub fn commit(&self, candidates: &[Vec3], inverse_masses: &[f32], positions: &mut [Vec3]) {
        for (pos, cand, &w) in izip!(positions.iter_mut(), candidates, inverse_masses) {
            if w != 0.0 {
                *pos = *cand;
            }
        }
    }
}

//

struct Collisions {
    bvh: Bvh,
    grid: LeafGrid,
}

/// A running simulation.
pub struct Simulation {
    params: SimulationParams,
    particles: ParticleStore,
    constraints: Vec<Constraint>,
    triangles: Vec<[usize; 3]>,
    integrator: Integrator,
    solver: Solver,
    collisions: Option<Collisions>,
    phase: StepPhase,
    // per-step working buffers
    candidates: Vec<Vec3>,
    displacement: Vec<Vec3>,
}

impl Simulation {
    /// Create a cloth simulation as described by the parameters.
    pub fn new(params: SimulationParams) -> Result<Self, ConfigError> {
        params.validate()?;
        Self::from_lattice(Lattice::cloth(&params), params)
    }

    /// Create a simulation from an arbitrary set of particles and constraints.
    ///
    /// `resolution`, `size`, `stretch_stiffness`, `bending_stiffness`, `material` and `use_fem`
    /// in the parameters are only used by [`Simulation::new`] and are ignored here.
    pub fn from_lattice(lattice: Lattice, params: SimulationParams) -> Result<Self, ConfigError> {
        params.validate()?;

        let Lattice {
            positions,
            inverse_masses,
            triangles,
            constraints,
            quads,
            quad_columns,
        } = lattice;
        let particles = ParticleStore::new(positions, inverse_masses)?;
        let count = particles.len();

        let indices = constraints
            .iter()
            .flat_map(|c| c.particles().iter().copied())
            .chain(triangles.iter().flatten().copied())
            .chain(quads.iter().flatten().copied());
        for index in indices {
            if index >= count {
                return Err(ConfigError::IndexOutOfRange { index, count });
            }
        }

        let solver = build_solver(&params, &constraints, count)?;

        let collisions = if quads.is_empty() {
            None
        } else {
            let bvh = Bvh::new(quads, quad_columns, particles.positions());
            let grid = LeafGrid::for_bvh(&bvh, params.collision_bounds_margin);
            Some(Collisions { bvh, grid })
        };

        log::info!(
            "created simulation with {} particles, {} constraints, {} solver",
            count,
            constraints.len(),
            if params.parallel { "parallel" } else { "serial" }
        );

        Ok(Self {
            integrator: Integrator::new(&params, count),
            params,
            particles,
            constraints,
            triangles,
            solver,
            collisions,
            phase: StepPhase::Idle,
            candidates: vec![Vec3::zero(); count],
            displacement: vec![Vec3::zero(); count],
        })
    }

    /// Advance the simulation by `dt` seconds.
    ///
    /// If this fails, the simulation is stalled: committed state is left as it was
    /// before the step and [`Simulation::phase`] reports where it stopped.
    pub fn step(&mut self, dt: f32) -> Result<(), StepError> {
        let _span = tracy_span!("simulation step", "step");

        if !(dt.is_finite() && dt > 0.0) {
            return Err(StepError::InvalidTimeStep(dt));
        }

        let (positions, velocities, inverse_masses) = self.particles.state_mut();

        self.phase = StepPhase::ComputingForces;
        self.integrator.apply_external_forces(velocities);

        self.phase = StepPhase::PredictingPositions;
        self.integrator.predict_positions(
            dt,
            positions,
            velocities,
            inverse_masses,
            &mut self.candidates,
            &mut self.displacement,
        );

        self.phase = StepPhase::Relaxing;
        self.solver.relax(
            &self.constraints,
            positions,
            inverse_masses,
            &mut self.candidates,
            &mut self.displacement,
        )?;

        if let (CollisionPolicy::PushApart, Some(coll)) =
            (self.params.collisions, &mut self.collisions)
        {
            self.phase = StepPhase::ResolvingCollisions;
            coll.bvh.refit(&self.candidates);
            let pairs = coll.grid.overlapping_pairs(&coll.bvh);
            collision::push_apart(
                &coll.bvh,
                &pairs,
                positions,
                inverse_masses,
                &mut self.candidates,
                &mut self.displacement,
            );
        }

        // a diverged relaxation must not reach the committed state
        if let Some(particle) = self
            .candidates
            .iter()
            .position(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
        {
            log::error!("particle {particle} diverged during relaxation, step not committed");
            return Err(StepError::NonFinitePositions { particle });
        }

        self.phase = StepPhase::DerivingVelocities;
        self.integrator
            .derive_velocities(dt, &self.displacement, inverse_masses, velocities);

        self.phase = StepPhase::Damping;
        self.integrator.damp(dt, inverse_masses, velocities);

        self.phase = StepPhase::Committing;
        self.integrator
            .commit(&self.candidates, inverse_masses, positions);

        if let Some(coll) = &mut self.collisions {
            coll.bvh.refit(positions);
        }

        self.phase = StepPhase::Idle;
        log::trace!("stepped simulation by {dt}");
        Ok(())
    }

    /// Switch between the serial and parallel solver without touching the simulation state.
    ///
    /// Switching to the mode already in use is a no-op unless the solver is stalled,
    /// in which case a fresh one is built. On error the previous solver is kept.
    pub fn set_parallel(&mut self, parallel: bool) -> Result<(), ConfigError> {
        let stalled = matches!(&self.solver, Solver::Parallel(p) if p.is_stalled());
        if parallel == self.solver.is_parallel() && !stalled {
            return Ok(());
        }

        let params = SimulationParams {
            parallel,
            ..self.params
        };
        let solver = build_solver(&params, &self.constraints, self.particles.len())?;
        // the old solver is dropped here, releasing its threads if it had any
        self.solver = solver;
        self.params = params;
        self.phase = StepPhase::Idle;
        log::debug!(
            "switched to {} solver",
            if parallel { "parallel" } else { "serial" }
        );
        Ok(())
    }

    #[inline]
    pub fn is_parallel(&self) -> bool {
        self.solver.is_parallel()
    }

    #[inline]
    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    #[inline]
    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    #[inline]
    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    #[inline]
    pub fn positions(&self) -> &[Vec3] {
        self.particles.positions()
    }

    #[inline]
    pub fn velocities(&self) -> &[Vec3] {
        self.particles.velocities()
    }

    #[inline]
    pub fn inverse_masses(&self) -> &[f32] {
        self.particles.inverse_masses()
    }

    #[inline]
    pub fn is_pinned(&self, idx: usize) -> bool {
        self.particles.is_pinned(idx)
    }

    /// Pin a particle in place from now on.
    pub fn pin(&mut self, idx: usize) -> Result<(), ConfigError> {
        self.particles.pin(idx)
    }

    pub fn set_velocity(&mut self, idx: usize, velocity: Vec3) -> Result<(), ConfigError> {
        self.particles.set_velocity(idx, velocity)
    }

    /// Triangles of the rendered surface. These never change after construction.
    #[inline]
    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    #[inline]
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// The collision hierarchy, if the lattice has a quad surface.
    pub fn bvh(&self) -> Option<&Bvh> {
        self.collisions.as_ref().map(|c| &c.bvh)
    }

    /// Pairs of surface quads whose boxes overlap at the last committed positions,
    /// as ascending `(lower, higher)` leaf indices. No response is applied.
    pub fn overlapping_leaf_pairs(&mut self) -> Vec<(usize, usize)> {
        match &mut self.collisions {
            Some(coll) => coll.grid.overlapping_pairs(&coll.bvh),
            None => Vec::new(),
        }
    }
}

fn build_solver(
    params: &SimulationParams,
    constraints: &[Constraint],
    particle_count: usize,
) -> Result<Solver, ConfigError> {
    Ok(if params.parallel {
        Solver::Parallel(ParallelSolver::new(
            constraints,
            particle_count,
            params.iterations,
            params.threads_per_axis,
        )?)
    } else {
        Solver::Serial(SerialSolver::new(particle_count, params.iterations)?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> SimulationParams {
        SimulationParams {
            resolution: 6,
            size: 6.0,
            threads_per_axis: 2,
            ..Default::default()
        }
    }

    #[test]
    fn default_params_are_valid() {
        SimulationParams::default().validate().unwrap();
    }

    #[test]
    fn invalid_params_are_rejected() {
        let cases = [
            SimulationParams {
                resolution: 1,
                ..Default::default()
            },
            SimulationParams {
                iterations: 0,
                ..Default::default()
            },
            SimulationParams {
                damping: 1.0,
                ..Default::default()
            },
            SimulationParams {
                size: f32::NAN,
                ..Default::default()
            },
            SimulationParams {
                stretch_stiffness: 1.5,
                ..Default::default()
            },
            SimulationParams {
                material: MaterialParams {
                    youngs_modulus_y: -1.0,
                    ..Default::default()
                },
                ..Default::default()
            },
            SimulationParams {
                material: MaterialParams {
                    youngs_modulus_shear: f32::NAN,
                    ..Default::default()
                },
                ..Default::default()
            },
            SimulationParams {
                material: MaterialParams {
                    poisson_ratio_xy: 1.0,
                    poisson_ratio_yx: 1.0,
                    ..Default::default()
                },
                ..Default::default()
            },
        ];
        for params in cases {
            assert!(
                matches!(
                    Simulation::new(params),
                    Err(ConfigError::InvalidParameter { .. })
                ),
                "accepted {params:?}"
            );
        }
    }

    #[test]
    fn bad_time_step_is_rejected() {
        let mut sim = Simulation::new(small_params()).unwrap();
        for dt in [0.0, -0.01, f32::NAN, f32::INFINITY] {
            assert!(matches!(sim.step(dt), Err(StepError::InvalidTimeStep(_))));
        }
        assert_eq!(sim.phase(), StepPhase::Idle);
    }

    #[test]
    fn free_particle_falls_with_gravity() {
        let lattice = Lattice {
            positions: vec![Vec3::zero()],
            inverse_masses: vec![1.0],
            ..Default::default()
        };
        let params = SimulationParams {
            air_resistance: 0.0,
            damping: 0.0,
            ..Default::default()
        };
        let mut sim = Simulation::from_lattice(lattice, params).unwrap();
        let dt = 0.01;
        sim.step(dt).unwrap();
        // v = g dt, x = g dt²
        assert!((sim.velocities()[0].y + 9.81 * dt).abs() < 1e-5);
        assert!((sim.positions()[0].y + 9.81 * dt * dt).abs() < 1e-6);
    }

    #[test]
    fn drag_opposes_motion() {
        let mut integrator = Integrator::new(
            &SimulationParams {
                gravity: Vec3::zero(),
                air_resistance: 0.5,
                ..Default::default()
            },
            2,
        );
        integrator.apply_external_forces(&[Vec3::new(2.0, 0.0, 0.0), Vec3::zero()]);
        assert_eq!(integrator.forces()[0], Vec3::new(-2.0, 0.0, 0.0));
        assert_eq!(integrator.forces()[1], Vec3::zero());
    }

    #[test]
    fn damping_scales_velocity() {
        let integrator = Integrator::new(
            &SimulationParams {
                damping: 0.5,
                ..Default::default()
            },
            1,
        );
        let mut vel = [Vec3::new(4.0, 0.0, 0.0)];
        integrator.damp(2.0, &[1.0], &mut vel);
        assert!((vel[0].x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_constraint_is_rejected() {
        let positions = vec![Vec3::zero(), Vec3::unit_x()];
        let lattice = Lattice {
            constraints: vec![constraint::DistanceConstraint::with_rest_length(0, 5, 1.0, 1.0).into()],
            inverse_masses: vec![1.0; 2],
            positions,
            ..Default::default()
        };
        assert!(matches!(
            Simulation::from_lattice(lattice, SimulationParams::default()),
            Err(ConfigError::IndexOutOfRange { index: 5, count: 2 })
        ));
    }

    #[test]
    fn mode_switch_keeps_state() {
        let mut sim = Simulation::new(small_params()).unwrap();
        for _ in 0..3 {
            sim.step(0.01).unwrap();
        }
        let positions = sim.positions().to_vec();
        let velocities = sim.velocities().to_vec();

        sim.set_parallel(true).unwrap();
        assert!(sim.is_parallel());
        assert_eq!(sim.positions(), &positions[..]);
        assert_eq!(sim.velocities(), &velocities[..]);
        sim.step(0.01).unwrap();

        sim.set_parallel(false).unwrap();
        assert!(!sim.is_parallel());
        sim.step(0.01).unwrap();
    }

    #[test]
    fn non_finite_relaxation_is_not_committed() {
        let mut sim = Simulation::new(small_params()).unwrap();
        sim.step(0.01).unwrap();
        sim.set_velocity(7, Vec3::broadcast(f32::INFINITY)).unwrap();
        let positions = sim.positions().to_vec();
        let velocities = sim.velocities().to_vec();

        for _ in 0..2 {
            assert!(matches!(
                sim.step(0.01),
                Err(StepError::NonFinitePositions { .. })
            ));
            assert_eq!(sim.positions(), &positions[..]);
            assert_eq!(sim.velocities(), &velocities[..]);
            assert_eq!(sim.phase(), StepPhase::Relaxing);
        }
        let hierarchy = sim.bvh().unwrap();
        let root = hierarchy.aabb(hierarchy.root().unwrap());
        assert!(root.max().x.is_finite());
    }

    #[test]
    fn parallel_needs_square_particle_count() {
        let lattice = Lattice {
            positions: vec![Vec3::zero(); 5],
            inverse_masses: vec![1.0; 5],
            ..Default::default()
        };
        let params = SimulationParams {
            parallel: true,
            ..Default::default()
        };
        assert!(matches!(
            Simulation::from_lattice(lattice, params),
            Err(ConfigError::NonSquareParticleCount { count: 5 })
        ));
    }

    #[test]
    fn failed_switch_keeps_old_solver() {
        let lattice = Lattice {
            positions: vec![Vec3::zero(); 5],
            inverse_masses: vec![1.0; 5],
            ..Default::default()
        };
        let mut sim = Simulation::from_lattice(lattice, SimulationParams::default()).unwrap();
        assert!(sim.set_parallel(true).is_err());
        assert!(!sim.is_parallel());
        sim.step(0.01).unwrap();
    }

    #[test]
    fn hierarchy_tracks_committed_positions() {
        let mut sim = Simulation::new(small_params()).unwrap();
        for _ in 0..10 {
            sim.step(0.02).unwrap();
        }
        let bvh = sim.bvh().unwrap();
        let root = bvh.aabb(bvh.root().unwrap());
        let tight = Aabb::from_points(sim.positions().iter().copied());
        assert!((root.min() - tight.min()).mag() < 1e-5);
        assert!((root.max() - tight.max()).mag() < 1e-5);
    }

    #[test]
    fn push_apart_never_moves_pinned_particles() {
        let params = SimulationParams {
            collisions: CollisionPolicy::PushApart,
            ..small_params()
        };
        let mut sim = Simulation::new(params).unwrap();
        let pinned: Vec<(usize, Vec3)> = (0..sim.particle_count())
            .filter(|&i| sim.is_pinned(i))
            .map(|i| (i, sim.positions()[i]))
            .collect();
        for _ in 0..20 {
            sim.step(0.02).unwrap();
        }
        for (i, pos) in pinned {
            assert_eq!(sim.positions()[i], pos);
            assert_eq!(sim.velocities()[i], Vec3::zero());
        }
        assert!(sim.positions().iter().all(|p| p.x.is_finite() && p.y.is_finite() && p.z.is_finite()));
    }
}
