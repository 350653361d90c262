//! Iterative relaxation of the constraint set.
//!
//! Both solver kinds share the same numerical contract.
//! Each step starts from the committed positions and the displacement predicted by the integrator.
//! Every iteration then
//!
//! 1. zeroes the correction buffer,
//! 2. projects every constraint against the previous iteration's candidate positions,
//! 3. adds the corrections to the step's total displacement and
//!    recomputes the candidates as `committed + displacement`.
//!
//! Candidates are always rebuilt from the committed base, never from the previous candidates,
//! which keeps the result reproducible for a given constraint order.

use super::{constraint::Constraint, ConfigError};
use crate::math::Vec3;

use itertools::izip;
use thiserror::Error;

mod parallel;
pub use parallel::ParallelSolver;

pub(crate) mod sync;

/// Errors that can occur while running a simulation step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("time step must be finite and positive, got {0}")]
    InvalidTimeStep(f32),
    #[error("solver worker {worker} exited unexpectedly, the parallel solver is stalled")]
    WorkerExited { worker: usize },
    #[error("relaxed position of particle {particle} is not finite, the step was not committed")]
    NonFinitePositions { particle: usize },
}

/// Either of the two solver kinds, switchable at runtime by the simulation.
pub enum Solver {
    Serial(SerialSolver),
    Parallel(ParallelSolver),
}

impl Solver {
    /// Run all relaxation iterations of one step.
    ///
    /// On entry `candidates` holds the predicted positions
    /// and `displacement` the predicted motion relative to `committed`.
    /// On success both hold the relaxed result.
    ///
    /// The parallel solver owns its own partitioned copy of the constraints
    /// taken at construction and ignores `constraints`.
    pub fn relax(
        &mut self,
        constraints: &[Constraint],
        committed: &[Vec3],
        inverse_masses: &[f32],
        candidates: &mut [Vec3],
        displacement: &mut [Vec3],
    ) -> Result<(), StepError> {
        match self {
            Solver::Serial(s) => {
                s.relax(constraints, committed, inverse_masses, candidates, displacement);
                Ok(())
            }
            Solver::Parallel(p) => p.relax(committed, inverse_masses, candidates, displacement),
        }
    }

    #[inline]
    pub fn iterations(&self) -> usize {
        match self {
            Solver::Serial(s) => s.iterations,
            Solver::Parallel(p) => p.iterations(),
        }
    }

    #[inline]
    pub fn is_parallel(&self) -> bool {
        matches!(self, Solver::Parallel(_))
    }
}

/// Single-threaded solver visiting constraints in registration order.
#[derive(Clone, Debug)]
pub struct SerialSolver {
    iterations: usize,
    corrections: Vec<Vec3>,
}

impl SerialSolver {
    pub fn new(particle_count: usize, iterations: usize) -> Result<Self, ConfigError> {
        if iterations == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "iterations",
                reason: "at least one iteration is required".to_string(),
            });
        }
        Ok(Self {
            iterations,
            corrections: vec![Vec3::zero(); particle_count],
        })
    }

    #[inline]
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// The correction buffer as left by the last iteration.
    #[inline]
    pub fn corrections(&self) -> &[Vec3] {
        &self.corrections
    }

    pub fn relax(
        &mut self,
        constraints: &[Constraint],
        committed: &[Vec3],
        inverse_masses: &[f32],
        candidates: &mut [Vec3],
        displacement: &mut [Vec3],
    ) {
        let _span = tracy_span!("serial relax", "relax");

        for _ in 0..self.iterations {
            self.corrections.fill(Vec3::zero());

            for constraint in constraints {
                constraint.solve(candidates, inverse_masses, &mut self.corrections);
            }

            for (base, disp, corr, cand) in izip!(
                committed,
                displacement.iter_mut(),
                &self.corrections,
                candidates.iter_mut()
            ) {
                *disp += *corr;
                *cand = *base + *disp;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::constraint::DistanceConstraint;

    fn stretched_pair() -> (Vec<Constraint>, Vec<Vec3>, Vec<f32>) {
        let positions = vec![Vec3::zero(), Vec3::new(2.0, 0.0, 0.0)];
        let constraints = vec![DistanceConstraint::with_rest_length(0, 1, 1.0, 1.0).into()];
        (constraints, positions, vec![1.0, 1.0])
    }

    #[test]
    fn single_distance_converges() {
        let (constraints, committed, inv) = stretched_pair();
        let mut solver = SerialSolver::new(2, 5).unwrap();
        let mut candidates = committed.clone();
        let mut displacement = vec![Vec3::zero(); 2];
        solver.relax(&constraints, &committed, &inv, &mut candidates, &mut displacement);

        let dist = (candidates[1] - candidates[0]).mag();
        assert!((dist - 1.0).abs() < 0.01, "distance {dist}");
        for (c, base, d) in izip!(&candidates, &committed, &displacement) {
            assert_eq!(*c, *base + *d);
        }
    }

    #[test]
    fn stale_corrections_are_discarded() {
        let (constraints, committed, inv) = stretched_pair();

        let mut clean = SerialSolver::new(2, 3).unwrap();
        let mut clean_cand = committed.clone();
        let mut clean_disp = vec![Vec3::zero(); 2];
        clean.relax(&constraints, &committed, &inv, &mut clean_cand, &mut clean_disp);

        let mut dirty = SerialSolver::new(2, 3).unwrap();
        dirty.corrections.fill(Vec3::new(100.0, -3.0, 7.0));
        let mut dirty_cand = committed.clone();
        let mut dirty_disp = vec![Vec3::zero(); 2];
        dirty.relax(&constraints, &committed, &inv, &mut dirty_cand, &mut dirty_disp);

        assert_eq!(clean_cand, dirty_cand);
        assert_eq!(clean_disp, dirty_disp);
    }

    #[test]
    fn corrections_are_zero_before_constraints_write() {
        let committed = vec![Vec3::zero(); 3];
        let mut solver = SerialSolver::new(3, 1).unwrap();
        solver.corrections.fill(Vec3::one());
        let mut candidates = committed.clone();
        let mut displacement = vec![Vec3::zero(); 3];
        // with nothing to solve, the buffer stays exactly as reset
        solver.relax(&[], &committed, &[1.0; 3], &mut candidates, &mut displacement);
        assert!(solver.corrections().iter().all(|c| *c == Vec3::zero()));
        assert_eq!(candidates, committed);
    }

    #[test]
    fn candidates_rebuilt_from_committed_base() {
        let (constraints, _, inv) = stretched_pair();
        let committed = vec![Vec3::new(0.0, 5.0, 0.0), Vec3::new(2.0, 5.0, 0.0)];
        // predicted motion straight down, keeping the pair stretched
        let mut displacement = vec![Vec3::new(0.0, -1.0, 0.0); 2];
        let mut candidates: Vec<Vec3> = committed
            .iter()
            .zip(&displacement)
            .map(|(x, d)| *x + *d)
            .collect();

        let mut solver = SerialSolver::new(2, 1).unwrap();
        solver.relax(&constraints, &committed, &inv, &mut candidates, &mut displacement);

        // the predicted drop survives the projection
        assert!((candidates[0].y - 4.0).abs() < 1e-6);
        assert!((candidates[0].x - 0.5).abs() < 1e-6);
        assert!((candidates[1].x - 1.5).abs() < 1e-6);
    }

    #[test]
    fn zero_iterations_is_a_config_error() {
        assert!(matches!(
            SerialSolver::new(4, 0),
            Err(ConfigError::InvalidParameter {
                name: "iterations",
                ..
            })
        ));
    }
}
