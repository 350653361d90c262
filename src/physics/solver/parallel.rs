//! Constraint relaxation on a fixed pool of persistent worker threads.
//!
//! The particles are assumed to form a square `side × side` lattice.
//! Workers are laid out on a `threads_per_axis × threads_per_axis` grid over that lattice
//! and each one owns the constraints whose primary particle falls in its block,
//! plus a contiguous range of particle indices for the update phase.
//!
//! One iteration is two phases driven in lockstep by the calling thread:
//!
//! - **solve**: every worker zeroes its private correction buffer and projects its constraints
//!   into it, reading the shared candidate positions.
//! - **update**: every worker sums all private correction buffers over its own index range
//!   and rebuilds the candidates there from the committed base.
//!
//! Constraints near a block boundary touch particles owned by other workers,
//! which is why corrections go to private buffers and are only merged in the update phase.

use super::{
    sync::{SharedBuffer, Signal},
    StepError,
};
use crate::{
    math::Vec3,
    physics::{constraint::Constraint, ConfigError},
};

use itertools::izip;
use std::{
    ops::Range,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Solve,
    Update,
    Exit,
}

/// Buffers read and written by the workers during a step.
struct SharedState {
    committed: SharedBuffer<Vec3>,
    inverse_masses: SharedBuffer<f32>,
    candidates: SharedBuffer<Vec3>,
    displacement: SharedBuffer<Vec3>,
    /// One correction buffer per worker, each covering all particles.
    scratch: Vec<SharedBuffer<Vec3>>,
}

/// Handshake between the driver and one worker.
struct WorkerControl {
    run: Signal<Command>,
    ready: Signal<()>,
    exited: AtomicBool,
}

/// The constraints and particle range owned by one worker.
#[derive(Clone, Debug, Default)]
pub struct Partition {
    pub particles: Range<usize>,
    pub constraints: Vec<Constraint>,
}

/// Split constraints and particle indices between `threads_per_axis²` workers.
///
/// Fails if `particle_count` isn't a perfect square.
pub fn partition(
    constraints: &[Constraint],
    particle_count: usize,
    threads_per_axis: usize,
) -> Result<Vec<Partition>, ConfigError> {
    if threads_per_axis == 0 {
        return Err(ConfigError::InvalidParameter {
            name: "threads_per_axis",
            reason: "must be at least 1".to_string(),
        });
    }
    let side = (particle_count as f64).sqrt().round() as usize;
    if particle_count == 0 || side * side != particle_count {
        return Err(ConfigError::NonSquareParticleCount {
            count: particle_count,
        });
    }

    let thread_count = threads_per_axis * threads_per_axis;
    let mut partitions: Vec<Partition> = (0..thread_count)
        .map(|tid| Partition {
            particles: particle_count * tid / thread_count
                ..particle_count * (tid + 1) / thread_count,
            constraints: Vec::new(),
        })
        .collect();

    for constraint in constraints {
        let id = constraint.primary_particle();
        if id >= particle_count {
            return Err(ConfigError::IndexOutOfRange {
                index: id,
                count: particle_count,
            });
        }
        let (px, py) = (id % side, id / side);
        let (tx, ty) = (threads_per_axis * px / side, threads_per_axis * py / side);
        partitions[tx * threads_per_axis + ty]
            .constraints
            .push(constraint.clone());
    }

    Ok(partitions)
}

/// Solver running on `threads_per_axis²` long-lived worker threads.
///
/// Threads are spawned on construction, parked between phases
/// and joined by [`release`][Self::release] or on drop.
pub struct ParallelSolver {
    iterations: usize,
    particle_count: usize,
    shared: Arc<SharedState>,
    alive: Arc<AtomicBool>,
    controls: Vec<Arc<WorkerControl>>,
    handles: Vec<thread::JoinHandle<()>>,
    /// Set once a worker is found to have exited; every later step fails.
    stalled: Option<usize>,
}

impl ParallelSolver {
    pub fn new(
        constraints: &[Constraint],
        particle_count: usize,
        iterations: usize,
        threads_per_axis: usize,
    ) -> Result<Self, ConfigError> {
        if iterations == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "iterations",
                reason: "at least one iteration is required".to_string(),
            });
        }
        let partitions = partition(constraints, particle_count, threads_per_axis)?;
        let thread_count = partitions.len();

        log::info!(
            "starting parallel solver: {} workers, {} particles, constraints per worker {:?}",
            thread_count,
            particle_count,
            partitions
                .iter()
                .map(|p| p.constraints.len())
                .collect::<Vec<_>>()
        );

        let shared = Arc::new(SharedState {
            committed: SharedBuffer::new(particle_count, Vec3::zero()),
            inverse_masses: SharedBuffer::new(particle_count, 0.0),
            candidates: SharedBuffer::new(particle_count, Vec3::zero()),
            displacement: SharedBuffer::new(particle_count, Vec3::zero()),
            scratch: (0..thread_count)
                .map(|_| SharedBuffer::new(particle_count, Vec3::zero()))
                .collect(),
        });

        let mut solver = Self {
            iterations,
            particle_count,
            shared,
            alive: Arc::new(AtomicBool::new(true)),
            controls: Vec::with_capacity(thread_count),
            handles: Vec::with_capacity(thread_count),
            stalled: None,
        };

        for (id, part) in partitions.into_iter().enumerate() {
            let control = Arc::new(WorkerControl {
                run: Signal::new(),
                ready: Signal::new(),
                exited: AtomicBool::new(false),
            });
            let worker = Worker {
                id,
                partition: part,
                shared: Arc::clone(&solver.shared),
                alive: Arc::clone(&solver.alive),
                control: Arc::clone(&control),
            };
            // on failure `solver` is dropped here, which releases the already running workers
            let handle = thread::Builder::new()
                .name(format!("pbd-worker-{id}"))
                .spawn(move || worker.run())
                .map_err(ConfigError::ThreadSpawn)?;
            solver.controls.push(control);
            solver.handles.push(handle);
        }

        Ok(solver)
    }

    #[inline]
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    #[inline]
    pub fn worker_count(&self) -> usize {
        self.controls.len()
    }

    /// Whether a worker has exited and the solver can no longer step.
    #[inline]
    pub fn is_stalled(&self) -> bool {
        self.stalled.is_some()
    }

    pub fn relax(
        &mut self,
        committed: &[Vec3],
        inverse_masses: &[f32],
        candidates: &mut [Vec3],
        displacement: &mut [Vec3],
    ) -> Result<(), StepError> {
        let _span = tracy_span!("parallel relax", "relax");

        if let Some(worker) = self.stalled {
            return Err(StepError::WorkerExited { worker });
        }
        debug_assert_eq!(committed.len(), self.particle_count);

        let n = self.particle_count;
        // SAFETY: every worker is parked waiting for a run signal between steps,
        // so the driver is the only thread touching the buffers here
        unsafe {
            self.shared.committed.slice_mut(0..n).copy_from_slice(committed);
            self.shared
                .inverse_masses
                .slice_mut(0..n)
                .copy_from_slice(inverse_masses);
            self.shared.candidates.slice_mut(0..n).copy_from_slice(candidates);
            self.shared
                .displacement
                .slice_mut(0..n)
                .copy_from_slice(displacement);
        }

        for _ in 0..self.iterations {
            self.run_phase(Command::Solve)?;
            self.run_phase(Command::Update)?;
        }

        // SAFETY: all workers have signaled ready for the last phase and are parked again
        unsafe {
            candidates.copy_from_slice(self.shared.candidates.slice_all());
            displacement.copy_from_slice(self.shared.displacement.slice_all());
        }
        Ok(())
    }

    /// Start one phase on every worker and wait until all of them have finished it.
    fn run_phase(&mut self, command: Command) -> Result<(), StepError> {
        for control in &self.controls {
            control.run.post(command);
        }
        // wait on everyone before checking for exits,
        // so no worker is still inside the phase when we bail out
        for control in &self.controls {
            control.ready.wait_take();
        }
        if let Some(worker) = self
            .controls
            .iter()
            .position(|c| c.exited.load(Ordering::Acquire))
        {
            log::error!("solver worker {worker} has exited, parallel solver stalled");
            self.stalled = Some(worker);
            return Err(StepError::WorkerExited { worker });
        }
        Ok(())
    }

    /// Stop and join all workers. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.alive.store(false, Ordering::Release);
        for control in &self.controls {
            control.run.post(Command::Exit);
        }
        // unblock anyone still waiting on a worker that won't answer
        for control in &self.controls {
            control.ready.post(());
        }
        for (id, handle) in self.handles.drain(..).enumerate() {
            if handle.join().is_err() {
                log::warn!("solver worker {id} panicked");
            }
        }
        log::debug!("parallel solver released");
    }

    #[cfg(test)]
    fn kill_worker(&mut self, id: usize) {
        self.controls[id].run.post(Command::Exit);
        // the exit guard's ready signal is left for the next phase to pick up
        while !self.controls[id].exited.load(Ordering::Acquire) {
            thread::yield_now();
        }
    }
}

impl Drop for ParallelSolver {
    fn drop(&mut self) {
        self.release();
    }
}

struct Worker {
    id: usize,
    partition: Partition,
    shared: Arc<SharedState>,
    alive: Arc<AtomicBool>,
    control: Arc<WorkerControl>,
}

/// Marks the worker exited and posts one last ready signal however the loop ends,
/// including by panic, so the driver never waits forever.
struct ExitGuard<'a>(&'a WorkerControl);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.exited.store(true, Ordering::Release);
        self.0.ready.post(());
    }
}

impl Worker {
    fn run(self) {
        log::debug!(
            "solver worker {} started with {} constraints",
            self.id,
            self.partition.constraints.len()
        );
        let _guard = ExitGuard(&self.control);

        loop {
            let command = self.control.run.wait_take();
            if !self.alive.load(Ordering::Acquire) {
                break;
            }
            match command {
                Command::Solve => self.solve(),
                Command::Update => self.update(),
                Command::Exit => break,
            }
            self.control.ready.post(());
        }

        log::debug!("solver worker {} exiting", self.id);
    }

    fn solve(&self) {
        let _span = tracy_span!("worker solve", "solve");
        let shared = &*self.shared;
        let n = shared.candidates.len();
        // SAFETY: during the solve phase candidates and inverse masses are only read,
        // and each scratch buffer is written only by its own worker
        let (candidates, inverse_masses, corrections) = unsafe {
            (
                shared.candidates.slice_all(),
                shared.inverse_masses.slice_all(),
                shared.scratch[self.id].slice_mut(0..n),
            )
        };

        corrections.fill(Vec3::zero());
        for constraint in &self.partition.constraints {
            constraint.solve(candidates, inverse_masses, corrections);
        }
    }

    fn update(&self) {
        let _span = tracy_span!("worker update", "update");
        let shared = &*self.shared;
        let range = self.partition.particles.clone();
        // SAFETY: during the update phase scratch and committed buffers are only read,
        // and particle ranges are disjoint between workers
        unsafe {
            let displacement = shared.displacement.slice_mut(range.clone());
            for scratch in &shared.scratch {
                for (disp, corr) in displacement.iter_mut().zip(scratch.slice(range.clone())) {
                    *disp += *corr;
                }
            }
            for (cand, base, disp) in izip!(
                shared.candidates.slice_mut(range.clone()),
                shared.committed.slice(range),
                &*displacement
            ) {
                *cand = *base + *disp;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{constraint::DistanceConstraint, solver::SerialSolver};
    use std::{sync::mpsc, time::Duration};

    /// A `side × side` grid of particles `spacing` apart, with structural distance constraints
    /// of rest length 1.
    fn grid(side: usize, spacing: f32) -> (Vec<Vec3>, Vec<Constraint>) {
        let positions: Vec<Vec3> = (0..side * side)
            .map(|i| Vec3::new((i % side) as f32 * spacing, 0.0, (i / side) as f32 * spacing))
            .collect();
        let mut constraints = Vec::new();
        for y in 0..side {
            for x in 0..side {
                let i = y * side + x;
                if x + 1 < side {
                    constraints.push(DistanceConstraint::with_rest_length(i, i + 1, 1.0, 1.0).into());
                }
                if y + 1 < side {
                    constraints
                        .push(DistanceConstraint::with_rest_length(i, i + side, 1.0, 1.0).into());
                }
            }
        }
        (positions, constraints)
    }

    #[test]
    fn non_square_count_is_rejected() {
        let res = ParallelSolver::new(&[], 10, 5, 2);
        assert!(matches!(
            res,
            Err(ConfigError::NonSquareParticleCount { count: 10 })
        ));
    }

    #[test]
    fn partitions_cover_all_particles_and_constraints() {
        let (_, constraints) = grid(6, 1.0);
        let parts = partition(&constraints, 36, 3).unwrap();
        assert_eq!(parts.len(), 9);
        assert_eq!(parts[0].particles.start, 0);
        assert_eq!(parts[8].particles.end, 36);
        for pair in parts.windows(2) {
            assert_eq!(pair[0].particles.end, pair[1].particles.start);
        }
        let total: usize = parts.iter().map(|p| p.constraints.len()).sum();
        assert_eq!(total, constraints.len());

        // particle 0 is in the first block, particle 35 in the last
        assert!(parts[0].constraints.iter().any(|c| c.primary_particle() == 0));
        assert!(parts[8]
            .constraints
            .iter()
            .all(|c| c.primary_particle() % 6 >= 4 && c.primary_particle() / 6 >= 4));
    }

    #[test]
    fn matches_serial_solver() {
        // stretched so every constraint does some work
        let (committed, constraints) = grid(9, 1.5);
        let n = committed.len();
        let mut inverse_masses = vec![1.0; n];
        inverse_masses[0] = 0.0;
        let displacement: Vec<Vec3> = (0..n)
            .map(|i| Vec3::new(0.0, -0.01 * (i % 7) as f32, 0.0))
            .collect();
        let candidates: Vec<Vec3> = committed
            .iter()
            .zip(&displacement)
            .map(|(x, d)| *x + *d)
            .collect();

        let mut serial = SerialSolver::new(n, 5).unwrap();
        let mut s_cand = candidates.clone();
        let mut s_disp = displacement.clone();
        serial.relax(&constraints, &committed, &inverse_masses, &mut s_cand, &mut s_disp);

        let mut parallel = ParallelSolver::new(&constraints, n, 5, 3).unwrap();
        let mut p_cand = candidates;
        let mut p_disp = displacement;
        parallel
            .relax(&committed, &inverse_masses, &mut p_cand, &mut p_disp)
            .unwrap();

        for (s, p) in s_cand.iter().zip(&p_cand) {
            let scale = s.mag().max(1.0);
            assert!((*s - *p).mag() / scale < 1e-5, "serial {s:?} parallel {p:?}");
        }
        assert_eq!(p_cand[0], committed[0]);
    }

    #[test]
    fn release_does_not_hang() {
        let (_, constraints) = grid(4, 1.0);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut solver = ParallelSolver::new(&constraints, 16, 3, 2).unwrap();
            // workers are now blocked waiting for a run signal
            thread::sleep(Duration::from_millis(20));
            solver.release();
            solver.release();
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(5))
            .expect("releasing the solver deadlocked");
    }

    #[test]
    fn exited_worker_stalls_the_solver() {
        let (committed, constraints) = grid(4, 1.0);
        let mut solver = ParallelSolver::new(&constraints, 16, 2, 2).unwrap();
        solver.kill_worker(1);

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let inv = vec![1.0; 16];
            let mut cand = committed.clone();
            let mut disp = vec![Vec3::zero(); 16];
            let first = solver.relax(&committed, &inv, &mut cand, &mut disp);
            let second = solver.relax(&committed, &inv, &mut cand, &mut disp);
            tx.send((first, second, solver.is_stalled())).unwrap();
        });
        let (first, second, stalled) = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("driver blocked on an exited worker");
        assert!(matches!(first, Err(StepError::WorkerExited { worker: 1 })));
        assert!(matches!(second, Err(StepError::WorkerExited { worker: 1 })));
        assert!(stalled);
    }
}
