/// Open a tracy profiling zone that lasts until the returned value is dropped.
/// Does nothing unless the `tracy` feature is enabled and a client is running.
macro_rules! tracy_span {
    ($name:expr, $fn_name:expr) => {
        tracy_client::Client::running()
            .map(|client| client.span_alloc(Some($name), $fn_name, file!(), line!(), 0))
    };
}

pub mod math;
pub use math::{uv, Vec3};

pub mod physics;
pub use physics::{
    collision::{self, Aabb, Bvh, CollisionPolicy, LeafGrid},
    constraint::{self, Constraint, MaterialParams, VolumeMaterialParams},
    lattice::{BlockParams, Lattice},
    ConfigError, Integrator, ParticleStore, Simulation, SimulationParams, StepError, StepPhase,
};
