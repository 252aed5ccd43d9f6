pub mod extract;
pub mod fingerprint;
pub mod model;
pub mod normalize;
pub mod problem;
pub mod result;
pub mod solver;
pub mod solver_factory;
pub mod solvers;
