//! Core positioning algorithms

pub mod trilateration;

pub use trilateration::{
    RangeObservation, SolverConfig, Trilateration, TrilaterationError, TrilaterationSolution,
};
