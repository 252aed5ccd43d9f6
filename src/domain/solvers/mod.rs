pub mod lp_leaf;
pub mod search;

pub use search::SearchSolver;
