pub mod helpers;
pub mod utils;

pub use helpers::deconv::{
    alternating_descent, alternating_descent_with_observer, calc_errors, DeconvError,
    DescentObserver, DescentParams, DescentResults, ErrorBreakdown, LogObserver, NoopObserver,
    ERROR_STATISTICS_COLS,
};
pub use helpers::hinge::{
    hinge_grad_basis, hinge_grad_proportions, hinge_penalty, DEFAULT_HINGE_PRECISION,
};
pub use helpers::linalg::{
    checked_inverse, correct_by_norm, count_negative, jump_norm, LinalgError, NORM_FLOOR,
};
pub use helpers::synthetic_data::{create_random_problem, SyntheticProblem};
