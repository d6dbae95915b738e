//! The derivative-free optimiser used by local calibration.
//!
//! The search itself is delegated to [`argmin`]'s Nelder-Mead solver. This module adapts the
//! calibration objective to it and keeps candidate parameters within their bounds.
use crate::arguments::CalibrationOptions;
use crate::error::configuration_error;
use anyhow::{Result, ensure};
use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{CostFunction, Executor, KV, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;
use log::{debug, info};
use std::cell::RefCell;
use std::ops::RangeInclusive;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The only supported optimisation method
pub const NELDER_MEAD: &str = "Nelder-Mead";

/// Iteration limit when none is configured
pub const DEFAULT_MAX_ITERATIONS: u64 = 1000;

/// Convergence tolerance on the objective when none is configured
pub const DEFAULT_FATOL: f64 = 1e-4;

/// Relative perturbation used to build the initial simplex
const SIMPLEX_PERTURBATION: f64 = 0.05;

/// Perturbation used for parameters whose initial value is zero
const SIMPLEX_ZERO_PERTURBATION: f64 = 0.00025;

/// A function of the parameters to be minimised
pub trait Objective {
    /// Evaluate the function at `parameters` during the given (1-based) iteration
    fn evaluate(&mut self, iteration: u64, parameters: &[f64]) -> Result<f64>;
}

/// The result of an optimisation
#[derive(Debug, Clone, PartialEq)]
pub struct OptimiserOutcome {
    /// The best parameters found
    pub parameters: Vec<f64>,
    /// The objective at the best parameters
    pub error: f64,
    /// Whether the optimiser met its convergence criterion
    pub converged: bool,
    /// Why the optimiser stopped
    pub message: String,
}

/// Something which minimises an [`Objective`]
pub trait Optimiser {
    /// Minimise `objective`, starting from `initial` and staying within `bounds`
    fn minimise(
        &self,
        objective: &mut dyn Objective,
        initial: &[f64],
        bounds: &[RangeInclusive<f64>],
    ) -> Result<OptimiserOutcome>;
}

/// Clip each parameter into its bounds
pub fn clip_to_bounds(parameters: &[f64], bounds: &[RangeInclusive<f64>]) -> Vec<f64> {
    parameters
        .iter()
        .zip(bounds)
        .map(|(value, bound)| value.clamp(*bound.start(), *bound.end()))
        .collect()
}

/// The starting simplex: `initial` and one vertex per parameter, perturbed in that parameter
pub fn initial_simplex(initial: &[f64]) -> Vec<Vec<f64>> {
    let mut simplex = vec![initial.to_vec()];
    for k in 0..initial.len() {
        let mut vertex = initial.to_vec();
        vertex[k] = if vertex[k] == 0.0 {
            SIMPLEX_ZERO_PERTURBATION
        } else {
            vertex[k] * (1.0 + SIMPLEX_PERTURBATION)
        };
        simplex.push(vertex);
    }

    simplex
}

/// The first error returned by the objective, shared between the problem and its observer
type Failure = Rc<RefCell<Option<anyhow::Error>>>;

/// The objective as seen by the solver.
///
/// The solver unwraps costs while it builds its first simplex, so a failed evaluation is stored
/// and reported as an infinite cost. Later evaluations are skipped and [`Progress`] stops the run.
struct BoundedProblem<'a> {
    objective: RefCell<&'a mut dyn Objective>,
    bounds: &'a [RangeInclusive<f64>],
    iteration: Arc<AtomicU64>,
    failure: Failure,
}

impl CostFunction for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, parameters: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        if self.failure.borrow().is_some() {
            return Ok(f64::INFINITY);
        }

        let parameters = clip_to_bounds(parameters, self.bounds);
        let iteration = self.iteration.load(Ordering::Relaxed) + 1;
        let result = self
            .objective
            .borrow_mut()
            .evaluate(iteration, &parameters);
        match result {
            Ok(cost) => Ok(cost),
            Err(err) => {
                *self.failure.borrow_mut() = Some(err);
                Ok(f64::INFINITY)
            }
        }
    }
}

/// Tracks completed iterations and stops the solver once an evaluation has failed
struct Progress {
    iteration: Arc<AtomicU64>,
    failure: Failure,
    /// Report every iteration at info level rather than debug
    display: bool,
}

impl Progress {
    fn check_failure(&self) -> Result<(), argmin::core::Error> {
        ensure!(
            self.failure.borrow().is_none(),
            "Stopping after a failed evaluation"
        );
        Ok(())
    }
}

impl<I: State> Observe<I> for Progress {
    fn observe_init(
        &mut self,
        _name: &str,
        _state: &I,
        _kv: &KV,
    ) -> Result<(), argmin::core::Error> {
        self.check_failure()
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), argmin::core::Error> {
        self.check_failure()?;
        self.iteration.store(state.get_iter(), Ordering::Relaxed);
        if self.display {
            info!("Iteration {} complete", state.get_iter());
        } else {
            debug!("Iteration {} complete", state.get_iter());
        }
        Ok(())
    }
}

/// Nelder-Mead simplex search
#[derive(Debug, Clone, PartialEq)]
pub struct NelderMeadOptimiser {
    /// Most iterations to run
    pub max_iterations: u64,
    /// Stop when the spread of the objective over the simplex falls below this
    pub fatol: f64,
    /// Log every completed iteration at info level
    pub display: bool,
}

impl Default for NelderMeadOptimiser {
    fn default() -> Self {
        NelderMeadOptimiser {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            fatol: DEFAULT_FATOL,
            display: false,
        }
    }
}

impl NelderMeadOptimiser {
    /// Configure the optimiser from the calibration options
    pub fn from_options(options: &CalibrationOptions) -> Result<NelderMeadOptimiser> {
        if let Some(method) = &options.method {
            ensure!(
                method == NELDER_MEAD,
                configuration_error!(
                    "Optimisation method {method} is not supported. Use {NELDER_MEAD}."
                )
            );
        }
        ensure!(
            options.fatol > 0.0,
            configuration_error!("fatol must be positive")
        );

        Ok(NelderMeadOptimiser {
            max_iterations: options.max_iterations,
            fatol: options.fatol,
            display: options.disp,
        })
    }
}

impl Optimiser for NelderMeadOptimiser {
    fn minimise(
        &self,
        objective: &mut dyn Objective,
        initial: &[f64],
        bounds: &[RangeInclusive<f64>],
    ) -> Result<OptimiserOutcome> {
        let initial = clip_to_bounds(initial, bounds);
        let iteration = Arc::new(AtomicU64::new(0));
        let failure = Failure::default();
        let problem = BoundedProblem {
            objective: RefCell::new(objective),
            bounds,
            iteration: Arc::clone(&iteration),
            failure: Rc::clone(&failure),
        };
        let progress = Progress {
            iteration,
            failure: Rc::clone(&failure),
            display: self.display,
        };
        let solver = NelderMead::new(initial_simplex(&initial)).with_sd_tolerance(self.fatol)?;

        let result = Executor::new(problem, solver)
            .configure(|state| state.max_iters(self.max_iterations))
            .add_observer(progress, ObserverMode::Always)
            .run();
        if let Some(err) = failure.borrow_mut().take() {
            return Err(err);
        }
        let result = result?;

        let state = result.state();
        let parameters = state
            .get_best_param()
            .map_or(initial.clone(), |best| clip_to_bounds(best, bounds));
        let reason = state.get_termination_reason();

        Ok(OptimiserOutcome {
            parameters,
            error: state.get_best_cost(),
            converged: matches!(reason, Some(TerminationReason::SolverConverged)),
            message: reason.map_or_else(|| "Not terminated".into(), ToString::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CalibrationError, classify};
    use crate::arguments::CalibrationSpec;
    use crate::fixture::calibration_spec;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    /// A quadratic bowl with its minimum at (1, -2), recording every evaluation
    #[derive(Default)]
    struct Bowl {
        evaluations: Vec<(u64, Vec<f64>)>,
    }

    impl Objective for Bowl {
        fn evaluate(&mut self, iteration: u64, parameters: &[f64]) -> Result<f64> {
            self.evaluations.push((iteration, parameters.to_vec()));
            Ok((parameters[0] - 1.0).powi(2) + (parameters[1] + 2.0).powi(2))
        }
    }

    #[test]
    fn test_initial_simplex() {
        assert_eq!(
            initial_simplex(&[2.0, 0.0]),
            [vec![2.0, 0.0], vec![2.1, 0.0], vec![2.0, 0.00025]]
        );
    }

    #[test]
    fn test_clip_to_bounds() {
        assert_eq!(
            clip_to_bounds(&[-1.0, 0.5, 3.0], &[0.0..=1.0, 0.0..=1.0, 0.0..=1.0]),
            [0.0, 0.5, 1.0]
        );
    }

    /// Fails on the given (1-based) evaluation
    struct FailsOn {
        evaluation: usize,
        calls: usize,
    }

    impl Objective for FailsOn {
        fn evaluate(&mut self, _iteration: u64, parameters: &[f64]) -> Result<f64> {
            self.calls += 1;
            ensure!(self.calls != self.evaluation, "Simulation {} failed", self.calls);
            Ok(parameters.iter().map(|p| p * p).sum())
        }
    }

    #[rstest]
    #[case::first_vertex(1)]
    #[case::initial_simplex(2)]
    #[case::during_search(5)]
    fn test_minimise_objective_fails(#[case] evaluation: usize) {
        let mut objective = FailsOn {
            evaluation,
            calls: 0,
        };
        let err = NelderMeadOptimiser::default()
            .minimise(&mut objective, &[0.5, -1.0], &[-5.0..=5.0, -5.0..=5.0])
            .unwrap_err();
        assert_eq!(err.to_string(), format!("Simulation {evaluation} failed"));

        // Nothing is evaluated after the failure
        assert_eq!(objective.calls, evaluation);
    }

    #[test]
    fn test_minimise() {
        let optimiser = NelderMeadOptimiser {
            max_iterations: 1000,
            fatol: 1e-10,
            display: true,
        };
        let mut bowl = Bowl::default();
        let outcome = optimiser
            .minimise(&mut bowl, &[0.5, -1.0], &[-5.0..=5.0, -5.0..=5.0])
            .unwrap();

        assert!(outcome.converged, "{}", outcome.message);
        assert_approx_eq!(f64, outcome.parameters[0], 1.0, epsilon = 1e-3);
        assert_approx_eq!(f64, outcome.parameters[1], -2.0, epsilon = 1e-3);
        assert!(outcome.error < 1e-6);

        // Iteration numbers start at one and never decrease
        assert_eq!(bowl.evaluations[0].0, 1);
        assert!(bowl.evaluations.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_minimise_respects_bounds() {
        let optimiser = NelderMeadOptimiser {
            max_iterations: 1000,
            fatol: 1e-10,
            display: false,
        };
        let mut bowl = Bowl::default();
        let outcome = optimiser
            .minimise(&mut bowl, &[0.5, 0.5], &[0.0..=2.0, 0.0..=2.0])
            .unwrap();

        assert!(bowl.evaluations.iter().all(|(_, p)| p[1] >= 0.0));
        assert!(outcome.parameters[1] >= 0.0);
    }

    #[test]
    fn test_minimise_not_converged() {
        let optimiser = NelderMeadOptimiser {
            max_iterations: 2,
            fatol: 1e-12,
            display: false,
        };
        let outcome = optimiser
            .minimise(&mut Bowl::default(), &[0.5, -1.0], &[-5.0..=5.0, -5.0..=5.0])
            .unwrap();
        assert!(!outcome.converged);
    }

    #[rstest]
    fn test_from_options(mut calibration_spec: CalibrationSpec) {
        let optimiser = NelderMeadOptimiser::from_options(&calibration_spec.calibration_options)
            .unwrap();
        assert_eq!(optimiser.max_iterations, 1000);
        assert!(!optimiser.display);

        calibration_spec.calibration_options.method = Some("BFGS".into());
        let err =
            NelderMeadOptimiser::from_options(&calibration_spec.calibration_options).unwrap_err();
        assert!(matches!(
            classify(&err),
            Some(CalibrationError::Configuration(_))
        ));
    }
}
