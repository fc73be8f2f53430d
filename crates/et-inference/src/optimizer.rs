//! Generic numerical optimization via argmin's L-BFGS with More-Thuente
//! line search, wrapped behind a small objective trait.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use et_core::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Configuration for the L-BFGS optimizer.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of iterations.
    pub max_iter: u64,
    /// Convergence tolerance for the gradient norm.
    pub tol: f64,
    /// Number of corrections to the inverse-Hessian approximation.
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 500, tol: 1e-6, m: 10 }
    }
}

/// Result of an optimization run.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best parameters found.
    pub parameters: Vec<f64>,
    /// Objective value at the minimum.
    pub fval: f64,
    /// Iterations used.
    pub n_iter: u64,
    /// Objective evaluations.
    pub n_fev: usize,
    /// Gradient evaluations.
    pub n_gev: usize,
    /// Whether the solver reported convergence.
    pub converged: bool,
}

/// Objective function to minimize.
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate the objective at `params`.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at `params`; central finite differences by default.
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut grad = vec![0.0; n];
        let mut work = params.to_vec();
        for i in 0..n {
            let eps = 1e-7 * params[i].abs().max(1.0);
            work[i] = params[i] + eps;
            let f_plus = self.eval(&work)?;
            work[i] = params[i] - eps;
            let f_minus = self.eval(&work)?;
            work[i] = params[i];
            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }
        Ok(grad)
    }
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    counts: Arc<FuncCounts>,
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        self.objective.eval(params).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        self.objective.gradient(params).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

/// L-BFGS minimizer.
pub struct LbfgsOptimizer {
    config: OptimizerConfig,
}

impl LbfgsOptimizer {
    /// Create with the given configuration.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize `objective` starting from `init_params`.
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
    ) -> Result<OptimizationResult> {
        let counts = Arc::new(FuncCounts::default());
        let problem = ArgminProblem { objective, counts: counts.clone() };

        let linesearch = MoreThuenteLineSearch::new();
        let solver = LBFGS::new(linesearch, self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Config(format!("invalid optimizer tolerance: {}", e)))?
            .with_tolerance_cost((0.1 * self.config.tol).max(1e-12))
            .map_err(|e| Error::Config(format!("invalid optimizer cost tolerance: {}", e)))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init_params.to_vec()).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("optimization failed: {}", e)))?;

        let state = res.state();
        let parameters = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("optimizer returned no parameters".to_string()))?
            .clone();
        let converged = matches!(
            state.get_termination_status(),
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );

        Ok(OptimizationResult {
            parameters,
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: counts.grad.load(Ordering::Relaxed),
            converged,
        })
    }
}

impl Default for LbfgsOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}
