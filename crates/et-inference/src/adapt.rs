//! Warmup adaptation: proposal-scale dual averaging and per-coordinate
//! proposal variance (Welford), on a Stan-style windowed schedule.

/// Dual averaging (Nesterov 2009, Stan variant).
///
/// Adapts a log-scale quantity — here the global proposal scale — toward a
/// target average acceptance probability.
pub struct DualAveraging {
    target_accept: f64,
    log_eps: f64,
    log_eps_bar: f64,
    h_bar: f64,
    mu: f64,
    gamma: f64,
    t0: f64,
    kappa: f64,
    step: usize,
}

impl DualAveraging {
    /// Create with target acceptance rate and initial scale.
    pub fn new(target_accept: f64, init_eps: f64) -> Self {
        // Start the smoothed scale at the initial scale; starting from 1.0
        // distorts short warmup runs.
        let log_eps0 = init_eps.ln();
        Self {
            target_accept,
            log_eps: log_eps0,
            log_eps_bar: log_eps0,
            h_bar: 0.0,
            mu: (10.0 * init_eps).ln(),
            gamma: 0.05,
            t0: 10.0,
            kappa: 0.75,
            step: 0,
        }
    }

    /// Update with the observed acceptance probability of one transition.
    pub fn update(&mut self, accept_prob: f64) {
        self.step += 1;
        let m = self.step as f64;
        let w = 1.0 / (m + self.t0);
        self.h_bar = (1.0 - w) * self.h_bar + w * (self.target_accept - accept_prob);

        self.log_eps = self.mu - (m.sqrt() / self.gamma) * self.h_bar;
        let m_kappa = m.powf(-self.kappa);
        self.log_eps_bar = m_kappa * self.log_eps + (1.0 - m_kappa) * self.log_eps_bar;
    }

    /// Current scale (during warmup).
    pub fn current(&self) -> f64 {
        self.log_eps.exp()
    }

    /// Final adapted scale (smoothed).
    pub fn adapted(&self) -> f64 {
        self.log_eps_bar.exp()
    }

    /// Reset for a new adaptation window, keeping the given scale.
    pub fn reset(&mut self, init_eps: f64) {
        self.log_eps = init_eps.ln();
        self.log_eps_bar = init_eps.ln();
        self.h_bar = 0.0;
        self.mu = (10.0 * init_eps).ln();
        self.step = 0;
    }
}

/// Online Welford variance estimator (per-coordinate proposal variance).
pub struct WelfordVariance {
    mean: Vec<f64>,
    m2: Vec<f64>,
    count: usize,
}

impl WelfordVariance {
    /// Create for a `dim`-dimensional parameter vector.
    pub fn new(dim: usize) -> Self {
        Self { mean: vec![0.0; dim], m2: vec![0.0; dim], count: 0 }
    }

    /// Incorporate a new sample.
    pub fn update(&mut self, x: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        for i in 0..x.len() {
            let delta = x[i] - self.mean[i];
            self.mean[i] += delta / n;
            let delta2 = x[i] - self.mean[i];
            self.m2[i] += delta * delta2;
        }
    }

    /// Number of samples seen.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Current variance estimate; `1.0` per dimension if `count < 2`.
    pub fn variance(&self) -> Vec<f64> {
        if self.count < 2 {
            return vec![1.0; self.mean.len()];
        }
        let n = self.count as f64;
        self.m2.iter().map(|&m| (m / (n - 1.0)).max(1e-10)).collect()
    }

    /// Reset the estimator.
    pub fn reset(&mut self) {
        self.mean.fill(0.0);
        self.m2.fill(0.0);
        self.count = 0;
    }
}

/// Stan-style adaptation windows: a fast initial buffer, doubling slow
/// windows (variance collection), and a terminal buffer (scale only).
pub fn compute_windows(n_warmup: usize) -> Vec<(usize, usize)> {
    // Very short warmups adapt scale only; windowed variance estimation is
    // too unstable there.
    if n_warmup < 50 {
        return vec![(0, n_warmup)];
    }

    let init_buffer = 75.min(n_warmup / 5);
    let term_buffer = 50.min(n_warmup / 5);
    let slow_size = n_warmup.saturating_sub(init_buffer + term_buffer);

    let mut windows = Vec::new();
    windows.push((0, init_buffer));

    if slow_size > 0 {
        let mut start = init_buffer;
        let mut size = slow_size.min(25).max(1);
        while start + size < init_buffer + slow_size {
            let end = (start + size).min(init_buffer + slow_size);
            windows.push((start, end));
            start = end;
            size *= 2;
        }
        if start < init_buffer + slow_size {
            windows.push((start, init_buffer + slow_size));
        }
    }

    if term_buffer > 0 {
        windows.push((init_buffer + slow_size, n_warmup));
    }

    windows
}
