/// How the total capacity is split between the admission window and
/// the main (probation + protected) region, plus the hill-climbing
/// state that adapts the split to the observed hit rate.
///
/// The climber samples the cumulative hit/miss counters every
/// `10 × capacity` requests. A falling hit rate reverses the step
/// direction; the step magnitude decays geometrically toward zero and
/// restarts at its initial size after a large swing, so the window
/// converges while staying responsive to workload shifts.
#[derive(Debug)]
pub(crate) struct CapacityPartition {
  total: usize,
  window: usize,
  probation: usize,
  protected: usize,

  // Hill-climbing state.
  sample_size: u64,
  sampled_hits: u64,
  sampled_misses: u64,
  previous_hit_rate: f64,
  step: f64,
}

/// Initial (and restart) step, as a fraction of the total capacity.
const STEP_PERCENT: f64 = 0.0625;
/// Geometric decay applied to the step after each ordinary sample.
const STEP_DECAY_RATE: f64 = 0.98;
/// A hit-rate swing at least this large restarts the step size.
const RESTART_THRESHOLD: f64 = 0.05;
/// The window may grow to at most this fraction of the total capacity.
const MAX_WINDOW_RATIO: f64 = 0.8;

impl CapacityPartition {
  /// Splits a total capacity of at least 3: the window gets what is
  /// left after reserving 80% for the main region, and the main region
  /// is itself split 80% protected / 20% probation.
  pub(crate) fn new(total: usize) -> Self {
    let window = (total - (total as f64 * 0.8) as usize).max(1);
    let main = total - window;
    let protected = (main as f64 * 0.8) as usize;

    Self {
      total,
      window,
      probation: main - protected,
      protected,
      sample_size: 10 * total as u64,
      sampled_hits: 0,
      sampled_misses: 0,
      previous_hit_rate: 0.0,
      step: STEP_PERCENT * total as f64,
    }
  }

  #[inline]
  pub(crate) fn total(&self) -> usize {
    self.total
  }

  #[inline]
  pub(crate) fn window(&self) -> usize {
    self.window
  }

  #[inline]
  pub(crate) fn probation(&self) -> usize {
    self.probation
  }

  #[inline]
  pub(crate) fn protected(&self) -> usize {
    self.protected
  }

  /// Capacity of the main region (probation + protected).
  #[inline]
  pub(crate) fn main(&self) -> usize {
    self.total - self.window
  }

  /// Feeds the cumulative hit/miss counters. Once a full sample has
  /// accumulated since the previous climb, adjusts the window capacity
  /// and returns `true` so the caller can rebalance the segments.
  pub(crate) fn climb(&mut self, total_hits: u64, total_misses: u64) -> bool {
    let hits = total_hits.saturating_sub(self.sampled_hits);
    let misses = total_misses.saturating_sub(self.sampled_misses);
    let sampled = hits + misses;
    if sampled < self.sample_size {
      return false;
    }

    let hit_rate = hits as f64 / sampled as f64;
    let change = hit_rate - self.previous_hit_rate;

    // A worse hit rate means the last move hurt; turn around.
    if change < 0.0 {
      self.step = -self.step;
    }
    if change.abs() >= RESTART_THRESHOLD {
      self.step = STEP_PERCENT * self.total as f64 * self.step.signum();
    } else {
      self.step *= STEP_DECAY_RATE;
    }

    self.sampled_hits = total_hits;
    self.sampled_misses = total_misses;
    self.previous_hit_rate = hit_rate;

    self.resize_window(self.window as f64 + self.step)
  }

  /// Applies a window target, clamped to `[1, 0.8 × total]`, and
  /// re-splits the main region 80/20. Returns whether anything moved.
  fn resize_window(&mut self, target: f64) -> bool {
    let max_window = ((self.total as f64 * MAX_WINDOW_RATIO) as usize).max(1);
    let window = (target.round() as i64).clamp(1, max_window as i64) as usize;
    if window == self.window {
      return false;
    }

    self.window = window;
    let main = self.total - window;
    self.protected = (main as f64 * 0.8) as usize;
    self.probation = main - self.protected;
    true
  }
}
