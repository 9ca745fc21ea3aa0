//! `first_mb_in_slice` continuity across consecutive slices.
//!
//! Inside a picture slices start at strictly increasing macroblocks. A new
//! picture restarts at 0, or at the first macroblock the current run
//! started from when a stream always begins pictures mid-frame. Runs of
//! single-slice pictures repeat 0. Any other step is a likely false hit.

/// Rolling window of recent `first_mb_in_slice` values.
#[derive(Debug, Clone)]
pub struct FirstMbHistory {
    values: Vec<u32>,
    capacity: usize,
    /// Where the current increasing run started.
    run_start: Option<u32>,
}

impl FirstMbHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            run_start: None,
        }
    }

    pub fn values(&self) -> &[u32] {
        &self.values
    }

    pub fn last(&self) -> Option<u32> {
        self.values.last().copied()
    }

    /// Record the next value; returns whether the step to it is plausible.
    pub fn push(&mut self, first_mb: u32) -> bool {
        let plausible = match self.last() {
            None => true,
            Some(prev) => is_plausible_step(prev, first_mb, self.run_start),
        };
        let restarts = match self.last() {
            None => true,
            Some(prev) => first_mb <= prev,
        };
        if restarts {
            self.run_start = Some(first_mb);
        }
        if self.values.len() == self.capacity {
            self.values.remove(0);
        }
        self.values.push(first_mb);
        plausible
    }
}

/// One step between consecutive slices.
pub fn is_plausible_step(prev: u32, next: u32, run_start: Option<u32>) -> bool {
    next > prev || next == 0 || (next < prev && Some(next) == run_start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_plausible_run(values: &[u32]) -> bool {
        let mut history = FirstMbHistory::new(values.len());
        values.iter().all(|&v| history.push(v))
    }

    #[test]
    fn increasing_run_is_plausible() {
        assert!(is_plausible_run(&[0, 10, 20, 30]));
    }

    #[test]
    fn wrap_to_zero_is_plausible() {
        assert!(is_plausible_run(&[0, 50, 0, 50, 0]));
    }

    #[test]
    fn single_slice_pictures_repeat_zero() {
        assert!(is_plausible_run(&[0, 0, 0, 0]));
    }

    #[test]
    fn wrap_to_run_start_is_plausible() {
        assert!(is_plausible_run(&[5, 40, 80, 5, 40]));
    }

    #[test]
    fn repeated_nonzero_is_a_false_hit() {
        assert!(!is_plausible_run(&[5, 5]));
    }

    #[test]
    fn step_backwards_is_a_false_hit() {
        assert!(!is_plausible_run(&[0, 40, 20]));
    }

    #[test]
    fn window_is_bounded() {
        let mut h = FirstMbHistory::new(3);
        for v in [0, 1, 2, 3, 4] {
            assert!(h.push(v));
        }
        assert_eq!(h.values(), &[2, 3, 4]);
    }
}
