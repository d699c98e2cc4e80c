use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::synthesis::heuristic::{Category, Heuristic, Objective, Score};
use crate::synthesis::plan::ExecutionPlan;

/// Explores in an order fixed by the seed.
#[derive(Debug)]
pub struct Random {
    rng: StdRng,
}

impl Random {
    pub fn new(seed: i64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed as u64),
        }
    }
}

impl Heuristic for Random {
    fn name(&self) -> &'static str {
        "random"
    }

    fn objectives(&self) -> &[(Category, Objective)] {
        &[]
    }

    fn score(&mut self, _: &ExecutionPlan) -> Score {
        Score(vec![self.rng.gen_range(0..i64::from(u32::MAX))])
    }
}

#[cfg(test)]
mod tests {
    use crate::bdd::ReturnOp;
    use crate::bdd::builder::tests::now;
    use crate::bdd::tests::chain;
    use crate::synthesis::heuristic::Heuristic;
    use crate::synthesis::heuristic::random::Random;
    use crate::synthesis::plan::ExecutionPlan;
    use crate::synthesis::target::TargetType;

    #[test]
    fn test_same_seed_same_order() {
        let plan = ExecutionPlan::new(chain(vec![now()], ReturnOp::Fwd, 1), TargetType::X86);
        let (mut a, mut b) = (Random::new(7), Random::new(7));
        let xs: Vec<_> = (0..5).map(|_| a.score(&plan)).collect();
        let ys: Vec<_> = (0..5).map(|_| b.score(&plan)).collect();
        assert_eq!(xs, ys);
    }
}
