//! Weighted water-filling over pools or jobs.
//!
//! Every user (pool or job) carries a [`FairShareContext`]. The fair share of a
//! user for a ratio `r` is `min(demand, max(weight * r, minshare))`; the
//! engine looks for the smallest `r` that either satisfies every demand or
//! hands out all slots.

use std::{
    borrow::{Borrow, BorrowMut},
    cmp::Ordering,
};

use serde::Serialize;

/// Weights are never allowed below this value.
pub const MIN_WEIGHT: f64 = 0.5;

/// Fixed number of bisection rounds, results are reproducible for equal inputs.
pub const BISECTION_ROUNDS: usize = 25;

#[derive(Debug, Clone, Serialize)]
pub struct FairShareContext {
    pub weight: f64,
    /// Slot count, possibly fractional after scaling.
    pub minshare: f64,
    /// Outstanding slot requests, never below `alloc`.
    pub demand: u32,
    pub fairshare: f64,
    pub alloc: u32,
    /// Stable sort key.
    pub uid: u64,
}

impl Default for FairShareContext {
    fn default() -> Self {
        FairShareContext::new(1., 0., 0, 0)
    }
}

impl FairShareContext {
    pub fn new(weight: f64, minshare: f64, demand: u32, uid: u64) -> Self {
        FairShareContext {
            weight: weight.max(MIN_WEIGHT),
            minshare: minshare.max(0.),
            demand,
            fairshare: 0.,
            alloc: 0,
            uid,
        }
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight.max(MIN_WEIGHT);
    }

    /// Slots requested but not granted yet.
    pub fn pending(&self) -> u32 {
        self.demand.saturating_sub(self.alloc)
    }

    pub fn used_share(&self) -> f64 {
        self.alloc as f64 / self.weight
    }

    pub(crate) fn add_demand(&mut self, count: u32) {
        self.demand += count;
    }

    pub(crate) fn grant(&mut self) {
        debug_assert!(self.alloc < self.demand, "granting a slot beyond demand");
        self.alloc += 1;
    }

    /// Gives back a granted slot together with the request behind it.
    pub(crate) fn withdraw(&mut self) {
        debug_assert!(self.alloc > 0 && self.demand > 0);
        self.alloc = self.alloc.saturating_sub(1);
        self.demand = self.demand.saturating_sub(1);
    }

    pub(crate) fn reset(&mut self) {
        self.demand = 0;
        self.alloc = 0;
        self.fairshare = 0.;
    }
}

/// Orders users by used share: lower `alloc / weight` first, ties by `uid`.
pub fn cmp_used_share(a: &FairShareContext, b: &FairShareContext) -> Ordering {
    a.used_share()
        .total_cmp(&b.used_share())
        .then_with(|| a.uid.cmp(&b.uid))
}

pub fn compute_fairshare(ctx: &FairShareContext, r: f64) -> f64 {
    (ctx.weight * r).max(ctx.minshare).min(ctx.demand as f64)
}

/// Scales min shares down proportionally when they add up to more than `total`.
pub fn scale_minshares<C: BorrowMut<FairShareContext>>(contexts: &mut [C], total: u32) {
    let sum: f64 = contexts
        .iter()
        .map(|c| Borrow::<FairShareContext>::borrow(c).minshare)
        .sum();
    if sum > total as f64 {
        let r = total as f64 / sum;
        for ctx in contexts.iter_mut() {
            let ctx: &mut FairShareContext = ctx.borrow_mut();
            ctx.minshare *= r;
        }
    }
}

fn fits<C: Borrow<FairShareContext>>(contexts: &[C], total: u32, r: f64) -> bool {
    let mut sum = 0.;
    let mut satisfied = true;
    for ctx in contexts {
        let ctx: &FairShareContext = ctx.borrow();
        let fs = compute_fairshare(ctx, r);
        if fs < ctx.demand as f64 {
            satisfied = false;
        }
        sum += fs;
    }
    satisfied || sum >= total as f64
}

fn upper_ratio<C: Borrow<FairShareContext>>(contexts: &[C], total: u32) -> f64 {
    let mut ru = 1.;
    while !fits(contexts, total, ru) {
        ru *= 2.;
    }
    ru
}

/// Computes the fair share ratio without touching the contexts.
///
/// Min shares must be scaled first.
pub fn compute_ratio<C: Borrow<FairShareContext>>(contexts: &[C], total: u32) -> f64 {
    let mut ru = upper_ratio(contexts, total);
    let mut rl = 0.;
    for _ in 0..BISECTION_ROUNDS {
        let m = (rl + ru) / 2.;
        if fits(contexts, total, m) {
            ru = m;
        } else {
            rl = m;
        }
    }
    ru
}

/// Computes and stores the fair share of every context, returns the ratio.
///
/// `fairshare` holds the value at the last bisection midpoint. Min shares
/// must be scaled first.
pub fn compute_fairshares<C: BorrowMut<FairShareContext>>(contexts: &mut [C], total: u32) -> f64 {
    let mut ru = upper_ratio(contexts, total);
    let mut rl = 0.;
    for _ in 0..BISECTION_ROUNDS {
        let m = (rl + ru) / 2.;
        let mut sum = 0.;
        let mut satisfied = true;
        for ctx in contexts.iter_mut() {
            let ctx: &mut FairShareContext = ctx.borrow_mut();
            ctx.fairshare = compute_fairshare(ctx, m);
            if ctx.fairshare < ctx.demand as f64 {
                satisfied = false;
            }
            sum += ctx.fairshare;
        }
        if satisfied || sum >= total as f64 {
            ru = m;
        } else {
            rl = m;
        }
    }
    ru
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Vec<FairShareContext> {
        vec![
            FairShareContext::new(2., 2287., 357, 0),
            FairShareContext::new(2., 274., 0, 1),
            FairShareContext::new(1., 274., 5, 2),
            FairShareContext::new(2., 1738., 7, 3),
            FairShareContext::new(6., 1830., 27921, 4),
            FairShareContext::new(6., 2745., 878, 5),
        ]
    }

    #[test]
    fn scales_minshares_proportionally() {
        let mut ctx = users();
        let before: Vec<f64> = ctx.iter().map(|c| c.minshare).collect();
        scale_minshares(&mut ctx, 9096);

        let factor = 9096. / 9148.;
        for (c, b) in ctx.iter().zip(before) {
            assert!((c.minshare - b * factor).abs() < 1e-9);
        }
        let sum: f64 = ctx.iter().map(|c| c.minshare).sum();
        assert!(sum <= 9096. + 1e-6);
    }

    #[test]
    fn keeps_minshares_below_total() {
        let mut ctx = users();
        scale_minshares(&mut ctx, 100_000);
        assert_eq!(ctx[0].minshare, 2287.);
        assert_eq!(ctx[5].minshare, 2745.);
    }

    #[test]
    fn fairshare_is_clamped() {
        let ctx = FairShareContext::new(2., 3., 10, 0);
        assert_eq!(compute_fairshare(&ctx, 1.), 3.);
        assert_eq!(compute_fairshare(&ctx, 4.), 8.);
        assert_eq!(compute_fairshare(&ctx, 100.), 10.);
    }

    #[test]
    fn fairshares_fill_the_cluster() {
        let mut ctx = users();
        scale_minshares(&mut ctx, 9096);
        compute_fairshares(&mut ctx, 9096);

        let sum: f64 = ctx.iter().map(|c| c.fairshare).sum();
        assert!(sum <= 9096. + 1.);
        assert!(sum >= 9096. - 1.);
        for c in &ctx {
            assert!(c.fairshare <= c.demand as f64);
        }
        // small demands are fully served
        assert_eq!(ctx[2].fairshare, 5.);
        assert_eq!(ctx[3].fairshare, 7.);
        assert_eq!(ctx[1].fairshare, 0.);
    }

    #[test]
    fn fairshares_are_idempotent() {
        let mut ctx = users();
        scale_minshares(&mut ctx, 9096);
        compute_fairshares(&mut ctx, 9096);
        let first: Vec<f64> = ctx.iter().map(|c| c.fairshare).collect();
        compute_fairshares(&mut ctx, 9096);
        let second: Vec<f64> = ctx.iter().map(|c| c.fairshare).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn fairshares_are_monotonic_in_weight_and_demand() {
        let base = vec![
            FairShareContext::new(1., 0., 10, 0),
            FairShareContext::new(1., 0., 10, 1),
            FairShareContext::new(2., 1., 10, 2),
        ];
        let mut reference = base.clone();
        compute_fairshares(&mut reference, 12);

        let mut heavier = base.clone();
        heavier[0].set_weight(3.);
        compute_fairshares(&mut heavier, 12);
        assert!(heavier[0].fairshare >= reference[0].fairshare);

        let mut hungrier = base;
        hungrier[1].demand = 20;
        compute_fairshares(&mut hungrier, 12);
        assert!(hungrier[1].fairshare >= reference[1].fairshare);
    }

    #[test]
    fn ratio_matches_stored_fairshares() {
        let mut ctx = users();
        scale_minshares(&mut ctx, 9096);
        let r = compute_ratio(&ctx, 9096);
        let stored = compute_fairshares(&mut ctx, 9096);
        assert_eq!(r, stored);
    }

    #[test]
    fn works_through_references() {
        let mut a = FairShareContext::new(1., 0., 4, 0);
        let mut b = FairShareContext::new(1., 0., 4, 1);
        {
            let mut refs = vec![&mut a, &mut b];
            compute_fairshares(&mut refs, 4);
        }
        assert!((a.fairshare - 2.).abs() < 1e-3);
        assert!((b.fairshare - 2.).abs() < 1e-3);
    }

    #[test]
    fn empty_demand_gets_nothing() {
        let mut ctx = vec![FairShareContext::new(1., 2., 0, 0)];
        compute_fairshares(&mut ctx, 10);
        assert_eq!(ctx[0].fairshare, 0.);
    }

    #[test]
    fn used_share_ordering() {
        let mut a = FairShareContext::new(1., 0., 5, 7);
        let b = FairShareContext::new(2., 0., 5, 3);
        // both idle, tie broken by uid
        assert_eq!(cmp_used_share(&a, &b), Ordering::Greater);
        a.grant();
        assert_eq!(cmp_used_share(&a, &b), Ordering::Greater);
        assert_eq!(cmp_used_share(&b, &a), Ordering::Less);
    }

    #[test]
    fn weight_is_clamped() {
        let ctx = FairShareContext::new(0.1, -3., 0, 0);
        assert_eq!(ctx.weight, MIN_WEIGHT);
        assert_eq!(ctx.minshare, 0.);
    }
}
