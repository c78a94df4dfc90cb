//! Local minimum / maximum detection on a close-price series.
//!
//! Interior points must beat both neighbours and differ from their average by
//! at least `min_change` (a fraction, 0.01 = 1%). Endpoints only compare with
//! their single neighbour and skip the significance test. Series shorter than
//! three points have no extrema.

pub fn is_local_minimum(prices: &[f64], index: usize, min_change: f64) -> bool {
    is_extremum(prices, index, min_change, |a, b| a <= b)
}

pub fn is_local_maximum(prices: &[f64], index: usize, min_change: f64) -> bool {
    is_extremum(prices, index, min_change, |a, b| a >= b)
}

fn is_extremum(prices: &[f64], index: usize, min_change: f64, beats: impl Fn(f64, f64) -> bool) -> bool {
    if prices.len() < 3 || index >= prices.len() {
        return false;
    }
    let current = prices[index];

    if index == 0 {
        return beats(current, prices[1]);
    }
    if index == prices.len() - 1 {
        return beats(current, prices[index - 1]);
    }

    let left = prices[index - 1];
    let right = prices[index + 1];
    if !(beats(current, left) && beats(current, right)) {
        return false;
    }

    let avg_adjacent = (left + right) / 2.0;
    if avg_adjacent == 0.0 {
        return false;
    }
    (current - avg_adjacent).abs() / avg_adjacent >= min_change
}
