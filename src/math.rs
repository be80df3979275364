#[inline(always)]
pub fn dot<'a, I>(a: &[f64], b: I) -> f64
where
    I: IntoIterator<Item = &'a f64>,
{
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(feature = "train")]
#[inline(always)]
pub fn squared_distance<'a, I>(a: &[f64], b: I) -> f64
where
    I: IntoIterator<Item = &'a f64>,
{
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[cfg(test)]
#[inline(always)]
pub fn logsumexp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY && b == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if a > b {
        a + (b - a).exp().ln_1p()
    } else {
        b + (a - b).exp().ln_1p()
    }
}
