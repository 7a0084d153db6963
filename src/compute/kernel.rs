//! Elementwise array arithmetic for formulas.
//!
//! Every operand is either an array aligned on the records of one entity or a
//! scalar broadcast across them. Arrays of different lengths are rejected
//! before anything is computed.

use super::error::ComputationError;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    Scalar(f64),
    Array(&'a [f64]),
}

impl Operand<'_> {
    #[inline(always)]
    fn at(&self, i: usize) -> f64 {
        match self {
            Operand::Scalar(v) => *v,
            Operand::Array(a) => a[i],
        }
    }

    fn len(&self) -> Option<usize> {
        match self {
            Operand::Scalar(_) => None,
            Operand::Array(a) => Some(a.len()),
        }
    }
}

impl From<f64> for Operand<'_> {
    fn from(v: f64) -> Self {
        Operand::Scalar(v)
    }
}

impl<'a> From<&'a [f64]> for Operand<'a> {
    fn from(a: &'a [f64]) -> Self {
        Operand::Array(a)
    }
}

impl<'a> From<&'a Vec<f64>> for Operand<'a> {
    fn from(a: &'a Vec<f64>) -> Self {
        Operand::Array(a)
    }
}

impl<'a> From<&'a Arc<Vec<f64>>> for Operand<'a> {
    fn from(a: &'a Arc<Vec<f64>>) -> Self {
        Operand::Array(a.as_slice())
    }
}

/// Common length of the array operands; all-scalar expressions have length 1.
fn aligned(context: &str, operands: &[Operand<'_>]) -> Result<usize, ComputationError> {
    let mut len: Option<usize> = None;
    for n in operands.iter().filter_map(Operand::len) {
        match len {
            None => len = Some(n),
            Some(expected) if expected != n => {
                return Err(ComputationError::ShapeMismatch { context: context.to_string(), expected, actual: n });
            }
            _ => {}
        }
    }
    Ok(len.unwrap_or(1))
}

fn zip_with<'a, 'b, F>(context: &str, a: impl Into<Operand<'a>>, b: impl Into<Operand<'b>>, f: F) -> Result<Vec<f64>, ComputationError>
where
    F: Fn(f64, f64) -> f64,
{
    let (a, b) = (a.into(), b.into());
    let len = aligned(context, &[a, b])?;
    Ok((0..len).map(|i| f(a.at(i), b.at(i))).collect())
}

pub fn add<'a, 'b>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'b>>) -> Result<Vec<f64>, ComputationError> {
    zip_with("add", a, b, |x, y| x + y)
}

pub fn sub<'a, 'b>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'b>>) -> Result<Vec<f64>, ComputationError> {
    zip_with("sub", a, b, |x, y| x - y)
}

pub fn mul<'a, 'b>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'b>>) -> Result<Vec<f64>, ComputationError> {
    zip_with("mul", a, b, |x, y| x * y)
}

/// Division where a zero denominator yields 0 rather than inf/NaN.
pub fn div<'a, 'b>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'b>>) -> Result<Vec<f64>, ComputationError> {
    zip_with("div", a, b, |x, y| if y == 0.0 { 0.0 } else { x / y })
}

pub fn min_<'a, 'b>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'b>>) -> Result<Vec<f64>, ComputationError> {
    zip_with("min", a, b, f64::min)
}

pub fn max_<'a, 'b>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'b>>) -> Result<Vec<f64>, ComputationError> {
    zip_with("max", a, b, f64::max)
}

pub fn gt<'a, 'b>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'b>>) -> Result<Vec<f64>, ComputationError> {
    zip_with("gt", a, b, |x, y| (x > y) as u8 as f64)
}

pub fn ge<'a, 'b>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'b>>) -> Result<Vec<f64>, ComputationError> {
    zip_with("ge", a, b, |x, y| (x >= y) as u8 as f64)
}

pub fn lt<'a, 'b>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'b>>) -> Result<Vec<f64>, ComputationError> {
    zip_with("lt", a, b, |x, y| (x < y) as u8 as f64)
}

pub fn le<'a, 'b>(a: impl Into<Operand<'a>>, b: impl Into<Operand<'b>>) -> Result<Vec<f64>, ComputationError> {
    zip_with("le", a, b, |x, y| (x <= y) as u8 as f64)
}

/// `cond != 0 ? a : b`, elementwise.
pub fn where_<'c, 'a, 'b>(
    cond: impl Into<Operand<'c>>,
    a: impl Into<Operand<'a>>,
    b: impl Into<Operand<'b>>,
) -> Result<Vec<f64>, ComputationError> {
    let (cond, a, b) = (cond.into(), a.into(), b.into());
    let len = aligned("where", &[cond, a, b])?;
    Ok((0..len).map(|i| if cond.at(i) != 0.0 { a.at(i) } else { b.at(i) }).collect())
}

pub fn not_(mask: &[f64]) -> Vec<f64> {
    mask.iter().map(|&v| (v == 0.0) as u8 as f64).collect()
}

/// Elementwise sum of several aligned arrays.
pub fn sum_arrays<A: AsRef<[f64]>>(arrays: &[A]) -> Result<Vec<f64>, ComputationError> {
    let Some(first) = arrays.first() else {
        return Ok(Vec::new());
    };
    let mut total = first.as_ref().to_vec();
    for a in &arrays[1..] {
        let a = a.as_ref();
        if a.len() != total.len() {
            return Err(ComputationError::ShapeMismatch { context: "sum".into(), expected: total.len(), actual: a.len() });
        }
        for (acc, v) in total.iter_mut().zip(a) {
            *acc += v;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::add(add(&vec![1.0, 2.0], 1.0).unwrap(), vec![2.0, 3.0])]
    #[case::sub(sub(10.0, &vec![1.0, 2.0]).unwrap(), vec![9.0, 8.0])]
    #[case::mul(mul(&vec![2.0, 3.0], &vec![4.0, 5.0]).unwrap(), vec![8.0, 15.0])]
    #[case::div_by_zero(div(&vec![4.0, 4.0], &vec![2.0, 0.0]).unwrap(), vec![2.0, 0.0])]
    #[case::min(min_(&vec![160_200.0, 200_000.0], 160_200.0).unwrap(), vec![160_200.0, 160_200.0])]
    #[case::max(max_(&vec![-5.0, 5.0], 0.0).unwrap(), vec![0.0, 5.0])]
    #[case::gt(gt(&vec![1.0, 2.0], 1.0).unwrap(), vec![0.0, 1.0])]
    #[case::le(le(&vec![1.0, 2.0], 1.0).unwrap(), vec![1.0, 0.0])]
    fn test_elementwise(#[case] actual: Vec<f64>, #[case] expected: Vec<f64>) {
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_misaligned_operands_rejected() {
        let err = add(&vec![1.0, 2.0], &vec![1.0]).unwrap_err();
        assert_eq!(err, ComputationError::ShapeMismatch { context: "add".into(), expected: 2, actual: 1 });
    }

    #[test]
    fn test_where_and_not() {
        let dependent = vec![0.0, 1.0, 0.0];
        let kept = where_(&not_(&dependent), &vec![10.0, 20.0, 30.0], 0.0).unwrap();
        assert_eq!(kept, vec![10.0, 0.0, 30.0]);
    }

    #[test]
    fn test_sum_arrays() {
        assert_eq!(sum_arrays(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap(), vec![4.0, 6.0]);
        assert!(sum_arrays::<Vec<f64>>(&[]).unwrap().is_empty());
        assert!(sum_arrays(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
