use crate::core::error::{FlowError, FlowResult};
use serde::{Deserialize, Serialize};

/// Runtime datum flowing between pipeline stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// A flat numeric array
    Array(Vec<f64>),
    /// A list of numeric arrays (ports declared with list dimensionality)
    List(Vec<Vec<f64>>),
}

impl Value {
    /// Create an array value
    pub fn array(values: impl Into<Vec<f64>>) -> Self {
        Value::Array(values.into())
    }

    /// Create a single-element array, broadcast against arrays of any length
    pub fn scalar(value: f64) -> Self {
        Value::Array(vec![value])
    }

    /// Borrow the contents of an array value
    pub fn as_array(&self) -> FlowResult<&[f64]> {
        match self {
            Value::Array(values) => Ok(values),
            Value::List(_) => Err(FlowError::ShapeMismatch(
                "expected an array, found a list".to_string(),
            )),
        }
    }

    /// Consume an array value
    pub fn into_array(self) -> FlowResult<Vec<f64>> {
        match self {
            Value::Array(values) => Ok(values),
            Value::List(_) => Err(FlowError::ShapeMismatch(
                "expected an array, found a list".to_string(),
            )),
        }
    }

    /// Borrow the items of a list value
    pub fn as_list(&self) -> FlowResult<&[Vec<f64>]> {
        match self {
            Value::List(items) => Ok(items),
            Value::Array(_) => Err(FlowError::ShapeMismatch(
                "expected a list, found an array".to_string(),
            )),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// Combine two arrays element-wise, broadcasting single-element operands.
    pub fn zip_with(&self, other: &Value, op: impl Fn(f64, f64) -> f64) -> FlowResult<Value> {
        let lhs = self.as_array()?;
        let rhs = other.as_array()?;
        let values = match (lhs.len(), rhs.len()) {
            (1, _) => rhs.iter().map(|&r| op(lhs[0], r)).collect(),
            (_, 1) => lhs.iter().map(|&l| op(l, rhs[0])).collect(),
            (a, b) if a == b => lhs.iter().zip(rhs).map(|(&l, &r)| op(l, r)).collect(),
            (a, b) => {
                return Err(FlowError::ShapeMismatch(format!(
                    "cannot combine arrays of length {} and {}",
                    a, b
                )))
            }
        };
        Ok(Value::Array(values))
    }

    /// Apply a function to every element of an array value
    pub fn map(&self, op: impl Fn(f64) -> f64) -> FlowResult<Value> {
        Ok(Value::Array(self.as_array()?.iter().map(|&v| op(v)).collect()))
    }
}

impl From<Vec<f64>> for Value {
    fn from(values: Vec<f64>) -> Self {
        Value::Array(values)
    }
}

impl From<&[f64]> for Value {
    fn from(values: &[f64]) -> Self {
        Value::Array(values.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_with_broadcasts_scalars() {
        let a = Value::array(vec![1.0, 2.0, 3.0]);
        let two = Value::scalar(2.0);
        assert_eq!(a.zip_with(&two, |x, y| x * y).unwrap(), Value::array(vec![2.0, 4.0, 6.0]));
        assert_eq!(two.zip_with(&a, |x, y| x - y).unwrap(), Value::array(vec![1.0, 0.0, -1.0]));
    }

    #[test]
    fn test_zip_with_rejects_length_mismatch() {
        let a = Value::array(vec![1.0, 2.0]);
        let b = Value::array(vec![1.0, 2.0, 3.0]);
        assert!(matches!(a.zip_with(&b, |x, y| x + y), Err(FlowError::ShapeMismatch(_))));
    }

    #[test]
    fn test_list_is_not_an_array() {
        let list = Value::List(vec![vec![1.0]]);
        assert!(list.as_array().is_err());
        assert!(list.is_list());
        assert_eq!(list.as_list().unwrap().len(), 1);
    }
}
