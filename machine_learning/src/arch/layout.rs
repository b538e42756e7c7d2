use std::{ops::Range, sync::Arc};

use crate::{MlErr, Result};

/// The name, shape and position of one tensor inside a flat parameter vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    name: String,
    shape: Vec<usize>,
    offset: usize,
}

impl TensorSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The range this tensor occupies in the flat parameter vector.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len()
    }
}

/// The ordered set of named tensors a flat parameter vector is made of.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamLayout {
    tensors: Vec<TensorSpec>,
    len: usize,
}

impl ParamLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a tensor right after the last one.
    ///
    /// # Arguments
    /// * `name` - The unique name of the tensor.
    /// * `shape` - The dimensions of the tensor.
    pub fn push(&mut self, name: impl Into<String>, shape: Vec<usize>) {
        let spec = TensorSpec {
            name: name.into(),
            shape,
            offset: self.len,
        };

        self.len += spec.len();
        self.tensors.push(spec);
    }

    /// Returns the total amount of parameters.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn tensors(&self) -> &[TensorSpec] {
        &self.tensors
    }

    pub fn get(&self, name: &str) -> Option<&TensorSpec> {
        self.tensors.iter().find(|spec| spec.name == name)
    }
}

/// A flat parameter vector tied to the layout describing it.
///
/// Every owner holds its own values, cloning copies them and shares only the layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    layout: Arc<ParamLayout>,
    values: Vec<f32>,
}

impl Parameters {
    /// Creates a new `Parameters`.
    ///
    /// # Arguments
    /// * `layout` - The layout of the parameters.
    /// * `values` - The flat values, in layout order.
    ///
    /// # Returns
    /// A size mismatch error if `values` doesn't have the length of the layout.
    pub fn new(layout: Arc<ParamLayout>, values: Vec<f32>) -> Result<Self> {
        if values.len() != layout.len() {
            return Err(MlErr::SizeMismatch {
                what: "parameters",
                got: values.len(),
                expected: layout.len(),
            });
        }

        Ok(Self { layout, values })
    }

    pub fn layout(&self) -> &Arc<ParamLayout> {
        &self.layout
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    /// Returns the values of the tensor named `name`, if the layout has one.
    pub fn tensor(&self, name: &str) -> Option<&[f32]> {
        self.layout.get(name).map(|spec| &self.values[spec.range()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Arc<ParamLayout> {
        let mut layout = ParamLayout::new();
        layout.push("hidden.weight", vec![2, 3]);
        layout.push("hidden.bias", vec![3]);
        Arc::new(layout)
    }

    #[test]
    fn tensors_are_packed_in_order() {
        let layout = layout();

        assert_eq!(layout.len(), 9);
        assert_eq!(layout.get("hidden.bias").unwrap().range(), 6..9);
        assert!(layout.get("missing").is_none());
    }

    #[test]
    fn parameters_check_their_length() {
        assert!(Parameters::new(layout(), vec![0.; 8]).is_err());

        let values = (0..9).map(|x| x as f32).collect();
        let params = Parameters::new(layout(), values).unwrap();
        assert_eq!(params.tensor("hidden.bias").unwrap(), [6., 7., 8.]);
    }
}
