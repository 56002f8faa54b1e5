use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use std::cell::{Ref, RefCell};
use std::rc::Rc;

/// Persistent numeric storage owned by a module instance.
///
/// Compiled kernels hold clones of the handle, not of the data: writing
/// through [`SharedArray::update`] is seen by every holder, while installing
/// a new handle on the instance leaves old holders on the old storage.
#[derive(Debug, Clone)]
pub struct SharedArray(Rc<RefCell<Vec<f64>>>);

impl SharedArray {
    pub fn new(values: Vec<f64>) -> Self {
        Self(Rc::new(RefCell::new(values)))
    }

    pub fn zeros(len: usize) -> Self {
        Self::new(vec![0.0; len])
    }

    /// Values drawn uniformly from `[0, 1)`
    pub fn random_uniform(len: usize) -> Self {
        Self::random_uniform_with(&mut rand::thread_rng(), len)
    }

    pub fn random_uniform_with<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Self {
        let dist = Uniform::new(0.0, 1.0);
        Self::new((0..len).map(|_| dist.sample(rng)).collect())
    }

    /// Values drawn from a normal distribution. A non-finite or negative
    /// `std_dev` falls back to zeros.
    pub fn random_normal(len: usize, mean: f64, std_dev: f64) -> Self {
        if !std_dev.is_finite() || std_dev < 0.0 {
            return Self::zeros(len);
        }
        match Normal::new(mean, std_dev) {
            Ok(dist) => {
                let mut rng = rand::thread_rng();
                Self::new((0..len).map(|_| dist.sample(&mut rng)).collect())
            }
            Err(_) => Self::zeros(len),
        }
    }

    /// Borrow the current contents
    pub fn read(&self) -> Ref<'_, Vec<f64>> {
        self.0.borrow()
    }

    /// Copy of the current contents
    pub fn to_vec(&self) -> Vec<f64> {
        self.0.borrow().clone()
    }

    /// Mutate the contents in place; all handles observe the change
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<f64>) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }

    /// Independent copy with its own storage
    pub fn deep_copy(&self) -> Self {
        Self::new(self.to_vec())
    }

    /// Whether both handles alias the same storage
    pub fn same_storage(&self, other: &SharedArray) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
