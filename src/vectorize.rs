/// An entity with a lossless flat `f64` representation suitable for
/// numerical optimization.
///
/// Implementations must satisfy `restore(store(x)) == x` for any in-domain
/// `x`.
pub trait Vectorizable {
    /// Number of scalars in the flat representation.
    fn dim(&self) -> usize;

    /// Serialize into `out`, replacing its contents.
    ///
    /// Returns false when the object cannot be linearized.
    fn store(&self, out: &mut Vec<f64>) -> bool;

    /// Rebuild the object from a flat vector.
    ///
    /// Returns false when `v` does not describe an in-domain object; the
    /// receiver must be left unchanged in that case.
    fn restore(&mut self, v: &[f64]) -> bool;
}

/// Flat parameter vectors participate directly.
impl Vectorizable for Vec<f64> {
    fn dim(&self) -> usize {
        self.len()
    }

    fn store(&self, out: &mut Vec<f64>) -> bool {
        out.clear();
        out.extend_from_slice(self);
        true
    }

    fn restore(&mut self, v: &[f64]) -> bool {
        if v.len() != self.len() {
            return false;
        }
        self.copy_from_slice(v);
        true
    }
}
