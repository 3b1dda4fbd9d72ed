use crate::kind::Elem;

/// A 0-dim engine value, either integral or floating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ScalarImpl(pub(crate) Elem);

impl ScalarImpl {
    pub(crate) fn to_int(self) -> i64 {
        self.0.as_i64()
    }

    pub(crate) fn to_float(self) -> f64 {
        self.0.as_f64()
    }

    /// Rendering used by the engine's printers: integers bare, floats with
    /// at least one fractional digit.
    pub(crate) fn render(self) -> String {
        match self.0 {
            Elem::Int(v) => v.to_string(),
            Elem::Float(v) => format!("{v:?}"),
            Elem::Bool(v) => v.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        assert_eq!(ScalarImpl(Elem::Int(45)).render(), "45");
        assert_eq!(ScalarImpl(Elem::Float(1.5)).render(), "1.5");
        assert_eq!(ScalarImpl(Elem::Float(2.0)).render(), "2.0");
    }

    #[test]
    fn test_conversions() {
        let s = ScalarImpl(Elem::Int(45));
        assert_eq!(s.to_int(), 45);
        assert_eq!(s.to_float(), 45.0);
        assert_eq!(ScalarImpl(Elem::Float(-2.5)).to_int(), -2);
    }
}
