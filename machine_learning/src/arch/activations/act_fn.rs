use super::{Gelu, Relu, Sigmoid};

/// The element-wise activation functions available to the layers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActFn {
    Sigmoid(Sigmoid),
    Relu(Relu),
    Gelu(Gelu),
}

impl ActFn {
    pub fn sigmoid(amp: f32) -> Self {
        ActFn::Sigmoid(Sigmoid::new(amp))
    }

    pub fn relu() -> Self {
        ActFn::Relu(Relu)
    }

    pub fn gelu() -> Self {
        ActFn::Gelu(Gelu)
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            ActFn::Sigmoid(a) => a.f(x),
            ActFn::Relu(a) => a.f(x),
            ActFn::Gelu(a) => a.f(x),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            ActFn::Sigmoid(a) => a.df(x),
            ActFn::Relu(a) => a.df(x),
            ActFn::Gelu(a) => a.df(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_derivative(act_fn: ActFn) {
        const H: f32 = 1e-3;

        for x in [-2.5, -0.7, 0.3, 1.1, 3.0] {
            let numeric = (act_fn.f(x + H) - act_fn.f(x - H)) / (2. * H);
            assert!(
                (numeric - act_fn.df(x)).abs() < 1e-2,
                "{act_fn:?} at {x}: {numeric} vs {}",
                act_fn.df(x)
            );
        }
    }

    #[test]
    fn derivatives_match_finite_differences() {
        check_derivative(ActFn::sigmoid(1.));
        check_derivative(ActFn::sigmoid(2.5));
        check_derivative(ActFn::relu());
        check_derivative(ActFn::gelu());
    }

    #[test]
    fn known_values() {
        assert!((ActFn::sigmoid(1.).f(0.) - 0.5).abs() < 1e-6);
        assert_eq!(ActFn::relu().f(-3.), 0.);
        assert_eq!(ActFn::relu().f(3.), 3.);
        assert_eq!(ActFn::gelu().f(0.), 0.);
        assert!((ActFn::gelu().f(3.) - 2.9964).abs() < 1e-3);
    }

    #[test]
    fn constructors_pick_their_variant() {
        assert!(matches!(ActFn::sigmoid(2.), ActFn::Sigmoid(s) if s == Sigmoid::new(2.)));
        assert!(matches!(ActFn::relu(), ActFn::Relu(Relu)));
        assert!(matches!(ActFn::gelu(), ActFn::Gelu(Gelu)));
    }
}
