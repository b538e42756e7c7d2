use super::Relu;

#[derive(Clone, Debug)]
pub enum ActFn {
    Relu(Relu),
}

impl ActFn {
    pub fn relu() -> Self {
        ActFn::Relu(Relu)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActFn::Relu(_) => "relu",
        }
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            ActFn::Relu(a) => a.f(x),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            ActFn::Relu(a) => a.df(x),
        }
    }
}
