/// Persistent buffers reused across rollout windows.
#[derive(Debug)]
pub struct WorkerState {
    /// Local copy of the shared parameters (flat).
    pub params: Vec<f32>,

    /// Gradient buffer (flat), handed over to the store on every update.
    pub grads: Vec<f32>,
}

impl WorkerState {
    pub fn new(num_params: usize) -> Self {
        Self {
            params: vec![0.0; num_params],
            grads: vec![0.0; num_params],
        }
    }

    /// Leaves a zeroed gradient buffer of the parameters' length.
    #[inline]
    pub fn zero_grads(&mut self) {
        self.grads.clear();
        self.grads.resize(self.params.len(), 0.0);
    }

    /// Takes the gradient buffer out, leaving an empty one behind.
    #[inline]
    pub fn take_grads(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.grads)
    }
}
