use anyhow::Result;

/// Black-box tensor inference engine: one loaded model with a fixed numeric
/// contract. All calls are synchronous on the calling thread; one engine
/// instance must never be invoked concurrently.
pub trait TensorEngine: Send {
    /// Input tensor dims, NHWC (e.g. `[1, 320, 320, 3]`).
    fn input_dims(&self) -> &[usize];

    fn output_count(&self) -> usize;

    fn output_dims(&self, index: usize) -> Result<Vec<usize>>;

    /// Runs one forward pass. `outputs[i]` must be sized to output `i`'s
    /// element count (see `output_dims`); the engine fills each slice.
    fn run(&mut self, input: &[f32], outputs: &mut [&mut [f32]]) -> Result<()>;
}

/// Reusable per-output buffers keyed by (index, length); reallocated only
/// when a requested length changes, so steady-state frames allocate nothing.
#[derive(Default)]
pub struct OutputPool {
    bufs: Vec<Vec<f32>>,
}

impl OutputPool {
    pub fn ensure(&mut self, index: usize, len: usize) {
        while self.bufs.len() <= index {
            self.bufs.push(Vec::new());
        }
        if self.bufs[index].len() != len {
            self.bufs[index] = vec![0.0; len];
        }
    }

    /// Mutable slices over all buffers, in index order, for `TensorEngine::run`.
    pub fn slices(&mut self) -> Vec<&mut [f32]> {
        self.bufs.iter_mut().map(|b| b.as_mut_slice()).collect()
    }

    pub fn get(&self, index: usize) -> &[f32] {
        self.bufs.get(index).map(|b| b.as_slice()).unwrap_or(&[])
    }
}
