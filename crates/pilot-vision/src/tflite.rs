use anyhow::Result;
use std::os::raw::{c_int, c_void};
use std::ptr;
use tracing::info;

use crate::engine::TensorEngine;

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreate(model_data: *const c_void, model_size: usize) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensorCount(interpreter: *const TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *const TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;

    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;
}

/// TFLite C API engine. Owns the model bytes for the interpreter's lifetime
/// (TfLiteModelCreate does not copy them).
pub struct TfLiteEngine {
    _model_bytes: Vec<u8>,
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
    input_dims: Vec<usize>,
}

unsafe impl Send for TfLiteEngine {}

impl TfLiteEngine {
    pub fn new(model_bytes: Vec<u8>) -> Result<Self> {
        let model = unsafe { TfLiteModelCreate(model_bytes.as_ptr() as *const c_void, model_bytes.len()) };
        anyhow::ensure!(!model.is_null(), "TfLiteModelCreate rejected the model buffer");

        let opts = unsafe { TfLiteInterpreterOptionsCreate() };
        anyhow::ensure!(!opts.is_null(), "failed to create tflite options");
        unsafe { TfLiteInterpreterOptionsSetNumThreads(opts, 2); } // conservative

        let interp = unsafe { TfLiteInterpreterCreate(model, opts) };
        anyhow::ensure!(!interp.is_null(), "failed to create tflite interpreter");

        let rc = unsafe { TfLiteInterpreterAllocateTensors(interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed");

        let input = unsafe { TfLiteInterpreterGetInputTensor(interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");
        let input_dims = tensor_dims(input);

        info!("vision: tflite interpreter ready, input dims {:?}", input_dims);

        Ok(Self { _model_bytes: model_bytes, model, opts, interp, input_dims })
    }
}

impl TensorEngine for TfLiteEngine {
    fn input_dims(&self) -> &[usize] {
        &self.input_dims
    }

    fn output_count(&self) -> usize {
        unsafe { TfLiteInterpreterGetOutputTensorCount(self.interp) as usize }
    }

    fn output_dims(&self, index: usize) -> Result<Vec<usize>> {
        let out = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, index as c_int) };
        anyhow::ensure!(!out.is_null(), "no output tensor {}", index);
        Ok(tensor_dims(out))
    }

    fn run(&mut self, input: &[f32], outputs: &mut [&mut [f32]]) -> Result<()> {
        let in_tensor = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!in_tensor.is_null(), "no input tensor");

        let in_bytes = unsafe { TfLiteTensorByteSize(in_tensor) };
        let need = input.len() * std::mem::size_of::<f32>();
        anyhow::ensure!(
            in_bytes == need,
            "input tensor size mismatch: tensor {} bytes, supplied {} bytes (float32 model expected)",
            in_bytes,
            need
        );

        let in_ptr = unsafe { TfLiteTensorData(in_tensor) as *mut f32 };
        anyhow::ensure!(!in_ptr.is_null(), "null input tensor data");
        unsafe { ptr::copy_nonoverlapping(input.as_ptr(), in_ptr, input.len()); }

        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed");

        for (index, dst) in outputs.iter_mut().enumerate() {
            let out = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, index as c_int) };
            anyhow::ensure!(!out.is_null(), "no output tensor {}", index);

            let out_bytes = unsafe { TfLiteTensorByteSize(out) };
            let out_len = out_bytes / std::mem::size_of::<f32>();
            anyhow::ensure!(
                dst.len() == out_len,
                "output {} length mismatch: tensor has {} floats, buffer has {}",
                index,
                out_len,
                dst.len()
            );

            let out_ptr = unsafe { TfLiteTensorData(out) as *const f32 };
            anyhow::ensure!(!out_ptr.is_null(), "null output tensor data");
            unsafe { ptr::copy_nonoverlapping(out_ptr, dst.as_mut_ptr(), out_len); }
        }

        Ok(())
    }
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<usize> {
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        let mut v = Vec::with_capacity(nd as usize);
        for i in 0..nd {
            v.push(TfLiteTensorDim(t, i).max(0) as usize);
        }
        v
    }
}

impl Drop for TfLiteEngine {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
        self.interp = ptr::null_mut();
        self.opts = ptr::null_mut();
        self.model = ptr::null_mut();
    }
}
